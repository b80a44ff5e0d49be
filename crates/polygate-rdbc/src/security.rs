//! Guards for the few places where names end up inside SQL text.
//!
//! Values always travel as bound parameters. Table names, column names and
//! DDL type fragments cannot be bound, so they are checked here before any
//! dialect interpolates them.

use crate::error::Error;

const MAX_NAME_LEN: usize = 255;

/// Validate a SQL identifier (table, column, schema, database names).
///
/// Accepts `^[A-Za-z_][A-Za-z0-9_]{0,254}$`.
///
/// ```
/// use polygate_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("order_items").is_ok());
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("1abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_request("SQL identifier cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_request(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    let mut chars = name.chars();
    if !chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return Err(Error::invalid_request(format!(
            "invalid SQL identifier '{}': must start with a letter or underscore",
            name
        )));
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::invalid_request(format!(
            "invalid SQL identifier '{}': contains '{}'",
            name, bad
        )));
    }
    Ok(())
}

/// Double single quotes for use inside a SQL string literal.
///
/// Only used for catalog lookups whose SQL is returned as a finished string.
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Validate a DDL type fragment such as `DECIMAL(38,10)` or `INT UNSIGNED`.
///
/// Letters, digits, `_`, parentheses, commas, spaces, periods and single
/// quotes are allowed.
pub fn validate_sql_type_name(type_name: &str) -> crate::Result<()> {
    if type_name.is_empty() {
        return Err(Error::schema("SQL type name cannot be empty"));
    }
    if type_name.len() > MAX_NAME_LEN {
        return Err(Error::schema(format!(
            "SQL type name too long: {} chars (max {})",
            type_name.len(),
            MAX_NAME_LEN
        )));
    }
    if let Some(bad) = type_name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "_(), '.".contains(*c)))
    {
        return Err(Error::schema(format!(
            "invalid SQL type name '{}': contains '{}'",
            type_name, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_identifiers() {
        for ok in ["users", "_staging", "T1", "order_items_2024"] {
            assert!(validate_sql_identifier(ok).is_ok(), "{ok}");
        }
        for bad in ["", "9lives", "a b", "a.b", "a`b", "a\"b", "x--", "tabl\u{0435}"] {
            assert!(validate_sql_identifier(bad).is_err(), "{bad:?}");
        }
        assert!(validate_sql_identifier(&"a".repeat(255)).is_ok());
        assert!(validate_sql_identifier(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_identifier_errors_are_structural() {
        let err = validate_sql_identifier("a;b").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Structural);
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("orders"), "orders");
        assert_eq!(escape_string_literal("o'brien"), "o''brien");
        assert_eq!(escape_string_literal(""), "");
    }

    #[test]
    fn test_type_names() {
        for ok in [
            "BIGINT",
            "DECIMAL(38,10)",
            "DATETIME(6)",
            "DOUBLE PRECISION",
            "TIMESTAMP WITH TIME ZONE",
            "NUMERIC(20,0)",
        ] {
            assert!(validate_sql_type_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "INT; DROP TABLE t", "INT--", "INT`", "INT\n"] {
            assert!(validate_sql_type_name(bad).is_err(), "{bad:?}");
        }
    }
}
