//! SQL dialect abstraction for polygate-rdbc
//!
//! Only the subset of SQL the gateway needs: multi-row INSERT with bound
//! placeholders, CREATE TABLE from resolved DDL fragments, COUNT and
//! GROUP BY counts, catalog lookups, and filtered SELECTs. SELECTs go
//! through sea-query; INSERT is templated by hand because statements carry
//! tens of thousands of placeholders.
//!
//! Placeholders are `$n` on Postgres and `?` on the MySQL wire family.
//! Identifiers are double-quoted on Postgres and back-ticked on MySQL.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::connection::DatabaseType;
use crate::error::{Error, Result};
use crate::security::{escape_string_literal, validate_sql_identifier, validate_sql_type_name};
use crate::types::Value;
use sea_query::{
    Alias, Asterisk, Expr, IntoIden, MysqlQueryBuilder, PostgresQueryBuilder, Query,
    QueryBuilder, SelectStatement, TableRef,
};

/// Split `schema.table` into its parts, validating each identifier.
pub fn split_table_name(table: &str) -> Result<(Option<&str>, &str)> {
    match table.split_once('.') {
        Some((schema, name)) => {
            validate_sql_identifier(schema)?;
            validate_sql_identifier(name)?;
            Ok((Some(schema), name))
        }
        None => {
            validate_sql_identifier(table)?;
            Ok((None, table))
        }
    }
}

fn sea_table_ref(table: &str) -> Result<TableRef> {
    Ok(match split_table_name(table)? {
        (Some(s), t) => {
            TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(t).into_iden())
        }
        (None, t) => TableRef::Table(Alias::new(t).into_iden()),
    })
}

/// Comparison operators accepted by the filter builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// `=`
    Eq,
    /// `!=` / `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `IS NULL` (takes no value)
    IsNull,
    /// `IS NOT NULL` (takes no value)
    IsNotNull,
}

impl FilterOperator {
    /// SQL token for this operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator binds a value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl FromStr for FilterOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_uppercase().as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            "IS NULL" => Ok(Self::IsNull),
            "IS NOT NULL" => Ok(Self::IsNotNull),
            _ => Err(Error::invalid_request(format!(
                "unsupported filter operator '{}'",
                s
            ))),
        }
    }
}

/// One `column <op> value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column name
    pub column: String,
    /// Operator
    pub operator: FilterOperator,
    /// Bound value; ignored for `IS NULL` / `IS NOT NULL`
    pub value: Value,
}

impl Filter {
    /// Assemble filters from the parallel arrays carried by requests.
    ///
    /// All three arrays must have the same length.
    pub fn from_parallel(
        columns: &[String],
        operators: &[String],
        values: &[String],
    ) -> Result<Vec<Filter>> {
        if columns.len() != operators.len() || columns.len() != values.len() {
            return Err(Error::invalid_request(format!(
                "filter arrays differ in length: {} columns, {} operators, {} values",
                columns.len(),
                operators.len(),
                values.len()
            )));
        }

        columns
            .iter()
            .zip(operators)
            .zip(values)
            .map(|((column, op), value)| {
                validate_sql_identifier(column)
                    .map_err(|e| Error::invalid_request(e.to_string()))?;
                Ok(Filter {
                    column: column.clone(),
                    operator: op.parse()?,
                    value: Value::String(value.clone()),
                })
            })
            .collect()
    }
}

/// A resolved column definition for CREATE TABLE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Native DDL type fragment, e.g. `VARCHAR(1024)`
    pub ddl_type: String,
}

impl ColumnDef {
    /// Create a column definition
    pub fn new(name: impl Into<String>, ddl_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ddl_type: ddl_type.into(),
        }
    }
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Backend family this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Catalog query returning `(name, type, nullable, precision, scale)`
    /// per column, in ordinal order.
    fn list_columns_sql(&self, table: &str) -> Result<String>;

    /// Catalog query returning one row with the table's size in bytes
    fn table_size_sql(&self, table: &str) -> Result<String>;

    /// Statement creating a database/schema if absent
    fn create_database_sql(&self, database: &str) -> Result<String>;

    /// Build a SELECT over `table` with an optional raw WHERE fragment
    fn select_sql(&self, table: &str, columns: &[&str], where_clause: Option<&str>)
        -> Result<String>;

    /// Build `SELECT group_by..., COUNT(*) ... GROUP BY group_by...`
    fn group_count_sql(
        &self,
        table: &str,
        group_by: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String>;

    /// CREATE TABLE statement for already-resolved column types
    fn create_table_sql(&self, table: &str, columns: &[ColumnDef]) -> Result<String> {
        if columns.is_empty() {
            return Err(Error::schema(format!(
                "cannot create table {} without columns",
                table
            )));
        }
        let mut sql = format!("CREATE TABLE {} (", self.quote_table(table)?);
        write_column_defs(self, &mut sql, columns)?;
        sql.push(')');
        Ok(sql)
    }

    /// Quote a possibly schema-qualified table name
    fn quote_table(&self, table: &str) -> Result<String> {
        Ok(match split_table_name(table)? {
            (Some(schema), name) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            (None, name) => self.quote_identifier(name),
        })
    }

    /// `INSERT INTO t (c1, ..) VALUES (..), (..)` with `rows` placeholder groups
    fn insert_sql(&self, table: &str, columns: &[&str], rows: usize) -> Result<String> {
        for column in columns {
            validate_sql_identifier(column)?;
        }
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();

        // Rough sizing: each placeholder is at most ~8 bytes with separators
        let mut sql = String::with_capacity(64 + rows * columns.len() * 8);
        let _ = write!(
            sql,
            "INSERT INTO {} ({}) VALUES ",
            self.quote_table(table)?,
            quoted.join(", ")
        );

        let mut index = 1;
        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..columns.len() {
                if col > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&self.placeholder(index));
                index += 1;
            }
            sql.push(')');
        }
        Ok(sql)
    }

    /// `SELECT COUNT(*) FROM t [WHERE ..]`
    fn count_sql(&self, table: &str, where_clause: Option<&str>) -> Result<String> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.quote_table(table)?);
        if let Some(w) = where_clause.filter(|w| !w.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        Ok(sql)
    }

    /// Render filters into a WHERE fragment plus bound values.
    ///
    /// Returns `None` when there are no filters. Placeholders are numbered
    /// from `first_index`.
    fn where_clause(
        &self,
        filters: &[Filter],
        first_index: usize,
    ) -> Result<Option<(String, Vec<Value>)>> {
        if filters.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(filters.len());
        let mut params = Vec::new();
        let mut index = first_index;
        for filter in filters {
            validate_sql_identifier(&filter.column)?;
            let column = self.quote_identifier(&filter.column);
            if filter.operator.takes_value() {
                parts.push(format!(
                    "{} {} {}",
                    column,
                    filter.operator.as_sql(),
                    self.placeholder(index)
                ));
                params.push(filter.value.clone());
                index += 1;
            } else {
                parts.push(format!("{} {}", column, filter.operator.as_sql()));
            }
        }
        Ok(Some((parts.join(" AND "), params)))
    }
}

fn write_column_defs<D: SqlDialect + ?Sized>(
    dialect: &D,
    sql: &mut String,
    columns: &[ColumnDef],
) -> Result<()> {
    for (i, col) in columns.iter().enumerate() {
        validate_sql_identifier(&col.name)?;
        validate_sql_type_name(&col.ddl_type)?;
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {}", dialect.quote_identifier(&col.name), col.ddl_type);
    }
    Ok(())
}

fn build_select<B: QueryBuilder>(
    builder: B,
    table: &str,
    columns: &[&str],
    where_clause: Option<&str>,
) -> Result<String> {
    let mut stmt = Query::select();
    stmt.from(sea_table_ref(table)?);
    if columns.is_empty() {
        stmt.column(Asterisk);
    } else {
        for col in columns {
            validate_sql_identifier(col)?;
            stmt.column(Alias::new(*col));
        }
    }
    apply_where(&mut stmt, where_clause);
    Ok(stmt.to_string(builder))
}

fn build_group_count<B: QueryBuilder>(
    builder: B,
    table: &str,
    group_by: &[&str],
    where_clause: Option<&str>,
) -> Result<String> {
    if group_by.is_empty() {
        return Err(Error::invalid_request("group count needs at least one column"));
    }
    let mut stmt = Query::select();
    stmt.from(sea_table_ref(table)?);
    for col in group_by {
        validate_sql_identifier(col)?;
        stmt.column(Alias::new(*col));
    }
    stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("group_count"));
    apply_where(&mut stmt, where_clause);
    for col in group_by {
        stmt.group_by_col(Alias::new(*col));
    }
    Ok(stmt.to_string(builder))
}

fn apply_where(stmt: &mut SelectStatement, where_clause: Option<&str>) {
    if let Some(w) = where_clause.filter(|w| !w.is_empty()) {
        stmt.and_where(Expr::cust(w));
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn list_columns_sql(&self, table: &str) -> Result<String> {
        let (schema, name) = split_table_name(table)?;
        Ok(format!(
            "SELECT column_name, udt_name, is_nullable = 'YES', \
             numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ordinal_position",
            escape_string_literal(schema.unwrap_or("public")),
            escape_string_literal(name)
        ))
    }

    fn table_size_sql(&self, table: &str) -> Result<String> {
        let (schema, name) = split_table_name(table)?;
        let qualified = format!("{}.{}", schema.unwrap_or("public"), name);
        Ok(format!(
            "SELECT pg_total_relation_size('{}')::bigint",
            escape_string_literal(&qualified)
        ))
    }

    fn create_database_sql(&self, database: &str) -> Result<String> {
        validate_sql_identifier(database)?;
        Ok(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.quote_identifier(database)
        ))
    }

    fn select_sql(
        &self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_select(PostgresQueryBuilder, table, columns, where_clause)
    }

    fn group_count_sql(
        &self,
        table: &str,
        group_by: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_group_count(PostgresQueryBuilder, table, group_by, where_clause)
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

fn mysql_list_columns(table: &str) -> Result<String> {
    let (schema, name) = split_table_name(table)?;
    let db_filter = schema
        .map(|s| format!("table_schema = '{}'", escape_string_literal(s)))
        .unwrap_or_else(|| "table_schema = DATABASE()".to_string());
    Ok(format!(
        "SELECT column_name, column_type, is_nullable = 'YES', \
         numeric_precision, numeric_scale \
         FROM information_schema.columns \
         WHERE {} AND table_name = '{}' \
         ORDER BY ordinal_position",
        db_filter,
        escape_string_literal(name)
    ))
}

fn mysql_table_size(table: &str) -> Result<String> {
    let (schema, name) = split_table_name(table)?;
    let db_filter = schema
        .map(|s| format!("table_schema = '{}'", escape_string_literal(s)))
        .unwrap_or_else(|| "table_schema = DATABASE()".to_string());
    Ok(format!(
        "SELECT CAST(COALESCE(data_length, 0) + COALESCE(index_length, 0) AS SIGNED) \
         FROM information_schema.tables WHERE {} AND table_name = '{}'",
        db_filter,
        escape_string_literal(name)
    ))
}

fn backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        backtick(name)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn list_columns_sql(&self, table: &str) -> Result<String> {
        mysql_list_columns(table)
    }

    fn table_size_sql(&self, table: &str) -> Result<String> {
        mysql_table_size(table)
    }

    fn create_database_sql(&self, database: &str) -> Result<String> {
        validate_sql_identifier(database)?;
        Ok(format!("CREATE DATABASE IF NOT EXISTS {}", backtick(database)))
    }

    fn select_sql(
        &self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_select(MysqlQueryBuilder, table, columns, where_clause)
    }

    fn group_count_sql(
        &self,
        table: &str,
        group_by: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_group_count(MysqlQueryBuilder, table, group_by, where_clause)
    }
}

// ===========================================================================
// OLAP (Doris / StarRocks family over the MySQL wire protocol)
// ===========================================================================

/// OLAP dialect: MySQL syntax, duplicate-key table model on create
#[derive(Debug, Clone, Default)]
pub struct OlapDialect;

impl SqlDialect for OlapDialect {
    fn name(&self) -> &'static str {
        "OLAP"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Olap
    }

    fn quote_identifier(&self, name: &str) -> String {
        backtick(name)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn list_columns_sql(&self, table: &str) -> Result<String> {
        mysql_list_columns(table)
    }

    fn table_size_sql(&self, table: &str) -> Result<String> {
        mysql_table_size(table)
    }

    fn create_database_sql(&self, database: &str) -> Result<String> {
        validate_sql_identifier(database)?;
        Ok(format!("CREATE DATABASE IF NOT EXISTS {}", backtick(database)))
    }

    fn select_sql(
        &self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_select(MysqlQueryBuilder, table, columns, where_clause)
    }

    fn group_count_sql(
        &self,
        table: &str,
        group_by: &[&str],
        where_clause: Option<&str>,
    ) -> Result<String> {
        build_group_count(MysqlQueryBuilder, table, group_by, where_clause)
    }

    fn create_table_sql(&self, table: &str, columns: &[ColumnDef]) -> Result<String> {
        let Some(first) = columns.first() else {
            return Err(Error::schema(format!(
                "cannot create table {} without columns",
                table
            )));
        };
        let key = backtick(&first.name);
        let mut sql = format!("CREATE TABLE {} (", self.quote_table(table)?);
        write_column_defs(self, &mut sql, columns)?;
        let _ = write!(
            sql,
            ") DUPLICATE KEY({}) DISTRIBUTED BY HASH({}) BUCKETS AUTO",
            key, key
        );
        Ok(sql)
    }
}

/// Dialect for a backend family
pub fn dialect_for(db: DatabaseType) -> Box<dyn SqlDialect> {
    match db {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
        DatabaseType::Olap => Box::new(OlapDialect),
    }
}
