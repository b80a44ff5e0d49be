//! Tests for polygate-rdbc dialects and the filter builder

use polygate_rdbc::prelude::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ==================== Placeholder & Quoting Tests ====================

#[test]
fn test_placeholders_per_dialect() {
    assert_eq!(PostgresDialect.placeholder(1), "$1");
    assert_eq!(PostgresDialect.placeholder(12), "$12");
    assert_eq!(MySqlDialect.placeholder(7), "?");
    assert_eq!(OlapDialect.placeholder(7), "?");
}

#[test]
fn test_identifier_quoting() {
    assert_eq!(PostgresDialect.quote_identifier("order"), "\"order\"");
    assert_eq!(MySqlDialect.quote_identifier("order"), "`order`");
    assert_eq!(
        PostgresDialect.quote_table("sales.orders").unwrap(),
        "\"sales\".\"orders\""
    );
}

#[test]
fn test_dialect_for() {
    assert_eq!(dialect_for(DatabaseType::PostgreSQL).name(), "PostgreSQL");
    assert_eq!(dialect_for(DatabaseType::MySQL).name(), "MySQL");
    assert_eq!(
        dialect_for(DatabaseType::Olap).database_type(),
        DatabaseType::Olap
    );
}

// ==================== INSERT Tests ====================

#[test]
fn test_insert_placeholder_count_matches_rows() {
    let sql = PostgresDialect
        .insert_sql("t", &["a", "b", "c"], 100)
        .unwrap();
    assert!(sql.contains("$300)"));
    assert!(!sql.contains("$301"));

    let sql = MySqlDialect.insert_sql("t", &["a", "b", "c"], 100).unwrap();
    assert_eq!(sql.matches('?').count(), 300);
}

// ==================== SELECT / COUNT Tests ====================

#[test]
fn test_select_all_columns() {
    let sql = MySqlDialect.select_sql("orders", &[], None).unwrap();
    assert_eq!(sql, "SELECT * FROM `orders`");
}

#[test]
fn test_select_with_where() {
    let sql = PostgresDialect
        .select_sql("orders", &["id", "total"], Some("\"id\" > $1"))
        .unwrap();
    assert!(sql.starts_with("SELECT \"id\", \"total\" FROM \"orders\""));
    assert!(sql.ends_with("WHERE \"id\" > $1"));
}

#[test]
fn test_count_sql() {
    assert_eq!(
        MySqlDialect.count_sql("orders", None).unwrap(),
        "SELECT COUNT(*) FROM `orders`"
    );
    assert_eq!(
        MySqlDialect.count_sql("orders", Some("`x` = ?")).unwrap(),
        "SELECT COUNT(*) FROM `orders` WHERE `x` = ?"
    );
}

#[test]
fn test_group_count_sql() {
    let sql = MySqlDialect
        .group_count_sql("orders", &["region", "status"], None)
        .unwrap();
    assert!(sql.contains("`region`, `status`, COUNT(*) AS `group_count`"));
    assert!(sql.ends_with("GROUP BY `region`, `status`"));

    assert!(MySqlDialect.group_count_sql("orders", &[], None).is_err());
}

// ==================== DDL Tests ====================

#[test]
fn test_create_table_validates_types() {
    let ok = MySqlDialect
        .create_table_sql(
            "t",
            &[ColumnDef::new("amount", "DECIMAL(38, 10)")],
        )
        .unwrap();
    assert_eq!(ok, "CREATE TABLE `t` (`amount` DECIMAL(38, 10))");

    let bad = MySqlDialect.create_table_sql("t", &[ColumnDef::new("a", "INT; DROP TABLE x")]);
    assert!(bad.is_err());
    assert!(MySqlDialect.create_table_sql("t", &[]).is_err());
}

#[test]
fn test_create_database_sql() {
    assert_eq!(
        MySqlDialect.create_database_sql("sales").unwrap(),
        "CREATE DATABASE IF NOT EXISTS `sales`"
    );
    assert_eq!(
        PostgresDialect.create_database_sql("sales").unwrap(),
        "CREATE SCHEMA IF NOT EXISTS \"sales\""
    );
}

#[test]
fn test_catalog_queries_escape_names() {
    let sql = PostgresDialect.list_columns_sql("sales.orders").unwrap();
    assert!(sql.contains("'sales'"));
    assert!(sql.contains("'orders'"));

    let sql = MySqlDialect.table_size_sql("orders").unwrap();
    assert!(sql.contains("DATABASE()"));
    assert!(MySqlDialect.table_size_sql("o'rders").is_err());
}

// ==================== Filter Tests ====================

#[test]
fn test_filter_operator_parse() {
    assert_eq!("=".parse::<FilterOperator>().unwrap(), FilterOperator::Eq);
    assert_eq!("!=".parse::<FilterOperator>().unwrap(), FilterOperator::Ne);
    assert_eq!("not   like".parse::<FilterOperator>().unwrap(), FilterOperator::NotLike);
    assert_eq!("is null".parse::<FilterOperator>().unwrap(), FilterOperator::IsNull);
    assert!("; DROP".parse::<FilterOperator>().is_err());
}

#[test]
fn test_filters_from_parallel_arrays() {
    let filters = Filter::from_parallel(
        &strings(&["region", "deleted_at"]),
        &strings(&["=", "IS NULL"]),
        &strings(&["emea", ""]),
    )
    .unwrap();

    assert_eq!(filters.len(), 2);
    assert_eq!(filters[0].value, Value::String("emea".into()));
    assert_eq!(filters[1].operator, FilterOperator::IsNull);
}

#[test]
fn test_filters_length_mismatch_is_structural() {
    let err = Filter::from_parallel(
        &strings(&["a", "b"]),
        &strings(&["="]),
        &strings(&["1", "2"]),
    )
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Structural);
}

#[test]
fn test_filters_reject_bad_column() {
    let err = Filter::from_parallel(&strings(&["a b"]), &strings(&["="]), &strings(&["1"]))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Structural);
}

#[test]
fn test_where_clause_numbering() {
    let filters = Filter::from_parallel(
        &strings(&["a", "b", "c"]),
        &strings(&[">", "IS NOT NULL", "LIKE"]),
        &strings(&["1", "", "x%"]),
    )
    .unwrap();

    let (clause, params) = PostgresDialect.where_clause(&filters, 1).unwrap().unwrap();
    assert_eq!(clause, "\"a\" > $1 AND \"b\" IS NOT NULL AND \"c\" LIKE $2");
    assert_eq!(params.len(), 2);

    let (clause, _) = MySqlDialect.where_clause(&filters, 1).unwrap().unwrap();
    assert_eq!(clause, "`a` > ? AND `b` IS NOT NULL AND `c` LIKE ?");

    assert!(MySqlDialect.where_clause(&[], 1).unwrap().is_none());
}
