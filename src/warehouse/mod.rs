pub mod duckdb;
pub mod snowflake;

use crate::config::WarehouseConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub enum WarehouseError {
    ConfigError(String),
    ConnectionError(String),
    QueryError(String),
    TableNotAllowed(String),
}

impl fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseError::ConfigError(msg) => write!(f, "Warehouse configuration error: {}", msg),
            WarehouseError::ConnectionError(msg) => {
                write!(f, "Warehouse connection error: {}", msg)
            }
            WarehouseError::QueryError(msg) => write!(f, "Warehouse query error: {}", msg),
            WarehouseError::TableNotAllowed(table) => {
                write!(f, "Table '{}' is not on the allowed table list", table)
            }
        }
    }
}

impl Error for WarehouseError {}

/// Result of one executed query: ordered column names plus rows of JSON
/// values.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Tables the agent may query.
    async fn list_tables(&self) -> Result<Vec<String>, WarehouseError>;

    /// Human-readable schema description for one table, suitable as planner
    /// context.
    async fn describe_table(&self, table: &str) -> Result<String, WarehouseError>;

    /// Runs one SQL statement and returns its result set.
    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError>;
}

/// Opens the configured warehouse backend.
pub fn open_warehouse(
    config: &WarehouseConfig,
) -> Result<Arc<dyn Warehouse + Send + Sync>, WarehouseError> {
    match config.backend.as_str() {
        "snowflake" => Ok(Arc::new(snowflake::SnowflakeWarehouse::new(config)?)),
        "duckdb" => Ok(Arc::new(duckdb::DuckDbWarehouse::new(config)?)),
        other => Err(WarehouseError::ConfigError(format!(
            "Unsupported warehouse backend: {}",
            other
        ))),
    }
}

/// Extracts the table names a query touches by scanning FROM/JOIN targets.
/// Schema qualifiers are dropped, subqueries are skipped.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let re = regex::Regex::new(r#"(?i)\b(?:from|join)\s+("?[A-Za-z_][A-Za-z0-9_.\"]*)"#)
        .expect("table reference pattern is valid");

    re.captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().replace('"', ""))
        .filter(|name| !name.is_empty())
        .map(|name| match name.rsplit('.').next() {
            Some(unqualified) => unqualified.to_string(),
            None => name,
        })
        .collect()
}

/// Rejects a query that references any table outside the allow-list.
pub fn ensure_query_allowed(sql: &str, allowed: &[String]) -> Result<(), WarehouseError> {
    for table in referenced_tables(sql) {
        if !is_table_allowed(&table, allowed) {
            return Err(WarehouseError::TableNotAllowed(table));
        }
    }
    Ok(())
}

pub fn is_table_allowed(table: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|t| t.eq_ignore_ascii_case(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec![
            "census_data_zip_codes".to_string(),
            "home_value_zillow_zip_codes".to_string(),
        ]
    }

    #[test]
    fn extracts_from_and_join_targets() {
        let sql = r#"SELECT a.zip FROM census_data_zip_codes a JOIN "home_value_zillow_zip_codes" b ON a.zip = b.zip"#;
        let tables = referenced_tables(sql);
        assert_eq!(
            tables,
            vec!["census_data_zip_codes", "home_value_zillow_zip_codes"]
        );
    }

    #[test]
    fn drops_schema_qualifiers() {
        let tables = referenced_tables("SELECT * FROM public.census_data_zip_codes");
        assert_eq!(tables, vec!["census_data_zip_codes"]);
    }

    #[test]
    fn allows_queries_on_listed_tables() {
        let sql = "SELECT COUNT(*) FROM census_data_zip_codes";
        assert!(ensure_query_allowed(sql, &allowed()).is_ok());
    }

    #[test]
    fn rejects_queries_on_unlisted_tables() {
        let sql = "SELECT * FROM secret_payroll";
        match ensure_query_allowed(sql, &allowed()) {
            Err(WarehouseError::TableNotAllowed(table)) => {
                assert_eq!(table, "secret_payroll");
            }
            other => panic!("expected TableNotAllowed, got {:?}", other),
        }
    }

    #[test]
    fn table_check_is_case_insensitive() {
        assert!(is_table_allowed("CENSUS_DATA_ZIP_CODES", &allowed()));
        assert!(!is_table_allowed("census", &allowed()));
    }
}
