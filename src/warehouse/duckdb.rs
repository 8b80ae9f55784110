use crate::config::WarehouseConfig;
use crate::warehouse::{
    ensure_query_allowed, is_table_allowed, QueryResult, Warehouse, WarehouseError,
};
use async_trait::async_trait;
use duckdb::types::ValueRef;
use duckdb::Connection;
use r2d2::{ManageConnection, Pool};
use serde_json::{json, Value};
use tracing::info;

pub struct DuckDbConnectionManager {
    connection_string: String,
}

impl DuckDbConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDbConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Connection::open(&self.connection_string)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Local warehouse backend over an embedded DuckDB file. Used for runs and
/// tests that don't have Snowflake credentials.
pub struct DuckDbWarehouse {
    pool: Pool<DuckDbConnectionManager>,
    include_tables: Vec<String>,
}

impl DuckDbWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let connection_string = config.connection_string.clone().ok_or_else(|| {
            WarehouseError::ConfigError(
                "connection_string is required for the duckdb backend".to_string(),
            )
        })?;

        info!("Opening DuckDB warehouse at {}", connection_string);
        let manager = DuckDbConnectionManager::new(connection_string);
        let pool = Pool::builder()
            .max_size(config.pool_size as u32)
            .build(manager)
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        Ok(Self {
            pool,
            include_tables: config.include_tables.clone(),
        })
    }

    fn value_from_ref(row: &duckdb::Row<'_>, idx: usize) -> Value {
        match row.get_ref(idx) {
            Ok(ValueRef::Null) => Value::Null,
            Ok(ValueRef::Boolean(b)) => Value::Bool(b),
            Ok(ValueRef::TinyInt(v)) => json!(v),
            Ok(ValueRef::SmallInt(v)) => json!(v),
            Ok(ValueRef::Int(v)) => json!(v),
            Ok(ValueRef::BigInt(v)) => json!(v),
            Ok(ValueRef::Float(v)) => json!(v),
            Ok(ValueRef::Double(v)) => json!(v),
            Ok(ValueRef::Text(bytes)) => Value::String(String::from_utf8_lossy(bytes).to_string()),
            // Dates, decimals and the rest go through DuckDB's string cast
            _ => match row.get::<_, String>(idx) {
                Ok(s) => Value::String(s),
                Err(_) => Value::Null,
            },
        }
    }

    fn run_query(
        pool: &Pool<DuckDbConnectionManager>,
        sql: &str,
    ) -> Result<QueryResult, WarehouseError> {
        let conn = pool
            .get()
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;

        let column_count = stmt.column_count();
        let mut columns = Vec::with_capacity(column_count);
        for i in 0..column_count {
            match stmt.column_name(i) {
                Ok(name) => columns.push(name.to_string()),
                Err(e) => return Err(WarehouseError::QueryError(e.to_string())),
            }
        }

        let mut rows_out: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;

        while let Some(row) = rows
            .next()
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?
        {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(Self::value_from_ref(row, i));
            }
            rows_out.push(values);
        }

        Ok(QueryResult {
            columns,
            rows: rows_out,
        })
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn list_tables(&self) -> Result<Vec<String>, WarehouseError> {
        let pool = self.pool.clone();
        let include_tables = self.include_tables.clone();

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' \
                     AND name NOT LIKE 'sqlite_%' AND name NOT LIKE 'duck_%' \
                     AND name NOT LIKE 'pg_%'",
                )
                .map_err(|e| WarehouseError::QueryError(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| WarehouseError::QueryError(e.to_string()))?;

            let tables = rows
                .filter_map(Result::ok)
                .filter(|table| is_table_allowed(table, &include_tables))
                .collect();

            Ok(tables)
        })
        .await
        .map_err(|e| WarehouseError::QueryError(e.to_string()))?
    }

    async fn describe_table(&self, table: &str) -> Result<String, WarehouseError> {
        if !is_table_allowed(table, &self.include_tables) {
            return Err(WarehouseError::TableNotAllowed(table.to_string()));
        }

        let pool = self.pool.clone();
        let table = table.to_string();

        tokio::task::spawn_blocking(move || {
            let mut description = format!("### Table: {}\n\n", table);

            let columns = Self::run_query(&pool, &format!("PRAGMA table_info(\"{}\")", table))?;
            description.push_str("| Column Name | Data Type | Nullable |\n");
            description.push_str("|------------|-----------|----------|\n");
            for row in &columns.rows {
                let name = row.get(1).and_then(Value::as_str).unwrap_or("?");
                let data_type = row.get(2).and_then(Value::as_str).unwrap_or("?");
                let not_null = row.get(3).and_then(Value::as_bool).unwrap_or(false);
                description.push_str(&format!(
                    "| {} | {} | {} |\n",
                    name,
                    data_type,
                    if not_null { "NO" } else { "YES" }
                ));
            }

            // One sample row gives the planner a feel for the data
            let sample = Self::run_query(&pool, &format!("SELECT * FROM \"{}\" LIMIT 1", table))?;
            if !sample.rows.is_empty() {
                description.push_str("\n#### Sample Data:\n\n");
                description.push_str(&format!("| {} |\n", sample.columns.join(" | ")));
                for row in &sample.rows {
                    let cells: Vec<String> = row.iter().map(render_cell).collect();
                    description.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
            }

            Ok(description)
        })
        .await
        .map_err(|e| WarehouseError::QueryError(e.to_string()))?
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        ensure_query_allowed(sql, &self.include_tables)?;

        let pool = self.pool.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || Self::run_query(&pool, &sql))
            .await
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_warehouse(include_tables: Vec<String>) -> DuckDbWarehouse {
        let mut config = AppConfig::default().warehouse;
        config.connection_string = Some(":memory:".to_string());
        config.pool_size = 1;
        config.include_tables = include_tables;
        DuckDbWarehouse::new(&config).unwrap()
    }

    #[tokio::test]
    async fn executes_a_query_and_returns_typed_rows() {
        let warehouse = test_warehouse(vec!["homes".to_string()]);

        {
            let conn = warehouse.pool.get().unwrap();
            conn.execute_batch(
                "CREATE TABLE homes (city VARCHAR, price DOUBLE); \
                 INSERT INTO homes VALUES ('Austin', 450000.0), ('Boise', 380000.0);",
            )
            .unwrap();
        }

        let result = warehouse
            .execute("SELECT city, price FROM homes ORDER BY price")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["city", "price"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], Value::String("Boise".to_string()));
        assert_eq!(result.rows[0][1], json!(380000.0));
    }

    #[tokio::test]
    async fn rejects_tables_outside_the_allow_list() {
        let warehouse = test_warehouse(vec!["homes".to_string()]);

        let err = warehouse
            .execute("SELECT * FROM payroll")
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::TableNotAllowed(table) if table == "payroll"));
    }

    #[tokio::test]
    async fn describe_table_reports_columns() {
        let warehouse = test_warehouse(vec!["homes".to_string()]);

        {
            let conn = warehouse.pool.get().unwrap();
            conn.execute_batch("CREATE TABLE homes (city VARCHAR, price DOUBLE);")
                .unwrap();
        }

        let description = warehouse.describe_table("homes").await.unwrap();
        assert!(description.contains("### Table: homes"));
        assert!(description.contains("city"));
        assert!(description.contains("price"));
    }
}
