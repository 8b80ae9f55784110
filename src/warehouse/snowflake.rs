use crate::config::WarehouseConfig;
use crate::warehouse::{
    ensure_query_allowed, is_table_allowed, QueryResult, Warehouse, WarehouseError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Remote warehouse backend over Snowflake's session REST API: one
/// login-request to obtain a session token, then query-request calls
/// authenticated with it.
#[derive(Debug)]
pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    session_token: RwLock<Option<String>>,
    include_tables: Vec<String>,
}

#[derive(Debug)]
struct Credentials {
    account: String,
    username: String,
    password: String,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest {
    data: LoginData,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData {
    login_name: String,
    password: String,
    account_name: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<LoginResponseData>,
}

#[derive(Deserialize)]
struct LoginResponseData {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    sql_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<QueryResponseData>,
}

#[derive(Deserialize)]
struct QueryResponseData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct RowType {
    name: String,
}

impl SnowflakeWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let account = require(&config.account, "snowflake_account")?;
        let username = require(&config.username, "username")?;
        let password = require(&config.password, "password")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        let base_url = format!("https://{}.snowflakecomputing.com", account);
        info!("Configured Snowflake warehouse at {}", base_url);

        Ok(Self {
            client,
            base_url,
            credentials: Credentials {
                account,
                username,
                password,
                database: config.database.clone(),
                schema: config.schema.clone(),
                warehouse: config.warehouse.clone(),
                role: config.role.clone(),
            },
            session_token: RwLock::new(None),
            include_tables: config.include_tables.clone(),
        })
    }

    async fn session_token(&self) -> Result<String, WarehouseError> {
        if let Some(token) = self.session_token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn login(&self) -> Result<String, WarehouseError> {
        debug!("Logging in to Snowflake as {}", self.credentials.username);

        let request = LoginRequest {
            data: LoginData {
                login_name: self.credentials.username.clone(),
                password: self.credentials.password.clone(),
                account_name: self.credentials.account.clone(),
            },
        };

        let response = self
            .client
            .post(format!("{}/session/v1/login-request", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WarehouseError::ConnectionError(format!(
                "Snowflake login responded with status code: {}",
                response.status()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        if !login.success {
            return Err(WarehouseError::ConnectionError(format!(
                "Snowflake login failed: {}",
                login.message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        let token = login
            .data
            .ok_or_else(|| {
                WarehouseError::ConnectionError("Snowflake login returned no token".to_string())
            })?
            .token;

        *self.session_token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let token = self.session_token().await?;

        let request = QueryRequest {
            sql_text: sql.to_string(),
            database: self.credentials.database.clone(),
            schema: self.credentials.schema.clone(),
            warehouse: self.credentials.warehouse.clone(),
            role: self.credentials.role.clone(),
        };

        let response = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .header("Authorization", format!("Snowflake Token=\"{}\"", token))
            .json(&request)
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Session expired, force a fresh login on the next call
            *self.session_token.write().await = None;
            return Err(WarehouseError::ConnectionError(
                "Snowflake session expired".to_string(),
            ));
        }

        if !status.is_success() {
            return Err(WarehouseError::QueryError(format!(
                "Snowflake responded with status code: {}",
                status
            )));
        }

        let query_response: QueryResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::QueryError(e.to_string()))?;

        if !query_response.success {
            return Err(WarehouseError::QueryError(format!(
                "Snowflake query failed: {}",
                query_response
                    .message
                    .unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        let data = query_response.data.ok_or_else(|| {
            WarehouseError::QueryError("Snowflake query returned no data".to_string())
        })?;

        Ok(QueryResult {
            columns: data.rowtype.into_iter().map(|c| c.name).collect(),
            rows: data.rowset,
        })
    }
}

fn require(value: &Option<String>, name: &str) -> Result<String, WarehouseError> {
    value.clone().ok_or_else(|| {
        WarehouseError::ConfigError(format!(
            "{} is required for the snowflake backend",
            name
        ))
    })
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn list_tables(&self) -> Result<Vec<String>, WarehouseError> {
        // The connection is restricted to the allow-list, so that is the
        // catalogue as far as the agent is concerned
        Ok(self.include_tables.clone())
    }

    async fn describe_table(&self, table: &str) -> Result<String, WarehouseError> {
        if !is_table_allowed(table, &self.include_tables) {
            return Err(WarehouseError::TableNotAllowed(table.to_string()));
        }

        let result = self
            .run_query(&format!("DESCRIBE TABLE {}", quote_identifier(table)))
            .await?;

        let mut description = format!("### Table: {}\n\n", table);
        description.push_str("| Column Name | Data Type |\n");
        description.push_str("|------------|-----------|\n");
        for row in &result.rows {
            let name = row.first().and_then(Value::as_str).unwrap_or("?");
            let data_type = row.get(1).and_then(Value::as_str).unwrap_or("?");
            description.push_str(&format!("| {} | {} |\n", name, data_type));
        }

        Ok(description)
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        ensure_query_allowed(sql, &self.include_tables)?;
        self.run_query(sql).await
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn missing_credentials_fail_construction() {
        let mut config = AppConfig::default().warehouse;
        config.backend = "snowflake".to_string();
        // No account/username/password set
        let err = SnowflakeWarehouse::new(&config).unwrap_err();
        assert!(matches!(err, WarehouseError::ConfigError(_)));
    }

    #[test]
    fn builds_account_base_url() {
        let mut config = AppConfig::default().warehouse;
        config.backend = "snowflake".to_string();
        config.account = Some("acme-eu1".to_string());
        config.username = Some("alice".to_string());
        config.password = Some("hunter2".to_string());

        let warehouse = SnowflakeWarehouse::new(&config).unwrap();
        assert_eq!(
            warehouse.base_url,
            "https://acme-eu1.snowflakecomputing.com"
        );
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("homes"), "\"homes\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
