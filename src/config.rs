use clap::Parser;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub backend: String, // "snowflake" or "duckdb"
    pub account: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    /// Path to the database file for the duckdb backend
    pub connection_string: Option<String>,
    pub pool_size: usize,
    /// The only tables the agent is allowed to touch
    pub include_tables: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub embedding_model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub step_timeout_secs: u64,
    pub retrieval_top_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub few_shots_path: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to the few-shot example file
    #[arg(long, value_name = "FILE")]
    pub few_shots: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-warehouse/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(few_shots) = &args.few_shots {
            config.few_shots_path = few_shots.clone();
        }

        // Warehouse credentials and the API key come from the process
        // environment and win over anything in the file
        config.apply_env_overrides(|name| std::env::var(name).ok());

        Ok(config)
    }

    /// Applies the well-known environment variables on top of the loaded
    /// config. The lookup is injected so tests don't have to mutate the
    /// process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("username") {
            self.warehouse.username = Some(v);
        }
        if let Some(v) = lookup("password") {
            self.warehouse.password = Some(v);
        }
        if let Some(v) = lookup("snowflake_account") {
            self.warehouse.account = Some(v);
        }
        if let Some(v) = lookup("database") {
            self.warehouse.database = Some(v);
        }
        if let Some(v) = lookup("schema") {
            self.warehouse.schema = Some(v);
        }
        if let Some(v) = lookup("warehouse") {
            self.warehouse.warehouse = Some(v);
        }
        if let Some(v) = lookup("role") {
            self.warehouse.role = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig {
                backend: "duckdb".to_string(),
                account: None,
                username: None,
                password: None,
                database: None,
                schema: None,
                warehouse: None,
                role: None,
                connection_string: Some("nl-warehouse.db".to_string()),
                pool_size: 5,
                include_tables: vec![
                    "census_data_zip_codes".to_string(),
                    "home_value_zillow_zip_codes".to_string(),
                ],
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                model: "gpt-4-1106-preview".to_string(),
                embedding_model: "text-embedding-ada-002".to_string(),
                api_key: None,
                api_url: None,
            },
            agent: AgentConfig {
                max_steps: 8,
                step_timeout_secs: 60,
                retrieval_top_k: 4,
            },
            few_shots_path: "few_shots.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = AppConfig::default();
        config.warehouse.username = Some("from_file".to_string());

        config.apply_env_overrides(|name| match name {
            "username" => Some("alice".to_string()),
            "snowflake_account" => Some("acme-eu1".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        });

        assert_eq!(config.warehouse.username.as_deref(), Some("alice"));
        assert_eq!(config.warehouse.account.as_deref(), Some("acme-eu1"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        // Untouched values keep their file defaults
        assert_eq!(config.warehouse.backend, "duckdb");
    }

    #[test]
    fn unknown_env_names_leave_config_alone() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|_| None);
        assert!(config.warehouse.username.is_none());
        assert_eq!(config.warehouse.include_tables.len(), 2);
    }
}
