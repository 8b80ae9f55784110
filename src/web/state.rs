use crate::agent::SqlAgent;
use crate::config::AppConfig;
use crate::warehouse::Warehouse;
use crate::web::templates::init_templates;
use minijinja::Environment;
use std::sync::Arc;

/// Shared application state for the web server: the agent session, the
/// warehouse handle, and everything else a handler needs, constructed once
/// and passed explicitly.
pub struct AppState {
    pub config: AppConfig,
    pub agent: SqlAgent,
    pub warehouse: Arc<dyn Warehouse + Send + Sync>,
    pub template_env: Environment<'static>,
    pub example_count: usize,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        agent: SqlAgent,
        warehouse: Arc<dyn Warehouse + Send + Sync>,
        example_count: usize,
    ) -> Self {
        Self {
            config,
            agent,
            warehouse,
            template_env: init_templates(),
            example_count,
            startup_time: chrono::Utc::now(),
        }
    }
}
