use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

mod agent;
mod config;
mod envelope;
mod llm;
mod render;
mod retrieval;
mod util;
mod warehouse;
mod web;

use crate::agent::tools::build_toolkit;
use crate::agent::SqlAgent;
use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::retrieval::{load_few_shots, ExampleIndex};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Load the few-shot examples; a missing or malformed file is fatal
    info!("Loading few-shot examples from {}", config.few_shots_path);
    let examples = load_few_shots(Path::new(&config.few_shots_path))?;
    let example_count = examples.len();
    info!("Loaded {} few-shot example(s)", example_count);

    // Initialize the LLM manager
    info!("Initializing LLM manager with model: {}", config.llm.model);
    let llm = Arc::new(LlmManager::new(&config.llm)?);

    // Build the similarity index over the example questions
    info!("Building example index");
    let index = Arc::new(ExampleIndex::build(&llm, examples).await?);

    // Open the warehouse
    info!(
        "Opening warehouse with backend: {}",
        config.warehouse.backend
    );
    let warehouse = warehouse::open_warehouse(&config.warehouse)?;

    // Assemble the agent: toolkit plus the planning loop
    let toolkit = build_toolkit(
        llm.clone(),
        index,
        warehouse.clone(),
        config.agent.retrieval_top_k,
    );
    let agent = SqlAgent::new(llm, toolkit, &config.agent);

    // Create application state
    let app_state = Arc::new(AppState::new(
        config.clone(),
        agent,
        warehouse,
        example_count,
    ));

    // Start the web server
    info!(
        "Starting NL-Warehouse server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.to_string().into());
        }
    }

    Ok(())
}
