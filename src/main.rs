use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use tracing::{error, info, warn};

mod catalog;
mod config;
mod db;
mod llm;
mod pipeline;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::duckdb_database::DuckDbDatabase;
use crate::llm::LlmManager;
use crate::pipeline::NlPipeline;
use crate::pipeline::conversation::ConversationHistory;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Initializing DuckDB connection pool for {}",
        config.database.connection_string
    );
    let db_manager = DuckDBConnectionManager::new(config.database.connection_string.clone())?;
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;
    let database = Arc::new(DuckDbDatabase::new(pool));

    // Warm the column cache; declared tables that do not exist are reported, not fatal
    info!("Initializing schema cache");
    match database
        .schema_manager()
        .refresh_cache(&config.catalog.tables())
        .await
    {
        Ok(missing) if !missing.is_empty() => warn!(
            "{} of {} declared tables are missing from the database",
            missing.len(),
            config.catalog.table_count()
        ),
        Ok(_) => {
            if let Some(at) = database.schema_manager().last_refresh().await {
                info!("Schema cache ready ({})", at.to_rfc3339());
            }
        }
        Err(e) => error!("Failed to initialize schema cache: {}", e),
    }

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;
    if llm_manager.embedder().is_none() {
        info!("No embedding model configured, table selection is disabled");
    }

    let pipeline = NlPipeline::new(
        llm_manager.chat(),
        llm_manager.embedder(),
        database,
        config.catalog.clone(),
        &config.pipeline,
    );

    if let Some(question) = &args.ask {
        let reply = pipeline.respond(&ConversationHistory::new(), question).await?;
        info!("Answer: {}", reply.message());
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let app_state = Arc::new(AppState::new(config.clone(), pipeline));

    // Start the web server
    info!("Starting nl-query server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
