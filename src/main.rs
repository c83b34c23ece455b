//! Storyweave - interactive story server
//!
//! Main entry point: loads configuration, wires storage, registry,
//! backend, and orchestrator together, and serves the HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use storyweave::backend::OllamaBackend;
use storyweave::cli::Cli;
use storyweave::config::Config;
use storyweave::orchestrator::TurnOrchestrator;
use storyweave::registry::SessionRegistry;
use storyweave::server::{self, AppState};
use storyweave::storage::SqliteStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first so --verbose can widen the filter
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    // If the user supplied a database path on the CLI, mirror it into
    // STORYWEAVE_DB so the storage initializer picks it up.
    if let Some(db_path) = &cli.db_path {
        std::env::set_var("STORYWEAVE_DB", db_path);
        tracing::info!("Using session DB override from CLI: {}", db_path);
    }

    // Load and validate configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    let storage = Arc::new(SqliteStorage::new()?);
    let registry = SessionRegistry::new(config.story.max_resident_sessions);
    let backend = Arc::new(OllamaBackend::new(config.ollama.clone())?);
    let orchestrator = Arc::new(TurnOrchestrator::new(backend, registry, storage));

    let state = AppState {
        orchestrator,
        web_dir: config.server.web_dir.clone().into(),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    tracing::info!(
        "Storyweave listening on http://{} (model: {})",
        config.server.listen_addr,
        config.ollama.model
    );

    axum::serve(listener, app)
        .await
        .context("Server terminated with error")
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "storyweave=debug"
    } else {
        "storyweave=info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
