//! callscoped - RTC notification reconciliation daemon.

use callscope::config::Config;
use callscope::db::Database;
use callscope::engine::Engine;
use callscope::http::{self, AppState};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    // Canonicalize to avoid relying on the current working directory.
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format).
    // A missing config file is fine; every section has defaults.
    let config_path = resolve_config_path();
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
            e
        })?
    } else {
        eprintln!("No config file at {}, using defaults", config_path);
        Config::default()
    };

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        callscope::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        callscope::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = callscope::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(server = %config.server.name, "Starting callscoped");

    if config.security.webhook_secret.is_none() {
        tracing::warn!("No webhook secret configured, signature verification disabled");
    }

    callscope::metrics::init();

    let db = Database::new(&config.database.path).await?;
    let engine = Engine::new(db, config.ingest.clone());

    let state = Arc::new(AppState { engine, config });
    http::serve(state).await
}
