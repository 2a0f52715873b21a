//! schema-gate - Main entry point.
//!
//! Runs one parameterized statement through the connection cache and a
//! schema manager, printing the result as JSON.

use schema_gate::config::{Config, Credentials};
use schema_gate::db::{ConnectionCache, ManagerRegistry};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays parseable JSON
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let credentials = Credentials::from_file(&config.credentials)?;
    let cache = Arc::new(ConnectionCache::new(
        Arc::new(credentials),
        config.cache_options(),
    ));
    let registry = ManagerRegistry::new(cache);

    let manager = registry
        .instance(
            &config.schema,
            Some(&config.environment),
            config.critical,
            None,
        )
        .await?;
    let params = config.query_params()?;

    let output = if config.write {
        let result = manager.query_prepared(&config.sql, &params).await?;
        serde_json::to_value(result)?
    } else {
        let rows = manager.fetch_all(&config.sql, &params).await?;
        serde_json::to_value(rows)?
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        mode = %config.mode,
        schema = %config.schema,
        environment = %config.environment,
        "Starting schema-gate v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(&config).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Statement failed");
            Err(e)
        }
    }
}
