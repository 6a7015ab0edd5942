use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use gated::Config;
use gated::Engine;
use gated::api;

/// BFT cloud gate bridge daemon
#[derive(Parser)]
#[command(name = "gated", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "gated.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("gated starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    // Create the engine and register configured integrations
    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config)?;
    let engine = Arc::new(engine);

    let engine_task = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                tracing::error!("Engine exited with error: {}", e);
            }
        }
    });

    // Start the HTTP status API if configured
    let mut api_shutdown = None;
    if let Some(api_config) = &config.api {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        api_shutdown = Some(shutdown_tx);

        let listen = api_config.listen.clone();
        let port = api_config.port;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(listen, port, engine, shutdown_rx).await {
                tracing::error!("HTTP API server error: {}", e);
            }
        });
    }

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Some(tx) = api_shutdown {
        tx.send(()).ok();
    }
    engine_task.abort();

    tracing::info!("gated shutdown complete");

    Ok(())
}
