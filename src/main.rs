//! Realmsync Server
//!
//! Runs the avatar replication world. The transport attaches to the session
//! registry; this binary owns configuration, logging and the tick loop.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use realmsync::config::ServerConfig;
use realmsync::state::AppState;
use realmsync::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = ServerConfig::load().await?;

    // Initialize logging
    init_logging(&config);

    info!("Realmsync Server v{}", VERSION);
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone())?);
    info!("Application state initialized");

    // Start the replication world
    let world = Arc::clone(&state.world);
    let mut world_shutdown_rx = shutdown_tx.subscribe();
    let world_handle = tokio::spawn(async move {
        world.run(&mut world_shutdown_rx).await;
    });

    info!(world = %config.world_name, "Server startup complete!");

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    if let Err(e) = world_handle.await {
        error!("World task failed: {}", e);
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(config: &ServerConfig) {
    let default_directive = if config.debug {
        "info,realmsync=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
