//! rill-node - live media relay
//!
//! Configuration comes from `RILL_CONFIG` (JSON file) and `RILL_*`
//! environment variables. Stops on SIGINT or SIGTERM.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use rill_core::RillResult;
use rill_runtime::{init_logging, RelayServer, RillConfig, SessionManager};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "rill-node failed");
        eprintln!("rill-node: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> RillResult<()> {
    let config = RillConfig::from_env()?;
    init_logging(config.server.json_logs)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting rill-node");

    let manager = Arc::new(SessionManager::new(config)?);
    let server = RelayServer::bind(manager).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => error!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received SIGINT, shutting down");
    }
}
