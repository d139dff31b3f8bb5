//! # QLight Loopback Node
//!
//! Runs a qlight server and client in one process over an in-memory pipe.
//! The server seals a block every few seconds; the client imports it along
//! with the private payloads of its privacy scope.
//!
//! ## Startup Sequence
//!
//! 1. Install the tracing subscriber (`RUST_LOG` aware)
//! 2. Load configuration (`QC_QLIGHT_CONFIG` or the first argument, else defaults)
//! 3. Start server and client handlers, connect them
//! 4. Produce blocks until Ctrl+C
//! 5. Stop the client, then the server

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use node_runtime::LoopbackNode;
use qc_05_qlight_protocol::QLightConfig;

const BLOCK_INTERVAL: Duration = Duration::from_secs(5);

/// Load configuration from the path in `QC_QLIGHT_CONFIG` or the first
/// command-line argument. Without either, defaults are used.
fn load_config() -> Result<QLightConfig> {
    let path = std::env::var("QC_QLIGHT_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));
    match path {
        Some(path) => {
            let config = QLightConfig::load(&path)
                .with_context(|| format!("Failed to load qlight config from {}", path))?;
            info!("Loaded configuration from {}", path);
            Ok(config)
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(QLightConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    info!("===========================================");
    info!("  QLight Loopback Node v{}", qc_05_qlight_protocol::VERSION);
    info!("  Network: {}", config.network_id);
    info!("===========================================");

    let node = LoopbackNode::new(config);
    node.start().context("Failed to start loopback node")?;

    info!("Node is running. Press Ctrl+C to stop.");
    let mut ticker = tokio::time::interval(BLOCK_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = ticker.tick() => {
                let block = node.produce_block();
                info!(number = block.number(), "Produced block");
            }
        }
    }

    info!("Initiating graceful shutdown...");
    node.stop().await;
    info!("Shutdown complete");
    Ok(())
}
