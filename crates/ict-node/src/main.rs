//! ictd: run an Ict node from a JSON config file until Ctrl-C.

use anyhow::Context;
use ict_node::{Ict, NodeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file `{path}`"))?;
            serde_json::from_str::<NodeConfig>(&raw)
                .with_context(|| format!("failed to parse config file `{path}`"))?
        }
        None => {
            info!("no config file given, using defaults");
            NodeConfig::default()
        }
    };

    let ict = Ict::new(config).context("invalid configuration")?;
    ict.start().await.context("failed to start node")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    ict.terminate().await.context("failed to terminate node")?;
    Ok(())
}
