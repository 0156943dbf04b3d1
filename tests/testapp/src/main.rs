use anyhow::{Context, Result};
use rejournal::{NodeConfig, RaftNode};
use testapp::CounterApp;
use tracing::info;

/// Runs one server of the counter app.
///
/// `testapp <config.json>` where the file holds a `NodeConfig`.
#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();

    let path = std::env::args().nth(1).context("usage: testapp <config.json>")?;
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let config: NodeConfig = serde_json::from_str(&text)?;
    info!("{config:?}");

    let _node = RaftNode::start(config, CounterApp::new()).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
