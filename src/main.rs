use anyhow::Context;
use relay_data::{DataEngine, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;

fn data_root() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("RELAY_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let root = data_root();
    std::fs::create_dir_all(&root).with_context(|| format!("creating data root {}", root.display()))?;
    relay_data::init_tracing(&root).context("initializing logging")?;

    let engine = DataEngine::new(root, Arc::new(TracingSink)).context("opening data root")?;
    let report = engine.start().await.context("starting data engine")?;
    tracing::info!(
        migrated = ?report.migrated,
        failed = report.failed.len(),
        "startup complete"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    engine.shutdown();
    Ok(())
}
