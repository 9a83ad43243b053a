//! Watch the library root and keep the store in step until Ctrl+C.

use anyhow::Result;
use sifter::ingest::Ingester;
use sifter::watch::WatchService;
use sifter::Config;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.library.log_level.as_str()),
    )
    .init();

    log::info!("Starting Sifter watcher");
    log::info!("Library root: {}", config.library_root().display());

    let ingester = Ingester::from_config(&config)?;
    ingester.store().db().migrate(Path::new("migrations")).await?;

    let service = WatchService::new(Arc::new(ingester), config.library_root(), config.watch.clone());
    let handle = service.start()?;

    log::info!("Watching for changes (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;
    handle.stop().await?;
    Ok(())
}
