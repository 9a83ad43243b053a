use anyhow::Result;
use clap::Parser;
use sifter::cache::EmbeddingCache;
use sifter::db::Db;
use sifter::embeddings::EmbeddingWorker;
use sifter::{oracle, Config};
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "embed")]
#[command(about = "Generate embeddings for paragraphs flagged as needing one")]
struct Args {
    /// Paragraphs fetched per round
    #[arg(long, default_value = "256")]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.library.log_level.as_str()),
    )
    .init();

    let Some(settings) = config.embeddings.as_ref() else {
        anyhow::bail!("No [embeddings] section in config.toml");
    };

    log::info!("Starting Sifter embedding generation");
    log::info!("Embedder: model={}, batch_size={}", settings.model, settings.batch_size);

    let db = Db::new(config.db_path());
    db.migrate(Path::new("migrations")).await?;

    let embedder = oracle::embedder(settings)?;
    let cache = Arc::new(EmbeddingCache::new(settings.cache_capacity));
    let worker = EmbeddingWorker::new(db, embedder, cache, settings.batch_size);

    let run = worker.run_until_idle(args.limit.max(1)).await?;
    log::info!("=== Embedding Complete ===");
    log::info!("Reused from store: {}", run.reused);
    log::info!("Served from cache: {}", run.cached);
    log::info!("Embedded: {}", run.embedded);
    if run.failed > 0 {
        log::warn!("Failed: {} (they stay flagged for the next run)", run.failed);
    }

    Ok(())
}
