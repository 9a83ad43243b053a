use anyhow::Result;
use clap::Parser;
use sifter::ingest::{discover_files, IngestStatus, Ingester};
use sifter::Config;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest library documents (incremental by default)")]
struct Args {
    /// Re-segment every document even when its hashes match
    #[arg(short, long)]
    force: bool,

    /// Soft-delete documents whose files no longer exist
    #[arg(short, long)]
    reconcile: bool,

    /// Only ingest files whose relative path starts with this prefix
    path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.library.log_level.as_str()),
    )
    .init();

    log::info!("Starting Sifter ingestion");
    log::info!("Library root: {}", config.library_root().display());
    log::info!("Database path: {}", config.db_path().display());

    let ingester = Ingester::from_config(&config)?;
    ingester.store().db().migrate(Path::new("migrations")).await?;

    let root = config.library_root();
    let files = discover_files(root)?;
    log::info!("Found {} documents", files.len());

    let selected: Vec<_> = files
        .iter()
        .filter(|f| args.path.as_deref().map_or(true, |p| f.relative_path.starts_with(p)))
        .collect();
    if selected.is_empty() {
        log::warn!("No documents to ingest. Check library.root in config.toml.");
    }

    let start = Instant::now();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let total = selected.len();
    for (idx, file) in selected.iter().enumerate() {
        match ingester.ingest_file(root, &file.absolute_path, args.force).await {
            Ok(report) => {
                *counts.entry(format!("{:?}", report.status)).or_default() += 1;
                match report.status {
                    IngestStatus::Unchanged => log::debug!("[{}/{}] {} unchanged", idx + 1, total, report.path),
                    IngestStatus::Error => log::error!(
                        "[{}/{}] ✗ {}: {}",
                        idx + 1,
                        total,
                        report.path,
                        report.error.as_deref().unwrap_or("rejected")
                    ),
                    status => log::info!(
                        "[{}/{}] ✓ {} {:?} (+{} ={} -{})",
                        idx + 1,
                        total,
                        report.path,
                        status,
                        report.paragraphs_inserted,
                        report.paragraphs_reused,
                        report.paragraphs_deleted
                    ),
                }
            }
            Err(e) => {
                *counts.entry("Failed".to_string()).or_default() += 1;
                log::error!("[{}/{}] ✗ {}: {}", idx + 1, total, file.relative_path, e);
            }
        }
    }

    if args.reconcile {
        let on_disk: HashSet<String> = files.iter().map(|f| f.relative_path.clone()).collect();
        let removed = ingester.reconcile(&on_disk).await?;
        log::info!("Removed {} documents no longer on disk", removed.len());
    }

    log::info!("=== Ingestion Complete ===");
    for (status, count) in &counts {
        log::info!("{}: {}", status, count);
    }
    log::info!("Time: {:?}", start.elapsed());

    let stats = ingester.store().stats().await?;
    if stats.failures > 0 {
        log::warn!("{} documents have recorded failures; run `sifter failures`", stats.failures);
    }

    Ok(())
}
