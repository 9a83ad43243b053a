use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sifter::db::Db;
use sifter::store::Store;
use sifter::Config;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "sifter")]
#[command(about = "Library store maintenance: migrations, statistics, failures and purging")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations (default)
    Migrate,
    /// Print store statistics as JSON
    Stats,
    /// List rejected ingestions
    Failures,
    /// Hard-delete rows soft-deleted longer than the retention period
    Purge,
    /// Print paragraphs the search index has not seen yet
    Sync {
        #[arg(long, default_value = "500")]
        limit: usize,

        /// Acknowledge the printed paragraphs as synced
        #[arg(long)]
        ack: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.library.log_level.as_str()),
    )
    .init();

    log::info!("Starting Sifter v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    db.migrate(Path::new("migrations")).await?;
    let store = Store::new(db, config.ingest.statement_batch_size);

    match args.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            log::info!("Database initialized successfully");
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Failures => {
            let failures = store.list_failures().await?;
            if failures.is_empty() {
                println!("No failures recorded.");
            }
            for failure in failures {
                println!(
                    "{}  {:<22} {}\n    {}",
                    failure.created_at, failure.error_type, failure.file_path, failure.message
                );
            }
        }
        Command::Purge => {
            let cutoff = Utc::now() - config.retention();
            let report = store.purge_deleted_before(cutoff).await?;
            log::info!(
                "Purged {} documents and {} paragraphs deleted before {}",
                report.documents,
                report.paragraphs,
                cutoff
            );
        }
        Command::Sync { limit, ack } => {
            let items = store.paragraphs_needing_sync(limit).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
            if ack {
                let marked = store.mark_synced(items.iter().map(|i| i.id).collect()).await?;
                log::info!("Marked {} paragraphs as synced", marked);
            }
        }
    }

    Ok(())
}
