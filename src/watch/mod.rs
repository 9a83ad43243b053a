//! Watch service: keeps the store in step with the library directory.
//!
//! A notify thread feeds file events into an async loop that coalesces them into
//! ingests, moves and removals, and periodically reconciles the whole tree.

pub mod coalescer;
mod watcher;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::error::{Result, SifterError};
use crate::ingest::{compute_body_hash, discover_files, relative_path, split_frontmatter, IngestRequest, Ingester};

pub use coalescer::{Coalescer, WatchAction};
pub use watcher::FsEvent;

const TICK: Duration = Duration::from_millis(250);

pub struct WatchService {
    ingester: Arc<Ingester>,
    root: PathBuf,
    config: WatchConfig,
}

/// Running watch service; dropping it without `stop` leaves the task running
pub struct WatchHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Signal the loop to exit and wait for it
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| SifterError::Config(format!("watch task failed: {}", e)))
    }
}

fn is_hidden(relative: &str) -> bool {
    relative.split('/').any(|part| part.starts_with('.'))
}

impl WatchService {
    pub fn new(ingester: Arc<Ingester>, root: impl Into<PathBuf>, config: WatchConfig) -> Self {
        Self {
            ingester,
            root: root.into(),
            config,
        }
    }

    /// Start the notify thread and the coalescing loop
    pub fn start(self) -> Result<WatchHandle> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        watcher::spawn_watcher_thread(&self.root, event_tx)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        log::info!("Watching {}", self.root.display());
        let task = tokio::spawn(self.run(event_rx, shutdown_rx));
        Ok(WatchHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(self, mut events: mpsc::UnboundedReceiver<FsEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut coalescer = Coalescer::new(
            Duration::from_millis(self.config.add_window_ms),
            Duration::from_secs(self.config.delete_window_secs),
        );
        let mut tick = tokio::time::interval(TICK);
        let mut reconcile = tokio::time::interval(Duration::from_secs(self.config.reconcile_interval_secs.max(1)));
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.on_event(&mut coalescer, event).await,
                    None => {
                        log::warn!("Watcher thread stopped");
                        break;
                    }
                },
                _ = tick.tick() => self.flush(&mut coalescer, Instant::now()).await,
                _ = reconcile.tick() => self.reconcile().await,
            }
        }
        log::info!("Watch service stopped");
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = relative_path(&self.root, path).ok()?;
        (!is_hidden(&relative)).then_some(relative)
    }

    async fn on_event(&self, coalescer: &mut Coalescer, event: FsEvent) {
        match event {
            FsEvent::Changed(path) => {
                if let Some(relative) = self.relative(&path) {
                    coalescer.add(&relative, Instant::now());
                }
            }
            FsEvent::Removed(path) => {
                let Some(relative) = self.relative(&path) else {
                    return;
                };
                let body_hash = match self.ingester.store().document_by_path(&relative).await {
                    Ok(doc) => doc.map(|d| d.body_hash),
                    Err(e) => {
                        log::error!("watch: lookup of {} failed: {}", relative, e);
                        None
                    }
                };
                coalescer.delete(&relative, body_hash, Instant::now());
            }
        }
    }

    /// Apply ready add batches and expired deletes
    async fn flush(&self, coalescer: &mut Coalescer, now: Instant) {
        let ready = coalescer.ready_adds(now);
        if !ready.is_empty() {
            let mut contents: HashMap<String, String> = HashMap::new();
            let mut hashed = Vec::with_capacity(ready.len());
            for relative in ready {
                match tokio::fs::read_to_string(self.root.join(&relative)).await {
                    Ok(raw) => {
                        let (_, body) = split_frontmatter(&raw);
                        hashed.push((relative.clone(), Some(compute_body_hash(body))));
                        contents.insert(relative, raw);
                    }
                    // gone again; its delete event is on the way
                    Err(e) => log::debug!("watch: skipping {}: {}", relative, e),
                }
            }

            for action in coalescer.match_adds(hashed) {
                let result = match action {
                    WatchAction::Ingest { path } => {
                        let raw = contents.remove(&path).unwrap_or_default();
                        self.ingester.ingest(IngestRequest::new(path, raw)).await
                    }
                    WatchAction::Move { from, to } => {
                        let raw = contents.remove(&to).unwrap_or_default();
                        log::info!("watch: move {} -> {}", from, to);
                        self.ingester.move_document(&from, IngestRequest::new(to, raw)).await
                    }
                };
                match result {
                    Ok(report) => log::debug!("watch: {} {:?}", report.path, report.status),
                    Err(e) => log::error!("watch: ingest failed: {}", e),
                }
            }
        }

        for relative in coalescer.expired_deletes(now) {
            // the file may have come back under the same name without an event
            let absolute = self.root.join(&relative);
            let result = if absolute.is_file() {
                self.ingester.ingest_file(&self.root, &absolute, false).await
            } else {
                self.ingester.remove(&relative).await
            };
            if let Err(e) = result {
                log::error!("watch: handling removal of {} failed: {}", relative, e);
            }
        }
    }

    async fn reconcile(&self) {
        let files = match discover_files(&self.root) {
            Ok(files) => files,
            Err(e) => {
                log::error!("watch: cannot scan {}: {}", self.root.display(), e);
                return;
            }
        };
        let on_disk: HashSet<String> = files.into_iter().map(|f| f.relative_path).collect();
        if let Err(e) = self.ingester.reconcile(&on_disk).await {
            log::error!("watch: reconciliation failed: {}", e);
        }
        if let Err(e) = self.ingester.purge_expired(Utc::now()).await {
            log::error!("watch: purge failed: {}", e);
        }
    }
}
