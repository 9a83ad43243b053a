//! Watcher thread: notify events translated into document changes and removals.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Result, SifterError};
use crate::ingest::is_document_path;

/// Document-level file event (absolute path)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

const POLL: Duration = Duration::from_millis(500);

/// Translate one notify event. A rename carrying both paths becomes a removal plus a
/// change, so it reaches the coalescer like any other move.
pub fn translate(event: &Event) -> Vec<FsEvent> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            out.push(FsEvent::Removed(event.paths[0].clone()));
            out.push(FsEvent::Changed(event.paths[1].clone()));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            out.extend(event.paths.iter().cloned().map(FsEvent::Removed));
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            for path in &event.paths {
                if path.exists() {
                    out.push(FsEvent::Changed(path.clone()));
                } else {
                    out.push(FsEvent::Removed(path.clone()));
                }
            }
        }
        EventKind::Create(_) | EventKind::Modify(_) => {
            out.extend(event.paths.iter().cloned().map(FsEvent::Changed));
        }
        _ => {}
    }
    out.retain(|e| match e {
        FsEvent::Changed(p) | FsEvent::Removed(p) => is_document_path(p),
    });
    out
}

/// Watch `root` on a dedicated thread and forward document events over `tx`.
///
/// The thread exits when the receiving side of `tx` is dropped or the watcher fails.
pub fn spawn_watcher_thread(root: &Path, tx: UnboundedSender<FsEvent>) -> Result<std::thread::JoinHandle<()>> {
    let (event_tx, event_rx) = mpsc::channel::<Event>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let _ = event_tx.send(event);
        }
        Err(e) => log::warn!("watch error: {}", e),
    })
    .map_err(|e| SifterError::Config(format!("cannot create watcher: {}", e)))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| SifterError::Config(format!("cannot watch {}: {}", root.display(), e)))?;

    let handle = std::thread::spawn(move || {
        // keep the watcher alive for the lifetime of the thread
        let _watcher = watcher;
        loop {
            match event_rx.recv_timeout(POLL) {
                Ok(event) => {
                    for fs_event in translate(&event) {
                        if tx.send(fs_event).is_err() {
                            return;
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        return;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    });
    Ok(handle)
}
