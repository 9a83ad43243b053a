//! Move detection over raw file events.
//!
//! Adds are collected into short batches; deletes wait in a longer queue keyed by the
//! stored body hash. An added file whose body hash matches a waiting delete turns the
//! pair into a move. Deletes nobody claims expire into removals.
//!
//! Time is passed in by the caller so the windows can be driven deterministically.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Ingest { path: String },
    Move { from: String, to: String },
}

#[derive(Debug, Clone)]
struct PendingDelete {
    path: String,
    body_hash: Option<String>,
    at: Instant,
}

#[derive(Debug)]
pub struct Coalescer {
    add_window: Duration,
    delete_window: Duration,
    adds: BTreeMap<String, Instant>,
    batch_started: Option<Instant>,
    deletes: Vec<PendingDelete>,
}

impl Coalescer {
    pub fn new(add_window: Duration, delete_window: Duration) -> Self {
        Self {
            add_window,
            delete_window,
            adds: BTreeMap::new(),
            batch_started: None,
            deletes: Vec::new(),
        }
    }

    /// A file was created or modified
    pub fn add(&mut self, path: &str, now: Instant) {
        // recreated in place: the earlier delete no longer applies
        self.deletes.retain(|d| d.path != path);
        self.adds.insert(path.to_string(), now);
        self.batch_started.get_or_insert(now);
    }

    /// A file disappeared. `body_hash` is the stored body hash, if the path was stored.
    pub fn delete(&mut self, path: &str, body_hash: Option<String>, now: Instant) {
        self.adds.remove(path);
        if self.adds.is_empty() {
            self.batch_started = None;
        }
        self.deletes.retain(|d| d.path != path);
        self.deletes.push(PendingDelete {
            path: path.to_string(),
            body_hash,
            at: now,
        });
    }

    /// Paths of the current add batch once its window has passed
    pub fn ready_adds(&mut self, now: Instant) -> Vec<String> {
        match self.batch_started {
            Some(started) if now.duration_since(started) >= self.add_window => {
                self.batch_started = None;
                std::mem::take(&mut self.adds).into_keys().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Pair a batch of added files (with their body hashes) against waiting deletes
    pub fn match_adds(&mut self, adds: Vec<(String, Option<String>)>) -> Vec<WatchAction> {
        let mut actions = Vec::with_capacity(adds.len());
        for (path, body_hash) in adds {
            let claimed = body_hash.as_ref().and_then(|hash| {
                self.deletes
                    .iter()
                    .position(|d| d.body_hash.as_ref() == Some(hash))
            });
            match claimed {
                Some(index) => {
                    let delete = self.deletes.remove(index);
                    actions.push(WatchAction::Move { from: delete.path, to: path });
                }
                None => actions.push(WatchAction::Ingest { path }),
            }
        }
        actions
    }

    /// Deletes whose window has passed without a matching add
    pub fn expired_deletes(&mut self, now: Instant) -> Vec<String> {
        let window = self.delete_window;
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deletes)
            .into_iter()
            .partition(|d| now.duration_since(d.at) >= window);
        self.deletes = waiting;
        expired.into_iter().map(|d| d.path).collect()
    }

    pub fn pending_deletes(&self) -> usize {
        self.deletes.len()
    }

    pub fn is_idle(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }
}
