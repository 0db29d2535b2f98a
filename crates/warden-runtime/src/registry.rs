//! Run status registry and audit journal.
//!
//! Each run gets a [`tokio::sync::watch`] channel holding its latest
//! [`RunSnapshot`].  The orchestrator task is the only writer; any number of
//! readers can poll [`RunRegistry::get`] or await a terminal status through
//! [`RunRegistry::watch`].
//!
//! `capacity` bounds both halves:
//!
//! | Store | Retention |
//! |-------|-----------|
//! | run snapshots | every run in flight, plus the `capacity` most recently registered finished runs |
//! | journal | the most recent `capacity` [`AuditLogEntry`] lines, oldest first |
//!
//! Finished runs beyond the bound are dropped, oldest registration first, as
//! soon as another run finishes.  Their journal lines outlive them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;
use warden_types::{AuditLogEntry, RunSnapshot};

/// Default number of finished runs and journal lines retained.
pub const DEFAULT_CAPACITY: usize = 256;

struct Tracked {
    seq: u64,
    tx: watch::Sender<RunSnapshot>,
}

#[derive(Default)]
struct Runs {
    next_seq: u64,
    by_id: HashMap<Uuid, Tracked>,
}

impl Runs {
    /// Drop the oldest finished runs until at most `capacity` remain besides
    /// those still in flight.
    fn evict_finished(&mut self, capacity: usize) {
        let mut finished: Vec<(u64, Uuid)> = self
            .by_id
            .iter()
            .filter(|(_, t)| t.tx.borrow().status.is_terminal())
            .map(|(id, t)| (t.seq, *id))
            .collect();
        if finished.len() <= capacity {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - capacity;
        for (_, run_id) in finished.into_iter().take(excess) {
            self.by_id.remove(&run_id);
            debug!(%run_id, "finished run archived out of the registry");
        }
    }
}

#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<Runs>>,
    journal: Arc<Mutex<VecDeque<AuditLogEntry>>>,
    capacity: usize,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: Arc::new(RwLock::new(Runs::default())),
            journal: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Start tracking `run_id` as pending.
    pub fn register(&self, run_id: Uuid) {
        let (tx, _) = watch::channel(RunSnapshot::pending(run_id));
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let seq = runs.next_seq;
        runs.next_seq += 1;
        runs.by_id.insert(run_id, Tracked { seq, tx });
    }

    /// Apply `f` to the run's snapshot.  Unknown runs are ignored.
    ///
    /// A terminal snapshot is frozen apart from a late anchor.
    pub fn update(&self, run_id: Uuid, f: impl FnOnce(&mut RunSnapshot)) {
        let mut finished = false;
        {
            let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(Tracked { tx, .. }) = runs.by_id.get(&run_id) {
                tx.send_modify(|snapshot| {
                    let frozen = snapshot.status.is_terminal().then(|| snapshot.clone());
                    f(snapshot);
                    if let Some(previous) = frozen {
                        let anchor = snapshot.anchor.take();
                        *snapshot = previous;
                        if snapshot.anchor.is_none() {
                            snapshot.anchor = anchor;
                        }
                    } else {
                        finished = snapshot.status.is_terminal();
                    }
                    snapshot.updated_at = Utc::now();
                });
            }
        }
        if finished {
            self.runs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .evict_finished(self.capacity);
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&run_id)
            .map(|t| t.tx.borrow().clone())
    }

    pub fn watch(&self, run_id: Uuid) -> Option<watch::Receiver<RunSnapshot>> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&run_id)
            .map(|t| t.tx.subscribe())
    }

    /// Every tracked run, most recently updated first.
    pub fn runs(&self) -> Vec<RunSnapshot> {
        let mut all: Vec<RunSnapshot> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .values()
            .map(|t| t.tx.borrow().clone())
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn record(&self, entry: AuditLogEntry) {
        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        if self.capacity == 0 {
            return;
        }
        while journal.len() >= self.capacity {
            journal.pop_front();
        }
        journal.push_back(entry);
    }

    pub fn journal(&self) -> Vec<AuditLogEntry> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
