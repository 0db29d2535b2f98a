//! Agent reputation – the only state shared across runs.
//!
//! A [`ReputationRecord`] is a pair of counters.  The score is derived from
//! the counters, never stored, so applying the same multiset of updates in
//! any order yields the same score.  Stores serialise writers behind a
//! single lock.
//!
//! The store is injected into the pipeline as a [`ReputationHandle`]; the
//! SQLite-backed ledger in `warden-memory` implements the same trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use warden_types::WardenError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub agreements: u64,
    pub disagreements: u64,
}

impl ReputationRecord {
    /// Laplace-smoothed agreement rate.  A fresh agent scores `0.5`.
    pub fn score(&self) -> f64 {
        (self.agreements as f64 + 1.0) / ((self.agreements + self.disagreements) as f64 + 2.0)
    }

    pub fn apply(&mut self, outcome: ReputationOutcome) {
        match outcome {
            ReputationOutcome::Agreed => self.agreements += 1,
            ReputationOutcome::Disagreed => self.disagreements += 1,
        }
    }
}

/// Whether an agent backed the winning action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationOutcome {
    Agreed,
    Disagreed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationUpdate {
    pub agent_id: String,
    pub outcome: ReputationOutcome,
}

impl ReputationUpdate {
    pub fn new(agent_id: impl Into<String>, outcome: ReputationOutcome) -> Self {
        Self {
            agent_id: agent_id.into(),
            outcome,
        }
    }
}

/// Injectable reputation persistence.
pub trait ReputationStore: Send + Sync {
    /// Current counters for `agent_id`; unknown agents get the default.
    fn get(&self, agent_id: &str) -> Result<ReputationRecord, WardenError>;

    /// Apply a batch of updates atomically.
    fn record(&self, updates: &[ReputationUpdate]) -> Result<(), WardenError>;

    /// Administrative reset of every record.
    fn reset(&self) -> Result<(), WardenError>;

    /// Every known agent with its counters, sorted by agent id.
    fn snapshot(&self) -> Result<Vec<(String, ReputationRecord)>, WardenError>;
}

pub type ReputationHandle = Arc<dyn ReputationStore>;

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryReputation {
    records: Mutex<HashMap<String, ReputationRecord>>,
}

impl InMemoryReputation {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ReputationRecord>>, WardenError> {
        self.records
            .lock()
            .map_err(|_| WardenError::Storage("reputation lock poisoned".to_string()))
    }
}

impl ReputationStore for InMemoryReputation {
    fn get(&self, agent_id: &str) -> Result<ReputationRecord, WardenError> {
        Ok(self.lock()?.get(agent_id).copied().unwrap_or_default())
    }

    fn record(&self, updates: &[ReputationUpdate]) -> Result<(), WardenError> {
        let mut records = self.lock()?;
        for update in updates {
            records
                .entry(update.agent_id.clone())
                .or_default()
                .apply(update.outcome);
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), WardenError> {
        self.lock()?.clear();
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(String, ReputationRecord)>, WardenError> {
        let mut all: Vec<_> = self
            .lock()?
            .iter()
            .map(|(id, r)| (id.clone(), *r))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_agent_scores_half() {
        let store = InMemoryReputation::new();
        assert_eq!(store.get("new").unwrap().score(), 0.5);
    }

    #[test]
    fn agreements_raise_score() {
        let store = InMemoryReputation::new();
        store
            .record(&[
                ReputationUpdate::new("a", ReputationOutcome::Agreed),
                ReputationUpdate::new("a", ReputationOutcome::Agreed),
                ReputationUpdate::new("b", ReputationOutcome::Disagreed),
            ])
            .unwrap();
        assert_eq!(store.get("a").unwrap().score(), 0.75);
        assert!((store.get("b").unwrap().score() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_everything() {
        let store = InMemoryReputation::new();
        store
            .record(&[ReputationUpdate::new("a", ReputationOutcome::Agreed)])
            .unwrap();
        store.reset().unwrap();
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn concurrent_updates_converge_regardless_of_order() {
        let batches: Vec<Vec<ReputationUpdate>> = (0..16)
            .map(|i| {
                vec![
                    ReputationUpdate::new(
                        "a",
                        if i % 3 == 0 {
                            ReputationOutcome::Disagreed
                        } else {
                            ReputationOutcome::Agreed
                        },
                    ),
                    ReputationUpdate::new("b", ReputationOutcome::Agreed),
                ]
            })
            .collect();

        let sequential = InMemoryReputation::new();
        for batch in batches.iter().rev() {
            sequential.record(batch).unwrap();
        }

        let shared: ReputationHandle = Arc::new(InMemoryReputation::new());
        let workers: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let store = Arc::clone(&shared);
                thread::spawn(move || store.record(&batch).unwrap())
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(shared.snapshot().unwrap(), sequential.snapshot().unwrap());
        assert_eq!(
            shared.get("a").unwrap().score(),
            sequential.get("a").unwrap().score()
        );
    }
}
