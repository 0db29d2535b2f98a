//! [`ShardVault`] – storage for a run's shards and sub-agent outputs.
//!
//! A wipe is two steps: the run is tombstoned first, so no late write can
//! land, then every shard and output is deleted.  [`ShardVault::retained`]
//! lets the orchestrator verify that nothing survived.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_types::{AgentOutput, Shard, WardenError};

/// What a discard pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardReport {
    pub shards_discarded: usize,
    pub outputs_discarded: usize,
}

pub trait ShardVault: Send + Sync {
    /// # Errors
    ///
    /// [`WardenError::Wiped`] once the shard's run is tombstoned.
    fn put_shard(&self, shard: &Shard) -> Result<(), WardenError>;

    /// # Errors
    ///
    /// [`WardenError::Wiped`] once `run_id` is tombstoned.
    fn put_output(&self, run_id: Uuid, output: &AgentOutput) -> Result<(), WardenError>;

    fn outputs(&self, run_id: Uuid) -> Result<Vec<AgentOutput>, WardenError>;

    /// Tombstone `run_id`, then delete everything stored for it.
    fn discard(&self, run_id: Uuid) -> Result<DiscardReport, WardenError>;

    /// Count of shards plus outputs still stored for `run_id`.
    fn retained(&self, run_id: Uuid) -> Result<usize, WardenError>;

    fn is_tombstoned(&self, run_id: Uuid) -> Result<bool, WardenError>;

    /// Drop a finished run's data without tombstoning it.
    fn release(&self, run_id: Uuid) -> Result<(), WardenError>;
}

#[derive(Default)]
struct VaultState {
    shards: HashMap<Uuid, Vec<Shard>>,
    outputs: HashMap<Uuid, Vec<AgentOutput>>,
    tombstones: HashSet<Uuid>,
}

/// Process-local vault.
#[derive(Default)]
pub struct InMemoryShardVault {
    state: Mutex<VaultState>,
}

impl InMemoryShardVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, VaultState>, WardenError> {
        self.state
            .lock()
            .map_err(|_| WardenError::Storage("shard vault lock poisoned".to_string()))
    }
}

impl ShardVault for InMemoryShardVault {
    fn put_shard(&self, shard: &Shard) -> Result<(), WardenError> {
        let mut state = self.lock()?;
        if state.tombstones.contains(&shard.run_id) {
            return Err(WardenError::Wiped {
                run_id: shard.run_id,
            });
        }
        state
            .shards
            .entry(shard.run_id)
            .or_default()
            .push(shard.clone());
        Ok(())
    }

    fn put_output(&self, run_id: Uuid, output: &AgentOutput) -> Result<(), WardenError> {
        let mut state = self.lock()?;
        if state.tombstones.contains(&run_id) {
            return Err(WardenError::Wiped { run_id });
        }
        state.outputs.entry(run_id).or_default().push(output.clone());
        Ok(())
    }

    fn outputs(&self, run_id: Uuid) -> Result<Vec<AgentOutput>, WardenError> {
        Ok(self
            .lock()?
            .outputs
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    fn discard(&self, run_id: Uuid) -> Result<DiscardReport, WardenError> {
        let mut state = self.lock()?;
        state.tombstones.insert(run_id);
        let shards_discarded = state.shards.remove(&run_id).map_or(0, |s| s.len());
        let outputs_discarded = state.outputs.remove(&run_id).map_or(0, |o| o.len());
        Ok(DiscardReport {
            shards_discarded,
            outputs_discarded,
        })
    }

    fn retained(&self, run_id: Uuid) -> Result<usize, WardenError> {
        let state = self.lock()?;
        Ok(state.shards.get(&run_id).map_or(0, Vec::len)
            + state.outputs.get(&run_id).map_or(0, Vec::len))
    }

    fn is_tombstoned(&self, run_id: Uuid) -> Result<bool, WardenError> {
        Ok(self.lock()?.tombstones.contains(&run_id))
    }

    fn release(&self, run_id: Uuid) -> Result<(), WardenError> {
        let mut state = self.lock()?;
        state.shards.remove(&run_id);
        state.outputs.remove(&run_id);
        Ok(())
    }
}
