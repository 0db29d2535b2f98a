//! [`ClearanceRegistry`] – which sub-agents may receive work at which risk.
//!
//! Every agent in the pool is granted a maximum [`CriticalityIndex`].  The
//! sharding engine only draws from agents cleared for the run's
//! classification, so a low-clearance agent never sees a fragment of a
//! high-risk task.

use std::collections::BTreeMap;

use warden_types::{CriticalityIndex, WardenError};

/// Maps agent ids to their highest cleared classification.
///
/// # Example
///
/// ```
/// use warden_kernel::clearance::ClearanceRegistry;
/// use warden_types::CriticalityIndex;
///
/// let mut reg = ClearanceRegistry::new();
/// reg.grant("agent_a", CriticalityIndex::Ci3);
///
/// assert!(reg.check("agent_a", CriticalityIndex::Ci2).is_ok());
/// assert!(reg.check("agent_a", CriticalityIndex::Ci5).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClearanceRegistry {
    grants: BTreeMap<String, CriticalityIndex>,
}

impl ClearanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `agent_id` clearance up to and including `max`.  A later grant
    /// replaces an earlier one.
    pub fn grant(&mut self, agent_id: &str, max: CriticalityIndex) {
        self.grants.insert(agent_id.to_string(), max);
    }

    /// Remove `agent_id` from the pool.  No-ops for unknown agents.
    pub fn revoke(&mut self, agent_id: &str) {
        self.grants.remove(agent_id);
    }

    /// # Errors
    ///
    /// [`WardenError::Unauthorized`] when the agent is unknown or cleared
    /// below `classification`.
    pub fn check(&self, agent_id: &str, classification: CriticalityIndex) -> Result<(), WardenError> {
        match self.grants.get(agent_id) {
            Some(max) if *max >= classification => Ok(()),
            _ => Err(WardenError::Unauthorized {
                agent_id: agent_id.to_string(),
                classification,
            }),
        }
    }

    /// Agents cleared for `classification`, in id order.
    pub fn cleared_for(&self, classification: CriticalityIndex) -> Vec<String> {
        self.grants
            .iter()
            .filter(|(_, max)| **max >= classification)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
