//! Synthesis stage – turns audited outputs into one action.
//!
//! Outputs are grouped into candidates by their normalised action (trimmed,
//! lowercased, whitespace collapsed).  A candidate's risk is the highest risk
//! any supporter assigned to it.
//!
//! # Standard mode: weighted vote
//!
//! Each candidate weighs the sum of its supporters' reputation scores.  The
//! heaviest wins; ties fall to the larger sum of historical agreements, then
//! the lower risk, then the lexicographically smaller action.  Every
//! contributing agent then receives an agreed/disagreed update.
//!
//! # Critical mode: propose / rebut
//!
//! Each round, every examiner rebuts every live candidate other than its own
//! position.  A candidate nobody rebuts wins.  Otherwise each examiner
//! concedes to the lowest-risk live candidate strictly safer than its current
//! position (ties: smaller action).  No movement, or no agreement within the
//! round limit, is a [`WardenError::SynthesisDeadlock`]; the caller then
//! emits [`SynthesisStage::fallback`].  Reputation is never consulted.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};
use uuid::Uuid;
use warden_types::{AgentOutput, Mode, Resolution, WardenError};

use crate::policy::Policy;
use crate::reputation::{ReputationOutcome, ReputationStore, ReputationUpdate};

/// Canonical form used to group equivalent actions.
pub fn normalize_action(action: &str) -> String {
    action
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A distinct proposed action and who backs it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: String,
    /// Display form: the smallest raw spelling among supporters.
    pub action: String,
    pub supporters: Vec<String>,
    pub shard_ids: Vec<Uuid>,
    pub risk: f64,
}

/// Group `outputs` into candidates, ordered by key.
pub fn candidates(outputs: &[AgentOutput]) -> Vec<Candidate> {
    let mut grouped: BTreeMap<String, Candidate> = BTreeMap::new();
    for o in outputs {
        let key = normalize_action(&o.proposal.action);
        let action = o.proposal.action.trim().to_string();
        let entry = grouped.entry(key.clone()).or_insert_with(|| Candidate {
            key,
            action: action.clone(),
            supporters: Vec::new(),
            shard_ids: Vec::new(),
            risk: o.proposal.risk,
        });
        if action < entry.action {
            entry.action = action;
        }
        entry.supporters.push(o.agent_id.clone());
        entry.shard_ids.push(o.shard_id);
        entry.risk = entry.risk.max(o.proposal.risk);
    }
    grouped.into_values().collect()
}

/// A synthesis result before it is stamped into a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub action: String,
    pub resolution: Resolution,
    pub supporters: Vec<String>,
    /// Empty outside standard mode.
    pub reputation_updates: Vec<ReputationUpdate>,
}

pub struct SynthesisStage {
    round_limit: u32,
    fallback_action: String,
}

impl SynthesisStage {
    pub fn new(round_limit: u32, fallback_action: impl Into<String>) -> Self {
        Self {
            round_limit,
            fallback_action: fallback_action.into(),
        }
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(policy.round_limit, policy.fallback_action.clone())
    }

    /// Resolve `outputs` under `mode`.
    ///
    /// # Errors
    ///
    /// - [`WardenError::AuditQuorumFailure`] – nothing to synthesise.
    /// - [`WardenError::SynthesisDeadlock`] – critical mode did not converge.
    /// - [`WardenError::Storage`] – the reputation store failed.
    pub fn synthesize(
        &self,
        outputs: &[AgentOutput],
        mode: Mode,
        reputation: &dyn ReputationStore,
    ) -> Result<Resolved, WardenError> {
        if outputs.is_empty() {
            return Err(WardenError::AuditQuorumFailure {
                accepted: 0,
                required: 1,
            });
        }
        match mode {
            Mode::Standard => self.weighted_vote(outputs, reputation),
            Mode::Critical => self.adversarial(outputs),
        }
    }

    /// Reputation-weighted cooperative resolution.
    pub fn weighted_vote(
        &self,
        outputs: &[AgentOutput],
        reputation: &dyn ReputationStore,
    ) -> Result<Resolved, WardenError> {
        let mut scored = Vec::new();
        for c in candidates(outputs) {
            let mut weight = 0.0;
            let mut history = 0u64;
            for agent in &c.supporters {
                let record = reputation.get(agent)?;
                weight += record.score();
                history += record.agreements;
            }
            scored.push((c, weight, history));
        }
        scored.sort_by(|(a, wa, ha), (b, wb, hb)| {
            wb.total_cmp(wa)
                .then_with(|| hb.cmp(ha))
                .then_with(|| a.risk.total_cmp(&b.risk))
                .then_with(|| a.key.cmp(&b.key))
        });

        let mut ranked = scored.into_iter();
        let Some((winner, weight, _)) = ranked.next() else {
            return Err(WardenError::AuditQuorumFailure {
                accepted: 0,
                required: 1,
            });
        };
        let mut updates: Vec<ReputationUpdate> = winner
            .supporters
            .iter()
            .map(|a| ReputationUpdate::new(a.clone(), ReputationOutcome::Agreed))
            .collect();
        for (loser, _, _) in ranked {
            updates.extend(
                loser
                    .supporters
                    .iter()
                    .map(|a| ReputationUpdate::new(a.clone(), ReputationOutcome::Disagreed)),
            );
        }
        info!(action = %winner.action, weight, "weighted vote resolved");
        Ok(Resolved {
            action: winner.action,
            resolution: Resolution::WeightedVote { weight },
            supporters: winner.supporters,
            reputation_updates: updates,
        })
    }

    /// Deterministic propose/rebut resolution.
    ///
    /// An examiner only concedes to a candidate with strictly lower risk.
    /// Candidates of equal risk never win a tie-break against each other, so
    /// an equal-risk split makes no progress and deadlocks in its first round;
    /// the caller then emits [`fallback`](Self::fallback).
    pub fn adversarial(&self, outputs: &[AgentOutput]) -> Result<Resolved, WardenError> {
        let pool = candidates(outputs);
        let by_key: BTreeMap<&str, &Candidate> =
            pool.iter().map(|c| (c.key.as_str(), c)).collect();
        let mut positions: Vec<&str> = outputs
            .iter()
            .filter_map(|o| {
                by_key
                    .get_key_value(normalize_action(&o.proposal.action).as_str())
                    .map(|(k, _)| *k)
            })
            .collect();

        for round in 1..=self.round_limit {
            let live: BTreeSet<&str> = positions.iter().copied().collect();
            let unrebutted = live
                .iter()
                .find(|c| positions.iter().all(|p| p == *c))
                .and_then(|key| by_key.get(key));
            if let Some(winner) = unrebutted {
                info!(action = %winner.action, rounds = round, "adversarial synthesis converged");
                return Ok(Resolved {
                    action: winner.action.clone(),
                    resolution: Resolution::Adversarial { rounds: round },
                    supporters: outputs.iter().map(|o| o.agent_id.clone()).collect(),
                    reputation_updates: Vec::new(),
                });
            }

            let mut moved = false;
            for position in positions.iter_mut() {
                let own_risk = by_key.get(*position).map_or(f64::INFINITY, |c| c.risk);
                let safer = live
                    .iter()
                    .filter_map(|k| by_key.get(k).copied())
                    .filter(|c| c.risk < own_risk)
                    .min_by(|a, b| {
                        a.risk
                            .partial_cmp(&b.risk)
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| a.key.cmp(&b.key))
                    });
                if let Some(c) = safer {
                    *position = c.key.as_str();
                    moved = true;
                }
            }
            debug!(round, moved, "rebuttal round finished");
            if !moved {
                return Err(WardenError::SynthesisDeadlock { rounds: round });
            }
        }
        Err(WardenError::SynthesisDeadlock {
            rounds: self.round_limit,
        })
    }

    /// The policy fallback used when critical synthesis deadlocks.
    pub fn fallback(&self, reason: impl Into<String>) -> Resolved {
        Resolved {
            action: self.fallback_action.clone(),
            resolution: Resolution::Fallback {
                reason: reason.into(),
            },
            supporters: Vec::new(),
            reputation_updates: Vec::new(),
        }
    }
}
