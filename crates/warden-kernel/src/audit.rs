//! Audit stage – structural cross-checks ("shields") over sub-agent outputs.
//!
//! Every registered [`ShieldCheck`] runs against every output, and every
//! result is recorded in the [`AuditRecord`].  An output that fails any check
//! is excluded from synthesis; shards that never reported are excluded too.
//!
//! Built-in battery, in order:
//!
//! | Check | Rejects |
//! |-------|---------|
//! | [`SchemaConformance`] | blank action, risk outside `[0, 1]`, fewer than [`MIN_FEATURES`] or non-finite features |
//! | [`ConstraintSatisfaction`] | proposals violating the intent's declared [`Constraint`]s |
//! | [`CrossShardConsistency`] | unknown shards, duplicate reports, wrong agent, off-majority feature dimension |
//!
//! [`AuditStage::audit`] additionally enforces the quorum: fewer accepted
//! outputs than `min_quorum` is an [`WardenError::AuditQuorumFailure`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};
use uuid::Uuid;
use warden_types::{AgentOutput, AuditRecord, CheckOutcome, Constraint, WardenError};

use crate::collusion::MIN_FEATURES;
use crate::policy::Policy;

/// Name recorded for shards that produced no output.
pub const NON_REPORTING: &str = "non_reporting";

// ────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────

/// The shard → agent assignment the orchestrator issued for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub shard_id: Uuid,
    pub agent_id: String,
}

/// Everything a check may consult besides the output itself.
#[derive(Debug)]
pub struct AuditContext<'a> {
    assignments: HashMap<Uuid, &'a str>,
    report_counts: HashMap<Uuid, usize>,
    majority_dimension: Option<usize>,
    constraints: &'a [Constraint],
}

impl<'a> AuditContext<'a> {
    pub fn new(
        outputs: &[AgentOutput],
        expected: &'a [Assignment],
        constraints: &'a [Constraint],
    ) -> Self {
        let assignments = expected
            .iter()
            .map(|a| (a.shard_id, a.agent_id.as_str()))
            .collect();
        let mut report_counts = HashMap::new();
        for o in outputs {
            *report_counts.entry(o.shard_id).or_insert(0) += 1;
        }
        Self {
            assignments,
            report_counts,
            majority_dimension: majority_dimension(outputs),
            constraints,
        }
    }

    pub fn assigned_agent(&self, shard_id: Uuid) -> Option<&str> {
        self.assignments.get(&shard_id).copied()
    }

    pub fn report_count(&self, shard_id: Uuid) -> usize {
        self.report_counts.get(&shard_id).copied().unwrap_or(0)
    }

    pub fn majority_dimension(&self) -> Option<usize> {
        self.majority_dimension
    }

    pub fn constraints(&self) -> &[Constraint] {
        self.constraints
    }
}

/// Most common feature-vector length.  Ties go to the smaller length.
fn majority_dimension(outputs: &[AgentOutput]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for o in outputs {
        *counts.entry(o.features.len()).or_insert(0) += 1;
    }
    let mut best: Option<(usize, usize)> = None;
    for (dim, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((dim, count));
        }
    }
    best.map(|(dim, _)| dim)
}

// ────────────────────────────────────────────────────────────────────────────
// ShieldCheck trait
// ────────────────────────────────────────────────────────────────────────────

/// One structural check applied to every output of a run.
pub trait ShieldCheck: Send + Sync {
    /// Name recorded in [`CheckOutcome::check`].
    fn name(&self) -> &str;

    /// `Err` carries a human-readable violation.
    fn check(&self, output: &AgentOutput, ctx: &AuditContext<'_>) -> Result<(), String>;
}

pub struct SchemaConformance;

impl ShieldCheck for SchemaConformance {
    fn name(&self) -> &str {
        "schema_conformance"
    }

    fn check(&self, output: &AgentOutput, _ctx: &AuditContext<'_>) -> Result<(), String> {
        let p = &output.proposal;
        if p.action.trim().is_empty() {
            return Err("action is blank".to_string());
        }
        if !p.risk.is_finite() || !(0.0..=1.0).contains(&p.risk) {
            return Err(format!("risk {} outside [0, 1]", p.risk));
        }
        if output.features.len() < MIN_FEATURES {
            return Err(format!(
                "feature vector has {} value(s), need at least {MIN_FEATURES}",
                output.features.len()
            ));
        }
        if output.features.iter().any(|f| !f.is_finite()) {
            return Err("feature vector contains non-finite values".to_string());
        }
        Ok(())
    }
}

pub struct ConstraintSatisfaction;

impl ShieldCheck for ConstraintSatisfaction {
    fn name(&self) -> &str {
        "constraint_satisfaction"
    }

    fn check(&self, output: &AgentOutput, ctx: &AuditContext<'_>) -> Result<(), String> {
        let action = output.proposal.action.to_lowercase();
        for constraint in ctx.constraints() {
            match constraint {
                Constraint::Forbid(term) if action.contains(&term.to_lowercase()) => {
                    return Err(format!("action mentions forbidden term {term:?}"));
                }
                Constraint::Require(term) if !action.contains(&term.to_lowercase()) => {
                    return Err(format!("action omits required term {term:?}"));
                }
                Constraint::MaxLength(max) if output.proposal.action.chars().count() > *max => {
                    return Err(format!("action longer than {max} characters"));
                }
                Constraint::MaxRisk(max) if output.proposal.risk > *max => {
                    return Err(format!(
                        "risk {} exceeds declared maximum {max}",
                        output.proposal.risk
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub struct CrossShardConsistency;

impl ShieldCheck for CrossShardConsistency {
    fn name(&self) -> &str {
        "cross_shard_consistency"
    }

    fn check(&self, output: &AgentOutput, ctx: &AuditContext<'_>) -> Result<(), String> {
        let Some(agent) = ctx.assigned_agent(output.shard_id) else {
            return Err(format!("shard {} does not belong to this run", output.shard_id));
        };
        if agent != output.agent_id {
            return Err(format!(
                "shard assigned to {agent} but reported by {}",
                output.agent_id
            ));
        }
        let reports = ctx.report_count(output.shard_id);
        if reports > 1 {
            return Err(format!("shard reported {reports} times"));
        }
        match ctx.majority_dimension() {
            Some(dim) if output.features.len() != dim => Err(format!(
                "feature dimension {} differs from run majority {dim}",
                output.features.len()
            )),
            _ => Ok(()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AuditStage
// ────────────────────────────────────────────────────────────────────────────

/// Check battery plus quorum and escalation thresholds.
///
/// # Example
///
/// ```
/// use warden_kernel::audit::{AuditStage, Assignment};
/// use warden_types::{AgentOutput, Proposal};
/// use uuid::Uuid;
///
/// let stage = AuditStage::with_default_checks(1, 0.8);
/// let shard_id = Uuid::new_v4();
/// let expected = vec![Assignment { shard_id, agent_id: "a".into() }];
/// let outputs = vec![AgentOutput {
///     shard_id,
///     agent_id: "a".into(),
///     proposal: Proposal { action: "hold".into(), rationale: String::new(), risk: 0.1 },
///     features: vec![0.2, 0.4, 0.6],
/// }];
/// let record = stage.audit(&outputs, &expected, &[]).unwrap();
/// assert_eq!(record.accepted, vec![shard_id]);
/// ```
pub struct AuditStage {
    checks: Vec<Box<dyn ShieldCheck>>,
    min_quorum: usize,
    escalation_risk: f64,
}

impl AuditStage {
    /// An empty stage with no checks registered.
    pub fn new(min_quorum: usize, escalation_risk: f64) -> Self {
        Self {
            checks: Vec::new(),
            min_quorum,
            escalation_risk,
        }
    }

    /// A stage with the built-in battery.
    pub fn with_default_checks(min_quorum: usize, escalation_risk: f64) -> Self {
        let mut stage = Self::new(min_quorum, escalation_risk);
        stage.add_check(Box::new(SchemaConformance));
        stage.add_check(Box::new(ConstraintSatisfaction));
        stage.add_check(Box::new(CrossShardConsistency));
        stage
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::with_default_checks(policy.min_quorum, policy.escalation_risk)
    }

    /// Register a check.  Checks run in insertion order.
    pub fn add_check(&mut self, check: Box<dyn ShieldCheck>) {
        self.checks.push(check);
    }

    pub fn min_quorum(&self) -> usize {
        self.min_quorum
    }

    /// Run every check against every output without enforcing the quorum.
    pub fn review(
        &self,
        outputs: &[AgentOutput],
        expected: &[Assignment],
        constraints: &[Constraint],
    ) -> AuditRecord {
        let ctx = AuditContext::new(outputs, expected, constraints);
        let mut record = AuditRecord::default();

        for output in outputs {
            let mut passed_all = true;
            for check in &self.checks {
                let result = check.check(output, &ctx);
                if let Err(violation) = &result {
                    debug!(
                        shard_id = %output.shard_id,
                        check = check.name(),
                        violation = %violation,
                        "shield check failed"
                    );
                    passed_all = false;
                }
                record.outcomes.push(CheckOutcome {
                    check: check.name().to_string(),
                    shard_id: output.shard_id,
                    passed: result.is_ok(),
                    violation: result.err(),
                });
            }
            if passed_all {
                record.accepted.push(output.shard_id);
                if output.proposal.risk >= self.escalation_risk {
                    record.escalate = true;
                }
            } else if !record.excluded.contains(&output.shard_id) {
                record.excluded.push(output.shard_id);
            }
        }

        for assignment in expected {
            if ctx.report_count(assignment.shard_id) == 0 {
                record.outcomes.push(CheckOutcome {
                    check: NON_REPORTING.to_string(),
                    shard_id: assignment.shard_id,
                    passed: false,
                    violation: Some("no output before deadline".to_string()),
                });
                record.excluded.push(assignment.shard_id);
            }
        }
        record
    }

    /// [`review`](Self::review) plus the quorum check.
    ///
    /// # Errors
    ///
    /// [`WardenError::AuditQuorumFailure`] when fewer than `min_quorum`
    /// outputs survive.
    pub fn audit(
        &self,
        outputs: &[AgentOutput],
        expected: &[Assignment],
        constraints: &[Constraint],
    ) -> Result<AuditRecord, WardenError> {
        let record = self.review(outputs, expected, constraints);
        if record.accepted.len() < self.min_quorum {
            warn!(
                accepted = record.accepted.len(),
                required = self.min_quorum,
                "audit quorum not met"
            );
            return Err(WardenError::AuditQuorumFailure {
                accepted: record.accepted.len(),
                required: self.min_quorum,
            });
        }
        Ok(record)
    }
}
