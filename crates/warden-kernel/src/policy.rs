//! [`Policy`] – the kernel's read-only policy configuration.
//!
//! A policy is loaded once at process start and shared behind an `Arc`
//! thereafter.  Every field is required when deserialising; a partial file is
//! a parse error rather than a silently defaulted policy.  Call
//! [`Policy::validate`] before use: an invalid policy is fatal at startup.
//!
//! [`Policy::baseline`] builds the reference policy that `warden init-policy`
//! writes out.

use serde::{Deserialize, Serialize};
use warden_types::{CriticalityIndex, WardenError};

/// Default semantic trigger keywords that raise any intent to `CI-5`.
pub const DEFAULT_SEMANTIC_TRIGGERS: [&str; 10] = [
    "nuclear",
    "biohazard",
    "death",
    "collapse",
    "destroy",
    "terminate",
    "emergency",
    "meltdown",
    "kill",
    "fail",
];

/// Default injection patterns rejected by the intake sanity filter.
pub const DEFAULT_FORBIDDEN_PATTERNS: [&str; 4] = ["<script>", "DROP TABLE", "INSERT INTO", "--"];

// ────────────────────────────────────────────────────────────────────────────
// ALARP matrix
// ────────────────────────────────────────────────────────────────────────────

/// One cell of the severity × likelihood matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixCell {
    pub classification: CriticalityIndex,
    pub requires_sharding: bool,
}

/// Fixed 5×5 lookup table. `cells[severity - 1][likelihood - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlarpMatrix {
    pub cells: Vec<Vec<MatrixCell>>,
}

impl AlarpMatrix {
    /// Score-banded matrix: 25 → CI-5, 15–20 → CI-4, 9–12 → CI-3,
    /// 5–8 → CI-2, otherwise CI-1.  Cells at or above `sharding_from`
    /// require sharding.
    pub fn banded(sharding_from: CriticalityIndex) -> Self {
        let cells = (1..=5u8)
            .map(|severity| {
                (1..=5u8)
                    .map(|likelihood| {
                        let classification = match severity * likelihood {
                            25 => CriticalityIndex::Ci5,
                            15..=24 => CriticalityIndex::Ci4,
                            9..=14 => CriticalityIndex::Ci3,
                            5..=8 => CriticalityIndex::Ci2,
                            _ => CriticalityIndex::Ci1,
                        };
                        MatrixCell {
                            classification,
                            requires_sharding: classification >= sharding_from,
                        }
                    })
                    .collect()
            })
            .collect();
        Self { cells }
    }

    /// Look up a cell.  Returns `None` for tiers outside `1..=5`.
    pub fn cell(&self, severity: u8, likelihood: u8) -> Option<MatrixCell> {
        if !(1..=5).contains(&severity) || !(1..=5).contains(&likelihood) {
            return None;
        }
        self.cells
            .get(usize::from(severity - 1))
            .and_then(|row| row.get(usize::from(likelihood - 1)))
            .copied()
    }

    fn validate(&self) -> Result<(), WardenError> {
        if self.cells.len() != 5 || self.cells.iter().any(|row| row.len() != 5) {
            return Err(WardenError::InvalidPolicy(
                "matrix must have exactly 5 rows of 5 cells".to_string(),
            ));
        }
        let top = self.cells[4][4];
        if top.classification != CriticalityIndex::Ci5 || !top.requires_sharding {
            return Err(WardenError::InvalidPolicy(
                "cell (5,5) must be CI-5 and require sharding".to_string(),
            ));
        }
        for s in 0..5 {
            for l in 0..5 {
                let cell = self.cells[s][l];
                if cell.classification == CriticalityIndex::Ci5 && !cell.requires_sharding {
                    return Err(WardenError::InvalidPolicy(format!(
                        "cell ({}, {}) is CI-5 but does not require sharding",
                        s + 1,
                        l + 1
                    )));
                }
                // Risk never decreases as severity or likelihood increase.
                if s > 0 && cell.classification < self.cells[s - 1][l].classification
                    || l > 0 && cell.classification < self.cells[s][l - 1].classification
                {
                    return Err(WardenError::InvalidPolicy(format!(
                        "cell ({}, {}) classifies lower than a less severe neighbour",
                        s + 1,
                        l + 1
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every classification that appears in a cell requiring sharding.
    fn sharded_classifications(&self) -> Vec<CriticalityIndex> {
        let mut out: Vec<CriticalityIndex> = self
            .cells
            .iter()
            .flatten()
            .filter(|c| c.requires_sharding)
            .map(|c| c.classification)
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Policy
// ────────────────────────────────────────────────────────────────────────────

/// Number of shards to cut for a given classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardCount {
    pub classification: CriticalityIndex,
    pub shards: usize,
}

/// Bounded retry settings for the notarization sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotaryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// When the reputation ledger is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationReset {
    /// Only by explicit administrative action.
    Manual,
    /// Once, when the kernel process starts.
    OnStartup,
}

/// Read-only policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Classification at or above which the critical path is forced.
    pub critical_threshold: CriticalityIndex,
    /// Correlation statistic above which two outputs are colluding.
    pub collusion_threshold: f64,
    /// Maximum propose/rebut rounds in critical synthesis.
    pub round_limit: u32,
    /// Minimum audited outputs needed for synthesis.
    pub min_quorum: usize,
    /// Proposal risk at or above which audit escalates the run to critical.
    pub escalation_risk: f64,
    /// Action emitted when critical synthesis deadlocks.
    pub fallback_action: String,
    /// Per-shard execution deadline.
    pub shard_timeout_ms: u64,
    pub reputation_reset: ReputationReset,
    pub semantic_triggers: Vec<String>,
    pub forbidden_patterns: Vec<String>,
    pub notary: NotaryPolicy,
    pub shard_counts: Vec<ShardCount>,
    pub matrix: AlarpMatrix,
}

impl Policy {
    /// The reference policy.
    pub fn baseline() -> Self {
        Self {
            critical_threshold: CriticalityIndex::Ci4,
            collusion_threshold: 0.85,
            round_limit: 3,
            min_quorum: 2,
            escalation_risk: 0.8,
            fallback_action: "no-op".to_string(),
            shard_timeout_ms: 30_000,
            reputation_reset: ReputationReset::Manual,
            notary: NotaryPolicy {
                max_attempts: 3,
                base_delay_ms: 200,
            },
            semantic_triggers: DEFAULT_SEMANTIC_TRIGGERS.iter().map(|s| s.to_string()).collect(),
            forbidden_patterns: DEFAULT_FORBIDDEN_PATTERNS.iter().map(|s| s.to_string()).collect(),
            shard_counts: vec![
                ShardCount {
                    classification: CriticalityIndex::Ci4,
                    shards: 2,
                },
                ShardCount {
                    classification: CriticalityIndex::Ci5,
                    shards: 3,
                },
            ],
            matrix: AlarpMatrix::banded(CriticalityIndex::Ci4),
        }
    }

    /// Shard count configured for `classification`.
    pub fn shard_count(&self, classification: CriticalityIndex) -> Option<usize> {
        self.shard_counts
            .iter()
            .find(|c| c.classification == classification)
            .map(|c| c.shards)
    }

    /// Check every invariant the kernel relies on.
    ///
    /// # Errors
    ///
    /// [`WardenError::InvalidPolicy`] describing the first violation found.
    pub fn validate(&self) -> Result<(), WardenError> {
        self.matrix.validate()?;

        if !(self.collusion_threshold > 0.0 && self.collusion_threshold <= 1.0) {
            return Err(invalid(format!(
                "collusion_threshold {} must be in (0, 1]",
                self.collusion_threshold
            )));
        }
        if !(self.escalation_risk > 0.0 && self.escalation_risk <= 1.0) {
            return Err(invalid(format!(
                "escalation_risk {} must be in (0, 1]",
                self.escalation_risk
            )));
        }
        if self.round_limit == 0 {
            return Err(invalid("round_limit must be at least 1".to_string()));
        }
        if self.min_quorum == 0 {
            return Err(invalid("min_quorum must be at least 1".to_string()));
        }
        if self.fallback_action.trim().is_empty() {
            return Err(invalid("fallback_action must not be empty".to_string()));
        }
        if self.shard_timeout_ms == 0 {
            return Err(invalid("shard_timeout_ms must be positive".to_string()));
        }
        if self.notary.max_attempts == 0 {
            return Err(invalid("notary.max_attempts must be at least 1".to_string()));
        }
        if self.semantic_triggers.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("semantic_triggers must not contain blank entries".to_string()));
        }
        if self.forbidden_patterns.iter().any(|p| p.is_empty()) {
            return Err(invalid("forbidden_patterns must not contain empty entries".to_string()));
        }

        for (i, count) in self.shard_counts.iter().enumerate() {
            if count.shards < 2 {
                return Err(invalid(format!(
                    "shard count for {} must be at least 2",
                    count.classification
                )));
            }
            if self.shard_counts[..i]
                .iter()
                .any(|c| c.classification == count.classification)
            {
                return Err(invalid(format!(
                    "duplicate shard count for {}",
                    count.classification
                )));
            }
        }
        for ci in self.matrix.sharded_classifications() {
            if self.shard_count(ci).is_none() {
                return Err(invalid(format!("no shard count configured for {ci}")));
            }
        }
        // Sharded runs must be able to reach quorum with every shard reporting.
        let min_k = self.shard_counts.iter().map(|c| c.shards).min();
        if let Some(min_k) = min_k.filter(|k| *k < self.min_quorum) {
            return Err(invalid(format!(
                "min_quorum {} exceeds the smallest shard count {min_k}",
                self.min_quorum
            )));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> WardenError {
    WardenError::InvalidPolicy(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_policy_is_valid() {
        assert!(Policy::baseline().validate().is_ok());
    }

    #[test]
    fn banded_matrix_corners() {
        let m = AlarpMatrix::banded(CriticalityIndex::Ci4);
        let low = m.cell(1, 1).unwrap();
        assert_eq!(low.classification, CriticalityIndex::Ci1);
        assert!(!low.requires_sharding);

        let top = m.cell(5, 5).unwrap();
        assert_eq!(top.classification, CriticalityIndex::Ci5);
        assert!(top.requires_sharding);

        let high = m.cell(4, 5).unwrap();
        assert_eq!(high.classification, CriticalityIndex::Ci4);
        assert!(high.requires_sharding);
    }

    #[test]
    fn cell_lookup_rejects_out_of_range_tiers() {
        let m = AlarpMatrix::banded(CriticalityIndex::Ci4);
        assert!(m.cell(0, 3).is_none());
        assert!(m.cell(3, 6).is_none());
    }

    #[test]
    fn top_cell_must_require_sharding() {
        let mut p = Policy::baseline();
        p.matrix.cells[4][4].requires_sharding = false;
        assert!(matches!(p.validate(), Err(WardenError::InvalidPolicy(_))));
    }

    #[test]
    fn top_cell_must_be_ci5() {
        let mut p = Policy::baseline();
        p.matrix.cells[4][4].classification = CriticalityIndex::Ci4;
        assert!(p.validate().is_err());
    }

    #[test]
    fn non_monotonic_matrix_is_rejected() {
        let mut p = Policy::baseline();
        p.matrix.cells[3][3].classification = CriticalityIndex::Ci1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let mut p = Policy::baseline();
        p.matrix.cells[2].pop();
        assert!(p.validate().is_err());
    }

    #[test]
    fn collusion_threshold_must_be_in_unit_interval() {
        let mut p = Policy::baseline();
        p.collusion_threshold = 0.0;
        assert!(p.validate().is_err());
        p.collusion_threshold = 1.5;
        assert!(p.validate().is_err());
        p.collusion_threshold = f64::NAN;
        assert!(p.validate().is_err());
    }

    #[test]
    fn zero_round_limit_is_rejected() {
        let mut p = Policy::baseline();
        p.round_limit = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn shard_count_below_two_is_rejected() {
        let mut p = Policy::baseline();
        p.shard_counts[0].shards = 1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn missing_shard_count_for_sharded_class_is_rejected() {
        let mut p = Policy::baseline();
        p.shard_counts.retain(|c| c.classification != CriticalityIndex::Ci5);
        assert!(p.validate().is_err());
    }

    #[test]
    fn quorum_larger_than_shard_count_is_rejected() {
        let mut p = Policy::baseline();
        p.min_quorum = 3;
        assert!(p.validate().is_err());
    }

    #[test]
    fn blank_fallback_is_rejected() {
        let mut p = Policy::baseline();
        p.fallback_action = "  ".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_preserves_policy() {
        let p = Policy::baseline();
        let raw = toml::to_string_pretty(&p).expect("serialize");
        let back: Policy = toml::from_str(&raw).expect("parse");
        assert_eq!(back, p);
    }

    #[test]
    fn partial_toml_is_a_parse_error() {
        let raw = "critical_threshold = \"CI-4\"\ncollusion_threshold = 0.9\n";
        assert!(toml::from_str::<Policy>(raw).is_err());
    }

    #[test]
    fn shard_count_lookup() {
        let p = Policy::baseline();
        assert_eq!(p.shard_count(CriticalityIndex::Ci5), Some(3));
        assert_eq!(p.shard_count(CriticalityIndex::Ci1), None);
    }
}
