//! Mode selection and the per-run [`ModeLatch`].
//!
//! A run's mode can move from [`Mode::Standard`] to [`Mode::Critical`] and
//! never back.  The latch exposes no setter and no de-escalation.

use tracing::warn;
use warden_types::{CriticalityIndex, Mode, RiskAssessment};

/// Choose the execution mode for an assessed intent.
///
/// `CI-5` is always critical; otherwise an emergency or a classification at
/// or above `threshold` forces the critical path.
pub fn select_mode(
    assessment: &RiskAssessment,
    declared_emergency: bool,
    threshold: CriticalityIndex,
) -> Mode {
    if assessment.classification == CriticalityIndex::Ci5
        || declared_emergency
        || assessment.classification >= threshold
    {
        Mode::Critical
    } else {
        Mode::Standard
    }
}

/// Monotonic holder of a run's mode.
#[derive(Debug, Clone)]
pub struct ModeLatch {
    mode: Mode,
    reasons: Vec<String>,
}

impl ModeLatch {
    pub fn new(initial: Mode) -> Self {
        Self {
            mode: initial,
            reasons: Vec::new(),
        }
    }

    pub fn current(&self) -> Mode {
        self.mode
    }

    /// Force the critical path.  Returns `true` when this call changed the
    /// mode.
    pub fn escalate(&mut self, reason: impl Into<String>) -> bool {
        if self.mode == Mode::Critical {
            return false;
        }
        let reason = reason.into();
        warn!(reason = %reason, "escalating run to critical mode");
        self.mode = Mode::Critical;
        self.reasons.push(reason);
        true
    }

    /// Reasons recorded for each escalation, oldest first.
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}
