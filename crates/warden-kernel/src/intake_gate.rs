//! [`IntakeGate`] – single admission point for new intents.
//!
//! Every intent passes through [`IntakeGate::admit`] before the pipeline
//! does any work.  The gate runs three checks in order:
//!
//! 1. **Sanity** ([`SanityFilter`]): length and injection patterns.
//! 2. **Classification** ([`RiskClassifier`]): ALARP lookup and semantic
//!    triggers.
//! 3. **Mode selection** ([`select_mode`]): combines the classification with
//!    the declared emergency flag.
//!
//! The first failure is returned and the run never reaches sharding.
//!
//! # Example
//!
//! ```
//! use warden_kernel::{IntakeGate, Policy};
//! use warden_types::{Intent, IntentRequest, Mode};
//!
//! let gate = IntakeGate::from_policy(&Policy::baseline());
//! let intent = Intent::accept(IntentRequest {
//!     payload: "Order spare filters.".into(),
//!     domain: None,
//!     requester: "ops".into(),
//!     severity: Some(1),
//!     likelihood: Some(2),
//!     emergency: false,
//!     constraints: vec![],
//! });
//! let admission = gate.admit(&intent).unwrap();
//! assert_eq!(admission.mode, Mode::Standard);
//! ```

use tracing::debug;
use warden_types::{CriticalityIndex, Intent, Mode, RiskAssessment, WardenError};

use crate::mode_selector::select_mode;
use crate::policy::Policy;
use crate::risk_classifier::RiskClassifier;
use crate::sanity::SanityFilter;

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub assessment: RiskAssessment,
    pub mode: Mode,
}

pub struct IntakeGate {
    sanity: SanityFilter,
    classifier: RiskClassifier,
    critical_threshold: CriticalityIndex,
}

impl IntakeGate {
    pub fn new(
        sanity: SanityFilter,
        classifier: RiskClassifier,
        critical_threshold: CriticalityIndex,
    ) -> Self {
        Self {
            sanity,
            classifier,
            critical_threshold,
        }
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(
            SanityFilter::from_policy(policy),
            RiskClassifier::from_policy(policy),
            policy.critical_threshold,
        )
    }

    /// # Errors
    ///
    /// [`WardenError::MalformedIntent`] from either the sanity filter or the
    /// classifier.
    pub fn admit(&self, intent: &Intent) -> Result<Admission, WardenError> {
        self.sanity.validate(intent)?;
        let assessment = self.classifier.classify(intent)?;
        let mode = select_mode(&assessment, intent.declared_emergency(), self.critical_threshold);
        debug!(
            run_id = %intent.id(),
            classification = %assessment.classification,
            mode = %mode,
            "intent admitted"
        );
        Ok(Admission { assessment, mode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::IntentRequest;

    fn intent(payload: &str, sev: u8, lik: u8, emergency: bool) -> Intent {
        Intent::accept(IntentRequest {
            payload: payload.to_string(),
            domain: None,
            requester: "ops".to_string(),
            severity: Some(sev),
            likelihood: Some(lik),
            emergency,
            constraints: vec![],
        })
    }

    fn gate() -> IntakeGate {
        IntakeGate::from_policy(&Policy::baseline())
    }

    #[test]
    fn sanity_failure_short_circuits() {
        let err = gate().admit(&intent("<script>x</script>", 1, 1, false)).unwrap_err();
        assert!(matches!(err, WardenError::MalformedIntent(m) if m.contains("forbidden")));
    }

    #[test]
    fn emergency_turns_low_risk_critical() {
        let a = gate().admit(&intent("Open the bay door.", 1, 1, true)).unwrap();
        assert_eq!(a.assessment.classification, CriticalityIndex::Ci1);
        assert_eq!(a.assessment.recommended_mode, Mode::Standard);
        assert_eq!(a.mode, Mode::Critical);
    }

    #[test]
    fn high_risk_is_critical_without_emergency() {
        let a = gate().admit(&intent("Open the bay door.", 4, 4, false)).unwrap();
        assert_eq!(a.mode, Mode::Critical);
    }

    #[test]
    fn bad_tier_is_rejected_after_sanity() {
        assert!(gate().admit(&intent("Open the bay door.", 9, 1, false)).is_err());
    }
}
