//! [`RiskClassifier`] – maps an intent onto the ALARP matrix.
//!
//! Classification is pure: the same intent and policy always produce the
//! same [`RiskAssessment`].
//!
//! | Input | Effect |
//! |-------|--------|
//! | declared severity / likelihood | matrix cell lookup |
//! | missing or out-of-range tier | [`WardenError::MalformedIntent`] |
//! | semantic trigger keyword in payload | tiers raised to (5, 5), `triggered = true` |

use warden_types::{AlarpStatus, CriticalityIndex, Intent, Mode, RiskAssessment, WardenError};

use crate::mode_selector::select_mode;
use crate::policy::{AlarpMatrix, Policy};

/// ALARP lookup plus semantic trigger scan.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    matrix: AlarpMatrix,
    triggers: Vec<String>,
    critical_threshold: CriticalityIndex,
}

impl RiskClassifier {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            matrix: policy.matrix.clone(),
            triggers: policy
                .semantic_triggers
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            critical_threshold: policy.critical_threshold,
        }
    }

    /// Classify `intent`.
    ///
    /// The recommended mode is computed without the emergency flag; the mode
    /// selector combines both.
    ///
    /// # Errors
    ///
    /// [`WardenError::MalformedIntent`] when a tier is missing or outside
    /// `1..=5`.
    pub fn classify(&self, intent: &Intent) -> Result<RiskAssessment, WardenError> {
        let severity = declared_tier("severity", intent.severity())?;
        let likelihood = declared_tier("likelihood", intent.likelihood())?;

        let triggered = self.matches_trigger(intent.payload());
        let (severity, likelihood) = if triggered { (5, 5) } else { (severity, likelihood) };

        let cell = self.matrix.cell(severity, likelihood).ok_or_else(|| {
            WardenError::MalformedIntent(format!("no matrix cell for ({severity}, {likelihood})"))
        })?;

        let mut assessment = RiskAssessment {
            severity,
            likelihood,
            classification: cell.classification,
            alarp: AlarpStatus::from_score(severity * likelihood),
            requires_sharding: cell.requires_sharding,
            recommended_mode: Mode::Standard,
            triggered,
        };
        assessment.recommended_mode = select_mode(&assessment, false, self.critical_threshold);
        Ok(assessment)
    }

    fn matches_trigger(&self, payload: &str) -> bool {
        let lower = payload.to_lowercase();
        self.triggers.iter().any(|t| lower.contains(t.as_str()))
    }
}

fn declared_tier(name: &str, value: Option<u8>) -> Result<u8, WardenError> {
    match value {
        Some(v @ 1..=5) => Ok(v),
        Some(v) => Err(WardenError::MalformedIntent(format!(
            "{name} tier {v} is outside 1..=5"
        ))),
        None => Err(WardenError::MalformedIntent(format!("{name} tier is missing"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::IntentRequest;

    fn intent(payload: &str, severity: Option<u8>, likelihood: Option<u8>) -> Intent {
        Intent::accept(IntentRequest {
            payload: payload.to_string(),
            domain: None,
            requester: "ops".to_string(),
            severity,
            likelihood,
            emergency: false,
            constraints: vec![],
        })
    }

    fn classifier() -> RiskClassifier {
        RiskClassifier::from_policy(&Policy::baseline())
    }

    #[test]
    fn low_risk_intent_is_ci1_standard() {
        let a = classifier()
            .classify(&intent("Tidy the workshop.", Some(1), Some(2)))
            .unwrap();
        assert_eq!(a.classification, CriticalityIndex::Ci1);
        assert_eq!(a.alarp, AlarpStatus::BroadlyAcceptable);
        assert!(!a.requires_sharding);
        assert_eq!(a.recommended_mode, Mode::Standard);
        assert!(!a.triggered);
    }

    #[test]
    fn top_cell_is_ci5_sharded_and_critical() {
        let a = classifier()
            .classify(&intent("Reroute the grid.", Some(5), Some(5)))
            .unwrap();
        assert_eq!(a.classification, CriticalityIndex::Ci5);
        assert!(a.requires_sharding);
        assert_eq!(a.recommended_mode, Mode::Critical);
        assert!(a.requires_human_approval());
    }

    #[test]
    fn mid_cell_matches_banding() {
        let a = classifier()
            .classify(&intent("Replace a bearing.", Some(3), Some(3)))
            .unwrap();
        assert_eq!(a.classification, CriticalityIndex::Ci3);
        assert_eq!(a.alarp, AlarpStatus::TolerableIfAlarp);
    }

    #[test]
    fn missing_severity_is_malformed() {
        let err = classifier()
            .classify(&intent("Replace a bearing.", None, Some(3)))
            .unwrap_err();
        assert!(matches!(err, WardenError::MalformedIntent(_)));
    }

    #[test]
    fn out_of_range_likelihood_is_malformed() {
        let err = classifier()
            .classify(&intent("Replace a bearing.", Some(2), Some(6)))
            .unwrap_err();
        assert!(matches!(err, WardenError::MalformedIntent(_)));
        assert!(classifier().classify(&intent("Replace a bearing.", Some(0), Some(1))).is_err());
    }

    #[test]
    fn semantic_trigger_raises_to_ci5() {
        let a = classifier()
            .classify(&intent("Plan for reactor MELTDOWN drills.", Some(1), Some(1)))
            .unwrap();
        assert!(a.triggered);
        assert_eq!((a.severity, a.likelihood), (5, 5));
        assert_eq!(a.classification, CriticalityIndex::Ci5);
        assert!(a.requires_sharding);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let i = intent("Calibrate the sensor.", Some(4), Some(4));
        assert_eq!(c.classify(&i).unwrap(), c.classify(&i).unwrap());
    }
}
