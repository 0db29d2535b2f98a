//! [`SanityFilter`] – first intake check, before classification.
//!
//! Rejects payloads that are too short to mean anything and payloads that
//! carry obvious injection patterns.  Matching is case-insensitive.

use warden_types::{Intent, WardenError};

use crate::policy::Policy;

/// Payloads shorter than this (in characters, after trimming) are rejected.
pub const MIN_PAYLOAD_CHARS: usize = 3;

/// Structural intake filter.
///
/// # Example
///
/// ```
/// use warden_kernel::sanity::SanityFilter;
/// use warden_types::{Intent, IntentRequest};
///
/// let filter = SanityFilter::new(["DROP TABLE"]);
/// let req = |p: &str| IntentRequest {
///     payload: p.into(),
///     domain: None,
///     requester: "ops".into(),
///     severity: Some(1),
///     likelihood: Some(1),
///     emergency: false,
///     constraints: vec![],
/// };
/// assert!(filter.validate(&Intent::accept(req("Inspect the valve."))).is_ok());
/// assert!(filter.validate(&Intent::accept(req("x; drop table users"))).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SanityFilter {
    forbidden: Vec<String>,
}

impl SanityFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            forbidden: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(&policy.forbidden_patterns)
    }

    /// # Errors
    ///
    /// [`WardenError::MalformedIntent`] naming the first problem found.
    pub fn validate(&self, intent: &Intent) -> Result<(), WardenError> {
        let payload = intent.payload().trim();
        if payload.chars().count() < MIN_PAYLOAD_CHARS {
            return Err(WardenError::MalformedIntent(format!(
                "payload must be at least {MIN_PAYLOAD_CHARS} characters"
            )));
        }
        let lower = payload.to_lowercase();
        if let Some(pattern) = self.forbidden.iter().find(|p| lower.contains(p.as_str())) {
            return Err(WardenError::MalformedIntent(format!(
                "payload contains forbidden pattern {pattern:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::IntentRequest;

    fn intent(payload: &str) -> Intent {
        Intent::accept(IntentRequest {
            payload: payload.to_string(),
            domain: None,
            requester: "ops".to_string(),
            severity: Some(1),
            likelihood: Some(1),
            emergency: false,
            constraints: vec![],
        })
    }

    fn filter() -> SanityFilter {
        SanityFilter::from_policy(&Policy::baseline())
    }

    #[test]
    fn ordinary_payload_passes() {
        assert!(filter().validate(&intent("Check the pump pressure.")).is_ok());
    }

    #[test]
    fn short_payload_is_malformed() {
        let err = filter().validate(&intent(" ab ")).unwrap_err();
        assert!(matches!(err, WardenError::MalformedIntent(_)));
    }

    #[test]
    fn script_tag_is_rejected() {
        assert!(filter().validate(&intent("hello <SCRIPT>alert(1)")).is_err());
    }

    #[test]
    fn sql_comment_is_rejected() {
        assert!(filter().validate(&intent("select 1 -- comment")).is_err());
    }

    #[test]
    fn empty_pattern_list_accepts_everything_long_enough() {
        let f = SanityFilter::new(Vec::<String>::new());
        assert!(f.validate(&intent("DROP TABLE x")).is_ok());
    }
}
