//! [`CollusionDetector`] – pairwise correlation over sub-agent outputs.
//!
//! Agents working on disjoint fragments should produce feature vectors that
//! are statistically independent.  For every pair of outputs the detector
//! computes the absolute Pearson correlation of their feature vectors.  A
//! statistic strictly above the threshold `τ` means the agents are
//! coordinating through a side channel.
//!
//! | Case | Statistic |
//! |------|-----------|
//! | both vectors have variance | `|r|` |
//! | a vector has zero variance | `1.0` when the vectors are identical, else `0.0` |
//! | lengths differ, fewer than [`MIN_FEATURES`] values, or non-finite values | `0.0` |
//!
//! Mismatched or short vectors are left to the audit stage, which rejects
//! them through schema conformance and cross-shard consistency.

use uuid::Uuid;
use warden_types::{AgentOutput, CollusionVerdict};

/// Shortest feature vector the statistic is computed over.  Any two
/// two-point vectors are perfectly correlated.
pub const MIN_FEATURES: usize = 3;

/// Absolute Pearson correlation of `a` and `b`.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    if n != b.len() || n < MIN_FEATURES {
        return 0.0;
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return 0.0;
    }

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return if a == b { 1.0 } else { 0.0 };
    }
    let r = (cov / (var_a.sqrt() * var_b.sqrt())).abs();
    if r.is_finite() { r.min(1.0) } else { 0.0 }
}

#[derive(Debug, Clone, Copy)]
pub struct CollusionDetector {
    threshold: f64,
}

impl CollusionDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Test every pair in `outputs`.
    ///
    /// The verdict names the pair with the largest statistic; ties keep the
    /// first pair in input order.
    pub fn detect(&self, outputs: &[AgentOutput]) -> CollusionVerdict {
        let mut best: Option<(f64, (Uuid, Uuid))> = None;
        for (i, a) in outputs.iter().enumerate() {
            for b in &outputs[i + 1..] {
                best = Self::keep_max(best, a, b);
            }
        }
        self.verdict(best)
    }

    /// Test `incoming` against every output that arrived before it.  Used by
    /// the orchestrator as results stream in.
    pub fn screen(&self, incoming: &AgentOutput, prior: &[AgentOutput]) -> CollusionVerdict {
        let best = prior
            .iter()
            .fold(None, |best, earlier| Self::keep_max(best, earlier, incoming));
        self.verdict(best)
    }

    fn keep_max(
        best: Option<(f64, (Uuid, Uuid))>,
        a: &AgentOutput,
        b: &AgentOutput,
    ) -> Option<(f64, (Uuid, Uuid))> {
        let stat = correlation(&a.features, &b.features);
        match best {
            Some((current, _)) if current >= stat => best,
            _ => Some((stat, (a.shard_id, b.shard_id))),
        }
    }

    fn verdict(&self, best: Option<(f64, (Uuid, Uuid))>) -> CollusionVerdict {
        match best {
            Some((statistic, pair)) => CollusionVerdict {
                colluding: statistic > self.threshold,
                statistic,
                pair: Some(pair),
            },
            None => CollusionVerdict {
                colluding: false,
                statistic: 0.0,
                pair: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Proposal;

    fn output(features: Vec<f64>) -> AgentOutput {
        AgentOutput {
            shard_id: Uuid::new_v4(),
            agent_id: "agent".to_string(),
            proposal: Proposal {
                action: "hold".to_string(),
                rationale: String::new(),
                risk: 0.1,
            },
            features,
        }
    }

    #[test]
    fn perfectly_correlated_vectors_score_one() {
        let r = correlation(&[1.0, 2.0, 3.0, 4.0], &[2.0, 4.0, 6.0, 8.0]);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn anti_correlation_counts_as_correlation() {
        let r = correlation(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let r = correlation(&[1.0, -1.0, 1.0, -1.0], &[1.0, 1.0, -1.0, -1.0]);
        assert!(r.abs() < 1e-12);
    }

    #[test]
    fn constant_vectors() {
        assert_eq!(correlation(&[0.5, 0.5, 0.5], &[0.5, 0.5, 0.5]), 1.0);
        assert_eq!(correlation(&[0.5, 0.5, 0.5], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(correlation(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0, -50.0, 99.0]), 0.0);
    }

    #[test]
    fn short_vectors_are_never_flagged() {
        assert_eq!(correlation(&[0.3, 0.9], &[5.0, -2.0]), 0.0);
        assert_eq!(correlation(&[0.4], &[0.4]), 0.0);

        let detector = CollusionDetector::new(0.85);
        let outputs = vec![output(vec![0.3, 0.9]), output(vec![5.0, -2.0])];
        assert!(!detector.detect(&outputs).colluding);
    }

    #[test]
    fn empty_or_nan_scores_zero() {
        assert_eq!(correlation(&[], &[]), 0.0);
        assert_eq!(correlation(&[1.0, f64::NAN, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn independent_outputs_pass() {
        let detector = CollusionDetector::new(0.9);
        let outputs = vec![
            output(vec![0.1, 0.9, 0.3, 0.7]),
            output(vec![0.8, 0.8, 0.1, 0.2]),
            output(vec![0.5, 0.1, 0.6, 0.9]),
        ];
        let v = detector.detect(&outputs);
        assert!(!v.colluding);
        assert!(v.statistic <= 0.9);
        assert!(v.pair.is_some());
    }

    #[test]
    fn colluding_pair_is_named() {
        let detector = CollusionDetector::new(0.9);
        let outputs = vec![
            output(vec![0.1, 0.9, 0.3, 0.7]),
            output(vec![0.5, 0.1, 0.6, 0.9]),
            output(vec![0.2, 1.8, 0.6, 1.4]),
        ];
        let v = detector.detect(&outputs);
        assert!(v.colluding);
        assert_eq!(v.pair, Some((outputs[0].shard_id, outputs[2].shard_id)));
    }

    #[test]
    fn threshold_is_strict() {
        let detector = CollusionDetector::new(1.0);
        let outputs = vec![output(vec![1.0, 2.0, 3.0]), output(vec![2.0, 4.0, 6.0])];
        assert!(!detector.detect(&outputs).colluding);
    }

    #[test]
    fn screen_checks_incoming_against_prior() {
        let detector = CollusionDetector::new(0.9);
        let prior = vec![output(vec![0.1, 0.9, 0.3, 0.7]), output(vec![0.5, 0.1, 0.6, 0.9])];
        let clone = output(vec![0.1, 0.9, 0.3, 0.7]);
        let v = detector.screen(&clone, &prior);
        assert!(v.colluding);
        assert_eq!(v.pair, Some((prior[0].shard_id, clone.shard_id)));

        assert!(!detector.screen(&clone, &[]).colluding);
    }

    #[test]
    fn single_output_has_no_pair() {
        let v = CollusionDetector::new(0.5).detect(&[output(vec![1.0])]);
        assert!(!v.colluding);
        assert!(v.pair.is_none());
    }
}
