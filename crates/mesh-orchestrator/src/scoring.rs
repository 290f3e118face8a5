//! Load scoring

use mesh_core::{NodeMetrics, ScoringWeights};

/// Turns a node's metrics into a single comparable number, lower is better.
///
/// `score = active * W_ACTIVE + (avg_latency_ms / 1000) * W_LAT + consecutive_failures * W_FAIL`
///
/// A node without latency samples scores `f64::INFINITY`.
#[derive(Debug, Clone, Copy)]
pub struct LoadScorer {
    weights: ScoringWeights,
}

impl LoadScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, metrics: &NodeMetrics) -> f64 {
        let Some(avg_latency_ms) = metrics.avg_latency_ms() else {
            return f64::INFINITY;
        };

        f64::from(metrics.active_requests) * self.weights.active
            + (avg_latency_ms / 1000.0) * self.weights.latency
            + f64::from(metrics.consecutive_failures) * self.weights.failures
    }
}

impl Default for LoadScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(active: u32, latencies: &[f64], failures: u32) -> NodeMetrics {
        let mut m = NodeMetrics::new(10);
        m.active_requests = active;
        m.consecutive_failures = failures;
        for l in latencies {
            m.recent_latencies.push(*l);
        }
        m
    }

    #[test]
    fn test_default_weights() {
        let scorer = LoadScorer::default();
        let score = scorer.score(&metrics(2, &[400.0, 600.0], 1));
        assert!((score - (200.0 + 0.5 + 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unprobed_node_sorts_last() {
        let scorer = LoadScorer::default();
        assert_eq!(scorer.score(&metrics(0, &[], 0)), f64::INFINITY);
        assert!(scorer.score(&metrics(50, &[60_000.0], 20)) < f64::INFINITY);
    }

    #[test]
    fn test_score_is_monotonic_in_each_term() {
        let scorer = LoadScorer::default();

        let mut previous = f64::NEG_INFINITY;
        for active in 0..5 {
            let score = scorer.score(&metrics(active, &[100.0], 1));
            assert!(score >= previous);
            previous = score;
        }

        let mut previous = f64::NEG_INFINITY;
        for latency in [0.0, 10.0, 250.0, 5_000.0] {
            let score = scorer.score(&metrics(1, &[latency], 1));
            assert!(score >= previous);
            previous = score;
        }

        let mut previous = f64::NEG_INFINITY;
        for failures in 0..5 {
            let score = scorer.score(&metrics(1, &[100.0], failures));
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_custom_weights() {
        let scorer = LoadScorer::new(ScoringWeights {
            active: 0.0,
            latency: 10.0,
            failures: 0.0,
        });
        assert_eq!(scorer.score(&metrics(7, &[500.0], 3)), 5.0);
    }
}
