//! Early stopping policy
//!
//! Decisions happen only at epoch boundaries, from the run's recorded
//! history. Two modes: validation-driven when a validation set exists,
//! loss-driven otherwise.

use std::collections::HashMap;

/// Window-based stall detection over metric or loss history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStopPolicy {
    /// Number of trailing epochs inspected for improvement.
    window: usize,
    /// Minimum loss decrease that still counts as improvement (loss mode).
    min_delta: f32,
}

impl EarlyStopPolicy {
    pub fn new(window: usize, min_delta: f32) -> Self {
        Self { window, min_delta }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Validation-driven decision.
    ///
    /// With history length L > window, stop iff for *every* monitored
    /// metric the best value of the last `window` epochs does not exceed
    /// the best value of the earlier epochs. No decision while L ≤ window.
    pub fn should_stop_on_validation(
        &self,
        metrics: &[String],
        history: &[HashMap<String, f64>],
    ) -> bool {
        if history.len() <= self.window || metrics.is_empty() {
            return false;
        }
        let (head, tail) = history.split_at(history.len() - self.window);
        metrics.iter().all(|metric| {
            let head_max = window_max(head, metric);
            let tail_max = window_max(tail, metric);
            match (head_max, tail_max) {
                (Some(head), Some(tail)) => tail <= head,
                // a metric missing from a window yields no verdict
                _ => false,
            }
        })
    }

    /// Loss-driven decision.
    ///
    /// With history length L > window, stop iff the minimum loss of the
    /// last `window` epochs improved on the earlier minimum by at most
    /// `min_delta`.
    pub fn should_stop_on_loss(&self, losses: &[f32]) -> bool {
        if losses.len() <= self.window {
            return false;
        }
        let (head, tail) = losses.split_at(losses.len() - self.window);
        let head_min = head.iter().copied().fold(f32::INFINITY, f32::min);
        let tail_min = tail.iter().copied().fold(f32::INFINITY, f32::min);
        head_min - tail_min <= self.min_delta
    }
}

fn window_max(window: &[HashMap<String, f64>], metric: &str) -> Option<f64> {
    window
        .iter()
        .filter_map(|epoch| epoch.get(metric).copied())
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(values: &[f64]) -> Vec<HashMap<String, f64>> {
        values
            .iter()
            .map(|&v| HashMap::from([("acc".to_string(), v)]))
            .collect()
    }

    #[test]
    fn test_validation_stop_on_stall() {
        // max(last 3) = 0.6 <= max(first 2) = 0.6 => stop
        let policy = EarlyStopPolicy::new(3, 0.0);
        let h = history(&[0.5, 0.6, 0.6, 0.59, 0.58]);
        assert!(policy.should_stop_on_validation(&["acc".into()], &h));
    }

    #[test]
    fn test_validation_continue_on_improvement() {
        // max(last 3) = 0.65 > max(first 2) = 0.6 => keep training
        let policy = EarlyStopPolicy::new(3, 0.0);
        let h = history(&[0.5, 0.6, 0.65, 0.64, 0.63]);
        assert!(!policy.should_stop_on_validation(&["acc".into()], &h));
    }

    #[test]
    fn test_validation_no_decision_within_window() {
        let policy = EarlyStopPolicy::new(3, 0.0);
        let h = history(&[0.5, 0.6, 0.6]);
        assert!(!policy.should_stop_on_validation(&["acc".into()], &h));
    }

    #[test]
    fn test_validation_requires_every_metric_stalled() {
        let policy = EarlyStopPolicy::new(2, 0.0);
        let mut h: Vec<HashMap<String, f64>> = history(&[0.5, 0.5, 0.5, 0.5]);
        // second metric still improving in the tail window
        for (i, epoch) in h.iter_mut().enumerate() {
            epoch.insert("f1".to_string(), 0.1 * i as f64);
        }
        let metrics = vec!["acc".to_string(), "f1".to_string()];
        assert!(!policy.should_stop_on_validation(&metrics, &h));
    }

    #[test]
    fn test_loss_stop_on_stall() {
        let policy = EarlyStopPolicy::new(2, 0.0);
        // min(head) = 1.0, min(tail) = 1.0 -> diff 0 <= 0 => stop
        assert!(policy.should_stop_on_loss(&[1.2, 1.0, 1.0, 1.1]));
    }

    #[test]
    fn test_loss_continue_on_improvement() {
        let policy = EarlyStopPolicy::new(2, 0.0);
        // min(head) = 1.0, min(tail) = 0.8 -> diff 0.2 > 0 => continue
        assert!(!policy.should_stop_on_loss(&[1.2, 1.0, 0.9, 0.8]));
    }

    #[test]
    fn test_loss_min_delta_threshold() {
        // improvement below min_delta is not improvement
        let policy = EarlyStopPolicy::new(2, 0.05);
        assert!(policy.should_stop_on_loss(&[1.0, 0.99, 0.98]));

        let policy = EarlyStopPolicy::new(2, 0.001);
        assert!(!policy.should_stop_on_loss(&[1.0, 0.99, 0.98]));
    }

    #[test]
    fn test_loss_no_decision_within_window() {
        let policy = EarlyStopPolicy::new(5, 0.0);
        assert!(!policy.should_stop_on_loss(&[1.0, 1.0, 1.0]));
    }
}
