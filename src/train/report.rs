//! Per-run result record

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Mutable record of one training run, updated every epoch and snapshotted
/// for the sweep coordinator at epoch boundaries.
///
/// Serializable so parallel-mode child processes can hand their final
/// report back to the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelReport {
    /// Monitored metric names, in configuration order.
    pub metrics: Vec<String>,

    /// Training loss per completed epoch.
    pub epoch_losses: Vec<f32>,

    /// Validation results per completed epoch (empty without a validation
    /// set).
    pub epoch_valid_results: Vec<HashMap<String, f64>>,

    /// Test results per completed epoch.
    pub epoch_test_results: Vec<HashMap<String, f64>>,

    /// Best-selected results under the run's selection policy.
    pub current_results: HashMap<String, f64>,

    /// Set at natural completion or early stop.
    pub finished: bool,

    pub cross_validation_current_fold: Option<u32>,
    pub cross_validation_num_folds: Option<u32>,

    pub current_epoch: u32,
    pub num_epochs: u32,
}

impl ModelReport {
    pub fn new(metrics: Vec<String>, num_epochs: u32) -> Self {
        Self {
            metrics,
            num_epochs,
            ..Default::default()
        }
    }

    /// Reset per-run history; used between cross-validation folds.
    pub fn reset_history(&mut self) {
        self.epoch_losses.clear();
        self.epoch_valid_results.clear();
        self.epoch_test_results.clear();
        self.current_results.clear();
        self.current_epoch = 0;
    }

    pub fn set_fold(&mut self, current: u32, total: u32) {
        self.cross_validation_current_fold = Some(current);
        self.cross_validation_num_folds = Some(total);
    }

    /// Mark the run complete.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Lowest epoch loss recorded so far.
    pub fn min_loss(&self) -> Option<f32> {
        self.epoch_losses
            .iter()
            .copied()
            .min_by(|a, b| a.partial_cmp(b).expect("loss is not NaN"))
    }
}
