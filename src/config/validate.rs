//! Configuration validation
//!
//! Every check runs at startup, before any training; a bad configuration
//! never degrades to a warning mid-run.

use super::schema::{ExperimentSpec, ReportSpec};
use crate::registry::Registry;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Experiment name must not be empty")]
    EmptyName,

    #[error("Unknown model '{0}' (not registered)")]
    UnknownModel(String),

    #[error("Unknown dataset '{0}' (not registered)")]
    UnknownDataset(String),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(u32),

    #[error("Invalid batch size schedule: {0}")]
    InvalidBatchSchedule(String),

    #[error("Invalid evaluation batch size: {0} (must be > 0)")]
    InvalidEvalBatchSize(usize),

    #[error("No metrics configured but evaluation sets are present")]
    MissingMetrics,

    #[error("Invalid early stopping window: {0} (must be > 0)")]
    InvalidEarlyStopWindow(usize),

    #[error("Invalid cross validation folds: {0} (must be >= 2)")]
    InvalidCrossValidation(u32),

    #[error("Environment '{env}': variable '{variable}' has no values")]
    EmptyVariable { env: String, variable: String },

    #[error("Environment '{env}': duplicate variable '{variable}'")]
    DuplicateVariable { env: String, variable: String },

    #[error("Environment '{env}': report references unknown variable '{variable}'")]
    UnknownReportVariable { env: String, variable: String },

    #[error("Environment '{env}': pivot row and column must differ")]
    DegeneratePivot { env: String },
}

/// Validate an experiment specification against the registry.
pub fn validate_spec(spec: &ExperimentSpec, registry: &Registry) -> Result<(), ValidationError> {
    if spec.name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if !registry.has_model(&spec.model) {
        return Err(ValidationError::UnknownModel(spec.model.clone()));
    }
    if !registry.has_dataset(&spec.dataset) {
        return Err(ValidationError::UnknownDataset(spec.dataset.clone()));
    }

    if spec.train.num_epochs == 0 {
        return Err(ValidationError::InvalidEpochs(spec.train.num_epochs));
    }

    spec.train
        .batch_size
        .to_schedule(1)
        .map_err(|e| ValidationError::InvalidBatchSchedule(e.to_string()))?;

    if let Some(size) = spec.test.batch_size {
        if size == 0 {
            return Err(ValidationError::InvalidEvalBatchSize(size));
        }
    }

    let evaluates = !spec.test.test_sets.is_empty() || spec.train.valid_set.is_some();
    if evaluates && spec.test.metrics.is_empty() {
        return Err(ValidationError::MissingMetrics);
    }

    if let Some(early_stop) = &spec.train.early_stop {
        if early_stop.num_epochs == 0 {
            return Err(ValidationError::InvalidEarlyStopWindow(early_stop.num_epochs));
        }
    }

    if let Some(folds) = spec.train.cross_validation {
        if folds < 2 {
            return Err(ValidationError::InvalidCrossValidation(folds));
        }
    }

    for env in &spec.environments {
        let mut seen = std::collections::HashSet::new();
        for variable in &env.variables {
            if variable.values.is_empty() {
                return Err(ValidationError::EmptyVariable {
                    env: env.name.clone(),
                    variable: variable.name.clone(),
                });
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(ValidationError::DuplicateVariable {
                    env: env.name.clone(),
                    variable: variable.name.clone(),
                });
            }
        }

        match &env.report {
            ReportSpec::Raw { reduce } => {
                for name in reduce {
                    if !seen.contains(name.as_str()) {
                        return Err(ValidationError::UnknownReportVariable {
                            env: env.name.clone(),
                            variable: name.clone(),
                        });
                    }
                }
            }
            ReportSpec::Table { row, col } => {
                for name in [row, col] {
                    if !seen.contains(name.as_str()) {
                        return Err(ValidationError::UnknownReportVariable {
                            env: env.name.clone(),
                            variable: name.clone(),
                        });
                    }
                }
                if row == col {
                    return Err(ValidationError::DegeneratePivot {
                        env: env.name.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
