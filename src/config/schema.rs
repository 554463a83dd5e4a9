//! YAML schema for experiment configuration
//!
//! An experiment names a model and a dataset (resolved via the registry),
//! training/test parameters, and one or more environments: sweep
//! dimensions whose value combinations expand into fully-resolved run
//! configurations at load time.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::train::{BatchSizeSchedule, SelectModel};

/// Complete experiment specification as parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Configuration identifier; names the report artifact and log dirs.
    pub name: String,

    /// Model name, resolved via the model registry.
    pub model: String,

    /// Dataset name, resolved via the dataset registry.
    pub dataset: String,

    #[serde(default)]
    pub train: TrainParams,

    #[serde(default)]
    pub test: TestParams,

    /// Sweep environments. Empty means one implicit environment with a
    /// single variant.
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,

    /// Base directory for per-run logs, checkpoints, and results.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainParams {
    #[serde(default = "default_epochs")]
    pub num_epochs: u32,

    /// Fixed batch size or a progress-threshold schedule.
    #[serde(default)]
    pub batch_size: BatchSizeSpec,

    /// Save cadence in samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_interval: Option<usize>,

    /// Log cadence in samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_interval: Option<usize>,

    #[serde(default)]
    pub shuffle: bool,

    #[serde(default)]
    pub select_model: SelectModel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stop: Option<EarlyStopSpec>,

    /// Number of cross-validation folds; absent means a single run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<u32>,

    /// Validation set name, when the dataset provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_set: Option<String>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            num_epochs: default_epochs(),
            batch_size: BatchSizeSpec::default(),
            save_interval: None,
            log_interval: None,
            shuffle: false,
            select_model: SelectModel::default(),
            early_stop: None,
            cross_validation: None,
            valid_set: None,
        }
    }
}

/// Evaluation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParams {
    /// Evaluation batch size; defaults to the training base size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Monitored metric names.
    #[serde(default)]
    pub metrics: Vec<String>,

    /// Test set names, evaluated in order every epoch.
    #[serde(default)]
    pub test_sets: Vec<String>,

    /// Persist raw per-sample outputs after each evaluation.
    #[serde(default)]
    pub output: bool,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            batch_size: None,
            metrics: Vec::new(),
            test_sets: Vec::new(),
            output: false,
        }
    }
}

/// Early stopping parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EarlyStopSpec {
    /// Window size in epochs.
    pub num_epochs: usize,

    /// Minimum loss improvement; defaults to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_diff: Option<f32>,
}

/// Batch size: a single number or a `{threshold: size}` schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSizeSpec {
    Fixed(usize),
    Scheduled(BTreeMap<u8, usize>),
}

impl Default for BatchSizeSpec {
    fn default() -> Self {
        BatchSizeSpec::Fixed(32)
    }
}

impl BatchSizeSpec {
    /// Build the validated schedule, scaled by the run's device count.
    pub fn to_schedule(&self, device_count: usize) -> Result<BatchSizeSchedule> {
        let schedule = match self {
            BatchSizeSpec::Fixed(size) => BatchSizeSchedule::fixed(*size)?,
            BatchSizeSpec::Scheduled(map) => {
                BatchSizeSchedule::new(map.iter().map(|(&t, &s)| (t, s)))?
            }
        };
        Ok(schedule.scaled_by_devices(device_count))
    }
}

/// One sweep environment: named variable dimensions and a report layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Whether this environment runs when none is selected explicitly.
    #[serde(default = "default_true")]
    pub default: bool,

    /// Ordered sweep dimensions.
    #[serde(default)]
    pub variables: Vec<VariableSpec>,

    #[serde(default)]
    pub report: ReportSpec,
}

/// One sweep dimension: a variable name and its candidate values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub values: Vec<Value>,
}

/// Report layout for an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportSpec {
    /// Flat table over the non-reduced variables.
    Raw {
        /// Variable dimensions to collapse; their results join into one
        /// cell per remaining tuple.
        #[serde(default)]
        reduce: Vec<String>,
    },
    /// Two-dimensional pivot, one grid per metric.
    Table { row: String, col: String },
}

impl Default for ReportSpec {
    fn default() -> Self {
        ReportSpec::Raw { reduce: Vec::new() }
    }
}

/// Fully-resolved configuration for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Experiment (configuration) identifier.
    pub experiment: String,
    pub env_name: String,
    pub model: String,
    pub dataset: String,
    pub train: TrainParams,
    pub test: TestParams,
    /// Variable assignments that are not core training parameters;
    /// consumed by model/dataset factories.
    pub overrides: HashMap<String, Value>,
    /// Accelerator assignment, chosen once at load time and fixed for the
    /// run's lifetime.
    pub gpu: Vec<u32>,
    /// Per-run log directory.
    pub log_dir: PathBuf,
}

impl RunConfig {
    /// Apply one sweep variable. Core training parameters are recognized
    /// by name; everything else lands in `overrides` for the factories.
    pub fn apply_variable(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "batch_size" => {
                let size = value.as_u64().ok_or_else(|| {
                    crate::error::Error::Config(format!("batch_size variable must be an integer, got {value}"))
                })?;
                self.train.batch_size = BatchSizeSpec::Fixed(size as usize);
            }
            "num_epochs" => {
                let epochs = value.as_u64().ok_or_else(|| {
                    crate::error::Error::Config(format!("num_epochs variable must be an integer, got {value}"))
                })?;
                self.train.num_epochs = epochs as u32;
            }
            _ => {
                self.overrides.insert(name.to_string(), value.clone());
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            experiment: "test".into(),
            env_name: "main".into(),
            model: "model".into(),
            dataset: "dataset".into(),
            train: TrainParams::default(),
            test: TestParams::default(),
            overrides: HashMap::new(),
            gpu: Vec::new(),
            log_dir: PathBuf::from("logs/test"),
        }
    }
}

/// Display form of a variable value: bare strings stay unquoted.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn default_epochs() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
name: demo
model: linear
dataset: synthetic
"#;
        let spec: ExperimentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.train.num_epochs, 10);
        assert_eq!(spec.train.batch_size, BatchSizeSpec::Fixed(32));
        assert!(spec.environments.is_empty());
    }

    #[test]
    fn test_parse_scheduled_batch_size() {
        let yaml = r#"
name: demo
model: linear
dataset: synthetic
train:
  num_epochs: 5
  batch_size:
    0: 16
    50: 32
"#;
        let spec: ExperimentSpec = serde_yaml::from_str(yaml).unwrap();
        let BatchSizeSpec::Scheduled(map) = &spec.train.batch_size else {
            panic!("expected schedule");
        };
        assert_eq!(map[&0], 16);
        assert_eq!(map[&50], 32);
        let schedule = spec.train.batch_size.to_schedule(1).unwrap();
        assert_eq!(schedule.base_size(), 16);
    }

    #[test]
    fn test_parse_environments_and_report() {
        let yaml = r#"
name: sweep
model: linear
dataset: synthetic
environments:
  - name: lr-sweep
    variables:
      - name: lr
        values: [0.1, 0.01]
      - name: batch_size
        values: [16, 32]
    report:
      type: table
      row: lr
      col: batch_size
"#;
        let spec: ExperimentSpec = serde_yaml::from_str(yaml).unwrap();
        let env = &spec.environments[0];
        assert_eq!(env.variables.len(), 2);
        assert!(env.default);
        assert!(matches!(&env.report, ReportSpec::Table { row, col }
            if row == "lr" && col == "batch_size"));
    }

    #[test]
    fn test_apply_variable() {
        let mut config = RunConfig::for_tests();
        config
            .apply_variable("batch_size", &serde_json::json!(64))
            .unwrap();
        assert_eq!(config.train.batch_size, BatchSizeSpec::Fixed(64));

        config.apply_variable("lr", &serde_json::json!(0.1)).unwrap();
        assert_eq!(config.overrides["lr"], serde_json::json!(0.1));

        assert!(config
            .apply_variable("batch_size", &serde_json::json!("big"))
            .is_err());
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&serde_json::json!("adam")), "adam");
        assert_eq!(value_to_string(&serde_json::json!(0.1)), "0.1");
        assert_eq!(value_to_string(&serde_json::json!(32)), "32");
    }
}
