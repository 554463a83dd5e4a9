//! Built-in reference implementations
//!
//! A synthetic regression dataset and a one-parameter model, registered
//! under `synthetic` / `constant`. They exist to smoke-test the
//! orchestration end to end; real deployments register their own
//! implementations next to these.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde_json::{json, Value};

use crate::checkpoint::{CheckpointKind, CheckpointState, CheckpointStore};
use crate::config::RunConfig;
use crate::dataset::{BatchIter, Dataset, OutputTriple};
use crate::error::{Error, Result};
use crate::model::{Batch, Inference, Model, StepError};
use crate::registry::Registry;

/// Register the built-in model and dataset factories.
pub fn register_builtins(registry: &mut Registry) {
    registry.register_dataset("synthetic", |config, split| {
        Ok(Box::new(SyntheticDataset::new(
            match split {
                "train" => 256,
                _ => 64,
            },
            config.train.shuffle,
        )))
    });
    registry.register_model("constant", |config, train_set| {
        Ok(Box::new(ConstantModel::new(config, train_set.len())))
    });
}

/// Target function shared by the dataset and the reference model.
fn target(id: usize, n: usize) -> f64 {
    let x = id as f64 / n as f64;
    2.0 * x + 1.0
}

/// Synthetic linear-regression dataset: sample `i` maps to
/// `y = 2·(i/n) + 1`. Supports the `mse` metric (lower is better).
pub struct SyntheticDataset {
    order: Vec<usize>,
    shuffle: bool,
}

impl SyntheticDataset {
    pub fn new(n: usize, shuffle: bool) -> Self {
        Self {
            order: (0..n).collect(),
            shuffle,
        }
    }
}

impl Dataset for SyntheticDataset {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn shuffle(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut rand::rng());
        }
    }

    fn get_iter(&self, batch_size: usize, start: usize, end: usize) -> BatchIter<'_> {
        let mut pos = start;
        Box::new(std::iter::from_fn(move || {
            if pos >= end {
                return None;
            }
            let stop = (pos + batch_size).min(end);
            let batch = Batch::new(self.order[pos..stop].to_vec());
            pos = stop;
            Some(batch)
        }))
    }

    fn evaluate(
        &self,
        predictions: &[Value],
        references: &[Value],
        metric: &str,
        _output_path: Option<&Path>,
    ) -> Result<f64> {
        if metric != "mse" {
            return Err(Error::Evaluation(format!("unsupported metric '{metric}'")));
        }
        if predictions.is_empty() {
            return Ok(0.0);
        }
        let sum: f64 = predictions
            .iter()
            .zip(references)
            .map(|(p, r)| {
                let p = p.as_f64().unwrap_or(f64::NAN);
                let r = r.as_f64().unwrap_or(f64::NAN);
                (p - r) * (p - r)
            })
            .sum();
        Ok(sum / predictions.len() as f64)
    }

    fn format_output(&self, prediction: &Value, sample_id: usize) -> Result<OutputTriple> {
        let n = self.order.len();
        Ok(OutputTriple {
            input: format!("x={:.4}", sample_id as f64 / n as f64),
            reference: format!("{:.4}", target(sample_id, n)),
            hypothesis: prediction
                .as_f64()
                .map(|v| format!("{v:.4}"))
                .ok_or_else(|| Error::Evaluation(format!("non-numeric prediction {prediction}")))?,
        })
    }

    fn write_results_to_file(
        &self,
        predictions: &[Value],
        sample_ids: &[usize],
        output_path: &Path,
        tag: &str,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(output_path)?;
        let path = output_path.join(format!("outputs_{tag}.json"));
        let rows: Vec<Value> = sample_ids
            .iter()
            .zip(predictions)
            .map(|(id, pred)| json!({"id": id, "prediction": pred}))
            .collect();
        std::fs::write(&path, serde_json::to_vec_pretty(&rows)?)?;
        Ok(path)
    }

    fn is_better_result(&self, _metric: &str, a: f64, b: f64) -> bool {
        // mse: lower is better
        a < b
    }
}

/// One-parameter model predicting a constant, fitted by gradient descent
/// on mean squared error. Checkpoints through [`CheckpointStore`].
pub struct ConstantModel {
    c: f64,
    lr: f64,
    n: usize,
    run_id: String,
    global_step: u64,
    epoch_loss_sum: f64,
    epoch_batches: usize,
    store: CheckpointStore,
}

impl ConstantModel {
    pub fn new(config: &RunConfig, train_len: usize) -> Self {
        let lr = config
            .overrides
            .get("lr")
            .and_then(Value::as_f64)
            .unwrap_or(0.1);
        Self {
            c: 0.0,
            lr,
            n: train_len,
            run_id: format!("{}-{}", config.experiment, config.env_name),
            global_step: 0,
            epoch_loss_sum: 0.0,
            epoch_batches: 0,
            store: CheckpointStore::new(config.log_dir.join("checkpoints")),
        }
    }

    fn batch_loss(&self, batch: &Batch) -> f64 {
        let sum: f64 = batch
            .ids
            .iter()
            .map(|&id| {
                let err = self.c - target(id, self.n);
                err * err
            })
            .sum();
        sum / batch.len() as f64
    }
}

impl Model for ConstantModel {
    fn training_step(&mut self, batch: &Batch) -> std::result::Result<f32, StepError> {
        if batch.is_empty() {
            return Err(StepError::EmptyBatch);
        }
        let loss = self.batch_loss(batch);
        if !loss.is_finite() {
            return Err(StepError::Failed(format!("non-finite loss {loss}")));
        }

        let mean_target = batch.ids.iter().map(|&id| target(id, self.n)).sum::<f64>()
            / batch.len() as f64;
        self.c -= self.lr * 2.0 * (self.c - mean_target);

        self.epoch_loss_sum += loss;
        self.epoch_batches += 1;
        Ok(loss as f32)
    }

    fn infer(&mut self, batch: &Batch) -> std::result::Result<Inference, StepError> {
        Ok(Inference {
            predictions: vec![json!(self.c); batch.len()],
            references: batch.ids.iter().map(|&id| json!(target(id, self.n))).collect(),
            extras: Vec::new(),
        })
    }

    fn get_metrics(&self) -> Vec<(String, f64)> {
        vec![("c".to_string(), self.c)]
    }

    fn epoch_loss(&self) -> f32 {
        if self.epoch_batches == 0 {
            return 0.0;
        }
        (self.epoch_loss_sum / self.epoch_batches as f64) as f32
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn set_global_step(&mut self, step: u64) {
        self.global_step = step;
    }

    fn save_checkpoint(&mut self, kind: &CheckpointKind) -> Result<()> {
        self.store.save(
            kind,
            &CheckpointState {
                run_id: self.run_id.clone(),
                global_step: self.global_step,
                saved_at: chrono::Utc::now(),
                model_state: json!({"c": self.c}),
            },
        )
    }

    fn load_checkpoint(&mut self, kind: &CheckpointKind) -> Result<String> {
        let state = self.store.load(kind)?;
        self.c = state.model_state["c"].as_f64().unwrap_or(0.0);
        self.global_step = state.global_step;
        self.run_id = state.run_id.clone();
        Ok(state.run_id)
    }

    fn reset_counter(&mut self) {
        self.epoch_loss_sum = 0.0;
        self.epoch_batches = 0;
    }
}
