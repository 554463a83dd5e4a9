//! Model capability seam
//!
//! The numeric side of training (gradient computation, parameter updates,
//! inference) lives behind the [`Model`] trait. ensayo drives the loop and
//! never looks inside a batch: a [`Batch`] is a group of sample ids that the
//! model resolves against its own view of the dataset.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::CheckpointKind;
use crate::error::Result;

/// A group of samples processed in one optimization step.
///
/// Carries sample ids only; the model and dataset agree on what an id
/// resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Ids of the samples in this batch, in dataset order.
    pub ids: Vec<usize>,
}

impl Batch {
    pub fn new(ids: Vec<usize>) -> Self {
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Failure of a single training or inference step.
///
/// Only [`StepError::ResourceExhausted`] is fatal; everything else is
/// logged and the loop moves on to the next batch.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("empty batch")]
    EmptyBatch,

    /// Accelerator or host memory exhausted. Not retried: the controller
    /// saves an emergency checkpoint and aborts the run.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("step failed: {0}")]
    Failed(String),
}

impl StepError {
    /// Fatal errors terminate the run; recoverable ones skip the batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::ResourceExhausted(_))
    }
}

/// Output of one inference pass over a batch.
///
/// Predictions and references are index-aligned with the batch's sample
/// ids. `extras` carries auxiliary model outputs (attention maps, beam
/// candidates, …) that only `write_summary` consumers interpret.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    pub predictions: Vec<Value>,
    pub references: Vec<Value>,
    pub extras: Vec<Value>,
}

/// The model capability consumed by the training loop.
///
/// Implementations own the parameters, the optimizer, and the running
/// per-epoch loss aggregate. The controller mutates nothing numeric; it
/// only sequences calls and bookkeeps progress.
pub trait Model: Send {
    /// Run one optimization step over `batch`, returning its loss.
    fn training_step(&mut self, batch: &Batch) -> std::result::Result<f32, StepError>;

    /// Run inference over `batch` without updating parameters.
    fn infer(&mut self, batch: &Batch) -> std::result::Result<Inference, StepError>;

    /// Auxiliary scalar metrics for progress display (exact match rate,
    /// gradient norm, …). May be empty.
    fn get_metrics(&self) -> Vec<(String, f64)> {
        Vec::new()
    }

    /// Running loss aggregate for the current epoch. The controller reports
    /// this value and never recomputes it.
    fn epoch_loss(&self) -> f32;

    /// Completed samples across all epochs.
    fn global_step(&self) -> u64;

    fn set_global_step(&mut self, step: u64);

    /// Persist a named snapshot of model state plus the global step.
    fn save_checkpoint(&mut self, kind: &CheckpointKind) -> Result<()>;

    /// Restore a named snapshot. Returns the run id the snapshot belongs
    /// to, so a resumed run keeps logging under the same identity.
    fn load_checkpoint(&mut self, kind: &CheckpointKind) -> Result<String>;

    /// Reset per-epoch accumulators (epoch loss, step metrics).
    fn reset_counter(&mut self);

    /// Hook invoked after the last batch of an epoch.
    fn end_training_epoch(&mut self) {}

    /// Write per-batch summary data for offline inspection.
    fn write_summary(&mut self, _writer: &mut SummaryWriter, _batch: &Batch, _outputs: &Inference) {
    }
}

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    step: u64,
    value: f64,
}

/// Line-oriented scalar event log, one JSON object per line.
///
/// Stands in for a full summary backend: cheap to write during training,
/// trivial to post-process.
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    /// Create or truncate the event log at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self { path, out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one scalar event.
    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let event = ScalarEvent { tag, step, value };
        serde_json::to_writer(&mut self.out, &event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
