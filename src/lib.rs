//! # ensayo: experiment orchestration for iterative model training
//!
//! ensayo drives epochs of batched optimization steps against an external
//! model, checkpoints progress for mid-epoch resume, runs per-epoch
//! evaluation, applies early stopping, and coordinates sweeps of
//! configuration variants whose results aggregate into markdown comparison
//! tables.
//!
//! ## Architecture
//!
//! - **model** / **dataset**: capability traits for the external
//!   collaborators (the numeric step, the data)
//! - **train**: progress tracking, batch size scheduling, the training
//!   loop controller, evaluation, early stopping
//! - **checkpoint**: enumerated checkpoint kinds with atomic persistence
//! - **sweep**: sequential or process-isolated variant execution
//! - **report**: cross-run aggregation and table rendering
//! - **config**: YAML schema, validation, environment expansion, CLI
//! - **registry**: explicit name → factory resolution for models/datasets
//! - **results**: the per-run `results.json` store
//! - **builtin**: reference model/dataset pair for smoke runs

pub mod builtin;
pub mod checkpoint;
pub mod config;
pub mod console;
pub mod dataset;
pub mod model;
pub mod registry;
pub mod report;
pub mod results;
pub mod sweep;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use checkpoint::{CheckpointKind, CheckpointState, CheckpointStore, ResumePoint};
pub use dataset::Dataset;
pub use error::{Error, Result};
pub use model::{Batch, Model, StepError};
pub use registry::Registry;
pub use train::{ModelReport, TrainingLoop};
