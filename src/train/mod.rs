//! Training loop orchestration
//!
//! The per-run control system: progress tracking, batch size scheduling,
//! the epoch loop itself, evaluation passes, and early stopping. The
//! numeric work lives behind the [`Model`](crate::model::Model) and
//! [`Dataset`](crate::dataset::Dataset) seams.

mod controller;
mod early_stop;
mod eval;
mod progress;
mod report;
mod schedule;

pub use controller::{Datasets, RunState, SelectModel, TrainOptions, TrainingLoop};
pub use early_stop::EarlyStopPolicy;
pub use eval::{evaluate, EvalOptions, EvaluationResult};
pub use progress::TrainingProgress;
pub use report::ModelReport;
pub use schedule::{BatchSizeSchedule, Segment};
