//! Error types for ensayo

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Invalid batch size schedule: {0}")]
    InvalidSchedule(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Run failed for variant {variant:?} of '{env}': {reason}")]
    RunFailed {
        env: String,
        variant: Vec<String>,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
