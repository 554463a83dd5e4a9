//! CLI argument parsing
//!
//! Boundary layer only: flags map onto run options and environment
//! selection; no orchestration logic lives here.
//!
//! # Usage
//!
//! ```bash
//! ensayo train experiment.yaml
//! ensayo train experiment.yaml --env lr-sweep --parallel
//! ensayo train experiment.yaml --load latest
//! ensayo evaluate experiment.yaml --load best
//! ensayo validate experiment.yaml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ensayo: experiment orchestration for iterative model training
#[derive(Parser, Debug, Clone)]
#[command(name = "ensayo")]
#[command(version)]
#[command(about = "Training sweeps, checkpointed runs, and report aggregation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the configured training sweep
    Train(TrainArgs),

    /// Evaluate a checkpointed model on the configured test sets
    Evaluate(EvaluateArgs),

    /// Validate a configuration file without running anything
    Validate(ValidateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct TrainArgs {
    /// Path to YAML experiment configuration
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Resume from a checkpoint tag (latest, best, epoch-NN)
    #[arg(long)]
    pub load: Option<String>,

    /// Keep a checkpoint per epoch instead of overwriting `latest`
    #[arg(long)]
    pub save_all: bool,

    /// Persist raw per-sample evaluation outputs
    #[arg(long)]
    pub output_test_samples: bool,

    /// Render a terminal progress bar
    #[arg(long)]
    pub show_progress: bool,

    /// Environments to run (default: environments marked `default`)
    #[arg(long)]
    pub env: Vec<String>,

    /// Accelerator ids assigned to each run
    #[arg(long)]
    pub gpu: Vec<u32>,

    /// Run variants in isolated processes with a staggered start
    #[arg(long)]
    pub parallel: bool,

    /// Seconds between parallel process launches
    #[arg(long, default_value_t = 5)]
    pub stagger: u64,

    /// Run a single variant of a single environment (parallel-mode
    /// children only)
    #[arg(long, hide = true)]
    pub variant: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
pub struct EvaluateArgs {
    /// Path to YAML experiment configuration
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Checkpoint tag to evaluate (latest, best, epoch-NN)
    #[arg(long, default_value = "latest")]
    pub load: String,

    /// Environment to evaluate (default: first default environment)
    #[arg(long)]
    pub env: Option<String>,

    /// Variant index within the environment
    #[arg(long, default_value_t = 0)]
    pub variant: usize,

    /// Accelerator ids
    #[arg(long)]
    pub gpu: Vec<u32>,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to YAML experiment configuration
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}
