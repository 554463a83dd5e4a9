//! ensayo CLI
//!
//! Orchestrates training sweeps from a YAML experiment configuration.
//!
//! # Usage
//!
//! ```bash
//! # Run the configured sweep
//! ensayo train experiment.yaml
//!
//! # Isolated process per variant, staggered starts
//! ensayo train experiment.yaml --parallel
//!
//! # Resume from the latest checkpoint
//! ensayo train experiment.yaml --load latest
//!
//! # Evaluate a checkpointed model
//! ensayo evaluate experiment.yaml --load best
//!
//! # Validate the configuration without running
//! ensayo validate experiment.yaml
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ensayo::builtin::register_builtins;
use ensayo::checkpoint::CheckpointKind;
use ensayo::config::{
    expand_environments, load_spec, select_environments, validate_spec, Cli, Command,
    EvaluateArgs, TrainArgs, ValidateArgs,
};
use ensayo::error::Error;
use ensayo::report::ReportAggregator;
use ensayo::sweep::{self, RunArgs, SweepCoordinator, SweepOptions};
use ensayo::train::{evaluate, EvalOptions};
use ensayo::Registry;

/// Exit status for a fatal per-batch resource failure.
const FATAL_EXIT: u8 = 2;

const REPORTS_DIR: &str = "model_reports";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut registry = Registry::new();
    register_builtins(&mut registry);

    let result = match cli.command {
        Command::Train(args) => run_train(&registry, args, cli.debug),
        Command::Evaluate(args) => run_evaluate(&registry, args),
        Command::Validate(args) => run_validate(&registry, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::ResourceExhausted(_)) => {
            eprintln!("Fatal: {e}");
            ExitCode::from(FATAL_EXIT)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_load(tag: &Option<String>) -> Result<Option<CheckpointKind>, Error> {
    tag.as_deref()
        .map(|s| s.parse::<CheckpointKind>().map_err(Error::Config))
        .transpose()
}

fn run_train(registry: &Registry, args: TrainArgs, debug: bool) -> Result<(), Error> {
    let spec = load_spec(&args.config)?;
    validate_spec(&spec, registry).map_err(|e| Error::Config(e.to_string()))?;
    let environments = expand_environments(&spec, &args.gpu)?;

    let run_args = RunArgs {
        load: parse_load(&args.load)?,
        save_all: args.save_all,
        output_test_samples: args.output_test_samples,
        show_progress: args.show_progress,
    };

    // parallel-mode child: run exactly one variant and leave the report
    // for the coordinating parent
    if let Some(variant) = args.variant {
        let env_name = args
            .env
            .first()
            .ok_or_else(|| Error::Config("--variant requires --env".into()))?;
        let env = environments
            .iter()
            .find(|e| &e.name == env_name)
            .ok_or_else(|| Error::Config(format!("unknown environment '{env_name}'")))?;
        let config = env.configs_list.get(variant).ok_or_else(|| {
            Error::Config(format!(
                "environment '{env_name}' has no variant {variant} (of {})",
                env.configs_list.len()
            ))
        })?;
        let report = sweep::run_variant(registry, config, &run_args, &mut |_| {})?;
        sweep::write_child_report(config, &report)?;
        return Ok(());
    }

    let selected = select_environments(environments, &args.env);
    if selected.is_empty() {
        return Err(Error::Config("no environments selected".into()));
    }

    let options = SweepOptions {
        parallel: args.parallel,
        stagger: Duration::from_secs(args.stagger),
        config_path: args.config.clone(),
        args: run_args,
        debug,
    };
    let coordinator = SweepCoordinator::new(registry, options);

    let mut aggregator = ReportAggregator::new();
    let reports_dir = Path::new(REPORTS_DIR);
    coordinator.run(&selected, &mut |completion| {
        aggregator.update(
            &completion.env_name,
            &completion.variable_values,
            completion.report,
        );
        if let Err(e) = aggregator.write(&selected, &spec.name, reports_dir) {
            warn!("failed to write report: {e}");
        }
    })?;

    let path = aggregator.write(&selected, &spec.name, reports_dir)?;
    info!("report written to {}", path.display());
    Ok(())
}

fn run_evaluate(registry: &Registry, args: EvaluateArgs) -> Result<(), Error> {
    let spec = load_spec(&args.config)?;
    validate_spec(&spec, registry).map_err(|e| Error::Config(e.to_string()))?;
    let environments = expand_environments(&spec, &args.gpu)?;

    let env = match &args.env {
        Some(name) => environments
            .iter()
            .find(|e| &e.name == name)
            .ok_or_else(|| Error::Config(format!("unknown environment '{name}'")))?,
        None => environments
            .iter()
            .find(|e| e.default)
            .ok_or_else(|| Error::Config("no default environment".into()))?,
    };
    let config = env.configs_list.get(args.variant).ok_or_else(|| {
        Error::Config(format!(
            "environment '{}' has no variant {}",
            env.name, args.variant
        ))
    })?;

    let kind: CheckpointKind = args.load.parse().map_err(Error::Config)?;
    let datasets = sweep::build_datasets(registry, config)?;
    let mut model = registry.create_model(&config.model, config, &*datasets.train)?;
    let run_id = model.load_checkpoint(&kind)?;
    info!("loaded checkpoint '{kind}' (run {run_id})");

    let epoch = model.global_step() as f64 / datasets.train.len() as f64;
    let opts = EvalOptions {
        batch_size: config
            .test
            .batch_size
            .unwrap_or_else(|| config.train.batch_size.to_schedule(1).map(|s| s.base_size()).unwrap_or(32)),
        metrics: config.test.metrics.clone(),
        output_path: Some(config.log_dir.join("results")),
        output_tag: kind.tag(),
        write_outputs: config.test.output,
    };

    for (name, dataset) in &datasets.tests {
        info!("evaluate model on dataset '{name}'");
        let result = evaluate(&mut *model, &**dataset, epoch, &opts, None)?;
        println!("{name}:");
        let mut metrics: Vec<_> = result.results.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (metric, value) in metrics {
            println!("  {metric}: {value:.4}");
        }
    }
    Ok(())
}

fn run_validate(registry: &Registry, args: ValidateArgs) -> Result<(), Error> {
    let spec = load_spec(&args.config)?;
    validate_spec(&spec, registry).map_err(|e| Error::Config(e.to_string()))?;

    println!("Configuration is valid");
    println!("  Experiment: {}", spec.name);
    println!("  Model: {}", spec.model);
    println!("  Dataset: {}", spec.dataset);
    println!("  Epochs: {}", spec.train.num_epochs);
    let environments = expand_environments(&spec, &[])?;
    for env in &environments {
        println!(
            "  Environment '{}': {} variant(s)",
            env.name,
            env.configs_list.len()
        );
    }
    Ok(())
}
