//! Sweep coordination
//!
//! Launches one training run per configuration variant, sequentially in
//! this process or in isolated child processes (parallel mode, staggered
//! starts). Completed reports flow to a single consumer through a channel;
//! no result state is shared between writers.

use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use tracing::{info, warn};

use crate::checkpoint::CheckpointKind;
use crate::config::{Environment, RunConfig};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::train::{Datasets, EarlyStopPolicy, ModelReport, TrainOptions, TrainingLoop};

/// Run-level flags threaded from the CLI into each training run.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Checkpoint to resume from.
    pub load: Option<CheckpointKind>,
    pub save_all: bool,
    pub output_test_samples: bool,
    pub show_progress: bool,
}

/// A completed (or epoch-snapshotted) run, keyed for aggregation.
#[derive(Debug, Clone)]
pub struct SweepCompletion {
    pub env_name: String,
    pub variable_values: Vec<String>,
    pub report: ModelReport,
}

/// Sweep execution policy.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Isolated child process per variant instead of inline execution.
    pub parallel: bool,
    /// Delay between child process launches; reduces resource-acquisition
    /// races on shared accelerators.
    pub stagger: Duration,
    /// Configuration file passed to child processes.
    pub config_path: PathBuf,
    pub args: RunArgs,
    /// Forward debug logging to children.
    pub debug: bool,
}

impl SweepOptions {
    pub fn sequential(config_path: impl Into<PathBuf>, args: RunArgs) -> Self {
        Self {
            parallel: false,
            stagger: Duration::from_secs(5),
            config_path: config_path.into(),
            args,
            debug: false,
        }
    }
}

/// Coordinates one sweep over a set of environments.
pub struct SweepCoordinator<'a> {
    registry: &'a Registry,
    options: SweepOptions,
}

impl<'a> SweepCoordinator<'a> {
    pub fn new(registry: &'a Registry, options: SweepOptions) -> Self {
        Self { registry, options }
    }

    /// Run every variant of every environment. `on_update` is the single
    /// consumer of completions; in sequential mode it also receives
    /// per-epoch snapshots for incremental reporting.
    pub fn run(
        &self,
        environments: &[Environment],
        on_update: &mut dyn FnMut(SweepCompletion),
    ) -> Result<()> {
        if self.options.parallel {
            self.run_parallel(environments, on_update)
        } else {
            self.run_sequential(environments, on_update)
        }
    }

    fn run_sequential(
        &self,
        environments: &[Environment],
        on_update: &mut dyn FnMut(SweepCompletion),
    ) -> Result<()> {
        for env in environments {
            for (values, config) in env.variables_list.iter().zip(&env.configs_list) {
                info!("starting run: env '{}', variables {:?}", env.name, values);
                let report = run_variant(self.registry, config, &self.options.args, &mut |snapshot| {
                    on_update(SweepCompletion {
                        env_name: env.name.clone(),
                        variable_values: values.clone(),
                        report: snapshot.clone(),
                    });
                })?;
                on_update(SweepCompletion {
                    env_name: env.name.clone(),
                    variable_values: values.clone(),
                    report,
                });
            }
        }
        Ok(())
    }

    /// One isolated child process per variant. Children are launched with
    /// a mandatory stagger delay; their final reports come back through
    /// per-child waiter threads into one channel.
    fn run_parallel(
        &self,
        environments: &[Environment],
        on_update: &mut dyn FnMut(SweepCompletion),
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel::<Result<SweepCompletion>>();
        let mut expected = 0usize;

        std::thread::scope(|scope| {
            for env in environments {
                for (index, (values, config)) in
                    env.variables_list.iter().zip(&env.configs_list).enumerate()
                {
                    let child = self.spawn_child(&env.name, index)?;
                    info!(
                        "launched variant {index} of '{}' (pid {})",
                        env.name,
                        child.id()
                    );
                    expected += 1;

                    let tx = tx.clone();
                    let env_name = env.name.clone();
                    let values = values.clone();
                    let config = config.clone();
                    scope.spawn(move || {
                        let result = wait_for_child(child, &env_name, &values, &config);
                        // the receiver hanging up means the sweep already
                        // failed; nothing left to report to
                        let _ = tx.send(result);
                    });

                    std::thread::sleep(self.options.stagger);
                }
            }
            drop(tx);

            let mut first_error = None;
            for _ in 0..expected {
                match rx.recv() {
                    Ok(Ok(completion)) => on_update(completion),
                    Ok(Err(e)) => {
                        warn!("variant failed: {e}");
                        first_error.get_or_insert(e);
                    }
                    Err(_) => break,
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn spawn_child(&self, env_name: &str, variant: usize) -> Result<std::process::Child> {
        let exe = std::env::current_exe()?;
        let mut cmd = Command::new(exe);
        cmd.arg("train")
            .arg(&self.options.config_path)
            .arg("--env")
            .arg(env_name)
            .arg("--variant")
            .arg(variant.to_string());
        if let Some(kind) = &self.options.args.load {
            cmd.arg("--load").arg(kind.tag());
        }
        if self.options.args.save_all {
            cmd.arg("--save-all");
        }
        if self.options.args.output_test_samples {
            cmd.arg("--output-test-samples");
        }
        if self.options.debug {
            cmd.arg("--debug");
        }
        Ok(cmd.spawn()?)
    }
}

fn wait_for_child(
    child: std::process::Child,
    env_name: &str,
    values: &[String],
    config: &RunConfig,
) -> Result<SweepCompletion> {
    let failed = |reason: String| Error::RunFailed {
        env: env_name.to_string(),
        variant: values.to_vec(),
        reason,
    };

    let status = child
        .wait_with_output()
        .map_err(|e| failed(e.to_string()))?
        .status;
    if !status.success() {
        return Err(failed(format!("child exited with {status}")));
    }
    let report = read_child_report(config)?;
    Ok(SweepCompletion {
        env_name: env_name.to_string(),
        variable_values: values.to_vec(),
        report,
    })
}

/// Where a parallel-mode child leaves its final report for the parent.
pub fn child_report_path(config: &RunConfig) -> PathBuf {
    config.log_dir.join("report.json")
}

/// Persist a child run's final report for the coordinating parent.
pub fn write_child_report(config: &RunConfig, report: &ModelReport) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;
    std::fs::write(child_report_path(config), serde_json::to_vec_pretty(report)?)?;
    Ok(())
}

fn read_child_report(config: &RunConfig) -> Result<ModelReport> {
    let data = std::fs::read(child_report_path(config))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Execute one variant inline: single run, or the cross-validation driver
/// when folds are configured. `on_epoch` receives report snapshots at
/// epoch boundaries.
pub fn run_variant(
    registry: &Registry,
    config: &RunConfig,
    args: &RunArgs,
    on_epoch: &mut dyn FnMut(&ModelReport),
) -> Result<ModelReport> {
    match config.train.cross_validation {
        Some(folds) => run_cross_validation(registry, config, args, folds, on_epoch),
        None => run_single(registry, config, args, None, on_epoch),
    }
}

fn run_single(
    registry: &Registry,
    config: &RunConfig,
    args: &RunArgs,
    fold: Option<(u32, u32)>,
    on_epoch: &mut dyn FnMut(&ModelReport),
) -> Result<ModelReport> {
    let datasets = build_datasets(registry, config)?;
    let model = registry.create_model(&config.model, config, &*datasets.train)?;
    let options = build_train_options(config, args)?;

    let mut controller = TrainingLoop::new(model, datasets, options)?;
    if let Some((current, total)) = fold {
        controller.report_mut().set_fold(current, total);
    }
    if let Some(kind) = &args.load {
        controller.load_checkpoint(kind)?;
    }
    controller.run(on_epoch)
}

/// Train/evaluate over `folds` repetitions; per-metric fold results are
/// aggregated by mean.
fn run_cross_validation(
    registry: &Registry,
    config: &RunConfig,
    args: &RunArgs,
    folds: u32,
    on_epoch: &mut dyn FnMut(&ModelReport),
) -> Result<ModelReport> {
    if args.load.is_some() {
        warn!("checkpoint resume is ignored under cross validation");
    }
    let plain_args = RunArgs {
        load: None,
        ..args.clone()
    };

    let mut fold_reports = Vec::with_capacity(folds as usize);
    for fold in 1..=folds {
        info!("cross validation fold {fold}/{folds}");
        let mut fold_config = config.clone();
        fold_config.log_dir = config.log_dir.join(format!("fold_{fold:02}"));
        let report = run_single(
            registry,
            &fold_config,
            &plain_args,
            Some((fold, folds)),
            on_epoch,
        )?;
        fold_reports.push(report);
    }

    let mut aggregate = fold_reports.last().cloned().expect("folds >= 2 validated");
    for metric in aggregate.metrics.clone() {
        let values: Vec<f64> = fold_reports
            .iter()
            .filter_map(|r| r.current_results.get(&metric).copied())
            .collect();
        if !values.is_empty() {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            aggregate.current_results.insert(metric, mean);
        }
    }
    aggregate.set_fold(folds, folds);
    aggregate.finish();
    Ok(aggregate)
}

/// Instantiate every dataset split a run needs.
pub fn build_datasets(registry: &Registry, config: &RunConfig) -> Result<Datasets> {
    let train = registry.create_dataset(&config.dataset, config, "train")?;
    let valid = match &config.train.valid_set {
        Some(name) => Some(registry.create_dataset(&config.dataset, config, name)?),
        None => None,
    };
    let mut tests = Vec::with_capacity(config.test.test_sets.len());
    for name in &config.test.test_sets {
        tests.push((
            name.clone(),
            registry.create_dataset(&config.dataset, config, name)?,
        ));
    }
    Ok(Datasets { train, valid, tests })
}

/// Translate a run configuration plus CLI flags into loop options.
pub fn build_train_options(config: &RunConfig, args: &RunArgs) -> Result<TrainOptions> {
    let schedule = config.train.batch_size.to_schedule(config.gpu.len())?;
    let early_stop = config
        .train
        .early_stop
        .map(|es| EarlyStopPolicy::new(es.num_epochs, es.min_diff.unwrap_or(0.0)));
    Ok(TrainOptions {
        num_epochs: config.train.num_epochs,
        schedule,
        save_interval: config.train.save_interval,
        log_interval: config.train.log_interval,
        shuffle: config.train.shuffle,
        select_model: config.train.select_model,
        early_stop,
        save_all_epochs: args.save_all,
        eval_batch_size: config.test.batch_size,
        metrics: config.test.metrics.clone(),
        log_dir: Some(config.log_dir.clone()),
        output_test_samples: args.output_test_samples || config.test.output,
        show_progress: args.show_progress,
    })
}
