//! Training loop controller
//!
//! Drives one run: epochs of scheduled batches against the [`Model`]
//! capability, checkpoint cadence, per-epoch evaluation, best-result
//! selection, and early stopping. Resumes mid-epoch from the model's
//! persisted global step.
//!
//! Failure discipline per batch: an empty batch or a failed step is logged
//! and skipped without touching progress state; resource exhaustion saves
//! an emergency `latest` checkpoint and aborts the run with a distinct
//! error that the binary maps to the fatal exit status.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointKind, ResumePoint};
use crate::console::ProgressBar;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::model::{Model, SummaryWriter};
use crate::results::ResultsStore;
use crate::train::early_stop::EarlyStopPolicy;
use crate::train::eval::{evaluate, EvalOptions, EvaluationResult};
use crate::train::progress::TrainingProgress;
use crate::train::report::ModelReport;
use crate::train::schedule::BatchSizeSchedule;

/// Lifecycle of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Evaluating,
    /// Finished naturally or by early stop.
    Stopped,
    /// Terminated by a fatal error after the emergency checkpoint.
    Aborted,
}

/// Which epoch's results a run reports as current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectModel {
    /// Always the most recent epoch.
    Last,
    /// The best epoch: lowest training loss without a validation set,
    /// per-metric best validation result with one.
    #[default]
    Best,
}

/// The datasets one run trains and evaluates against.
pub struct Datasets {
    pub train: Box<dyn Dataset>,
    pub valid: Option<Box<dyn Dataset>>,
    /// Named test sets, evaluated in order every epoch.
    pub tests: Vec<(String, Box<dyn Dataset>)>,
}

/// Settings for one training run.
pub struct TrainOptions {
    pub num_epochs: u32,
    pub schedule: BatchSizeSchedule,
    /// Save cadence in samples; `None` saves only at explicit points.
    pub save_interval: Option<usize>,
    /// Log cadence in samples.
    pub log_interval: Option<usize>,
    pub shuffle: bool,
    pub select_model: SelectModel,
    pub early_stop: Option<EarlyStopPolicy>,
    /// Keep a checkpoint per epoch (`epoch-NN`) instead of overwriting
    /// `latest`.
    pub save_all_epochs: bool,
    /// Evaluation batch size; falls back to the schedule's base size.
    pub eval_batch_size: Option<usize>,
    /// Metrics monitored and reported.
    pub metrics: Vec<String>,
    /// Run directory for the results store, summary events, and
    /// evaluation side outputs. `None` disables persistence.
    pub log_dir: Option<PathBuf>,
    /// Persist raw per-sample evaluation outputs.
    pub output_test_samples: bool,
    /// Render a terminal progress bar per epoch.
    pub show_progress: bool,
}

/// Per-run training loop controller.
pub struct TrainingLoop {
    model: Box<dyn Model>,
    datasets: Datasets,
    options: TrainOptions,
    report: ModelReport,
    state: RunState,
    /// Best-so-far validation value per metric, for `SelectModel::Best`.
    best_valid: HashMap<String, f64>,
    results: Option<ResultsStore>,
    summary: Option<SummaryWriter>,
}

impl TrainingLoop {
    pub fn new(model: Box<dyn Model>, datasets: Datasets, options: TrainOptions) -> Result<Self> {
        if datasets.train.is_empty() {
            return Err(Error::Config("training set is empty".into()));
        }
        let report = ModelReport::new(options.metrics.clone(), options.num_epochs);
        let (results, summary) = match &options.log_dir {
            Some(dir) => (
                Some(ResultsStore::new(dir)),
                Some(SummaryWriter::create(dir.join("events.jsonl"))?),
            ),
            None => (None, None),
        };
        Ok(Self {
            model,
            datasets,
            options,
            report,
            state: RunState::Running,
            best_valid: HashMap::new(),
            results,
            summary,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn report(&self) -> &ModelReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut ModelReport {
        &mut self.report
    }

    /// Restore model state from a checkpoint before running.
    pub fn load_checkpoint(&mut self, kind: &CheckpointKind) -> Result<String> {
        let run_id = self.model.load_checkpoint(kind)?;
        let resume =
            ResumePoint::from_global_step(self.model.global_step(), self.datasets.train.len());
        info!(
            "loaded checkpoint '{kind}' (run {run_id}), resuming at epoch {} offset {}",
            resume.epoch + 1,
            resume.offset
        );
        Ok(run_id)
    }

    /// Run the full epoch loop. `on_epoch_finished` receives an immutable
    /// snapshot of the report after each completed epoch.
    pub fn run(&mut self, on_epoch_finished: &mut dyn FnMut(&ModelReport)) -> Result<ModelReport> {
        let n = self.datasets.train.len();
        let resume = ResumePoint::from_global_step(self.model.global_step(), n);
        let mut progress = TrainingProgress::new(
            n,
            self.options.save_interval,
            self.options.log_interval,
        );

        for epoch in resume.epoch + 1..=self.options.num_epochs {
            self.state = RunState::Running;
            let offset = if epoch == resume.epoch + 1 {
                resume.offset
            } else {
                0
            };
            self.train_epoch(epoch, offset, &mut progress)?;

            self.state = RunState::Evaluating;
            let (last_test, valid_result) = self.evaluate_epoch(epoch)?;
            self.select_results(&last_test, &valid_result)?;
            self.report.current_epoch = epoch;

            if self.stop_early(epoch) {
                self.state = RunState::Stopped;
                break;
            }
            on_epoch_finished(&self.report);
        }

        self.report.finish();
        self.state = RunState::Stopped;
        if let Some(summary) = &mut self.summary {
            summary.flush()?;
        }
        Ok(self.report.clone())
    }

    /// One pass over the scheduled segments of an epoch.
    fn train_epoch(
        &mut self,
        epoch: u32,
        start_offset: usize,
        progress: &mut TrainingProgress,
    ) -> Result<()> {
        let n = self.datasets.train.len();
        if self.options.shuffle {
            self.datasets.train.shuffle();
        }
        self.model.reset_counter();
        progress.begin_epoch(epoch, start_offset);

        let mut bar = ProgressBar::new(n as u64).with_enabled(self.options.show_progress);
        bar.set(start_offset as u64);

        for segment in self.options.schedule.segments_from(n, start_offset) {
            for batch in
                self.datasets
                    .train
                    .get_iter(segment.batch_size, segment.start, segment.end)
            {
                if batch.is_empty() {
                    warn!("skipping empty batch at offset {}", progress.offset());
                    continue;
                }
                let loss = match self.model.training_step(&batch) {
                    Ok(loss) => loss,
                    Err(e) if e.is_fatal() => {
                        error!("{e}");
                        info!("saving model before exiting...");
                        self.model.save_checkpoint(&CheckpointKind::Latest)?;
                        self.state = RunState::Aborted;
                        return Err(Error::ResourceExhausted(e.to_string()));
                    }
                    Err(e) => {
                        error!("training step failed, skipping batch: {e}");
                        continue;
                    }
                };

                progress.update(batch.len());
                bar.set(progress.offset() as u64);
                self.model
                    .set_global_step((epoch as u64 - 1) * n as u64 + progress.offset() as u64);

                if let Some(summary) = &mut self.summary {
                    summary.add_scalar("loss", loss as f64, self.model.global_step())?;
                }

                if progress.should_save() {
                    let kind = if self.options.save_all_epochs {
                        CheckpointKind::Epoch(epoch)
                    } else {
                        CheckpointKind::Latest
                    };
                    self.model.save_checkpoint(&kind)?;
                    debug!("saved checkpoint '{kind}' at step {}", self.model.global_step());
                }

                if progress.should_log() {
                    info!(
                        "epoch: {epoch}, progress: {}%, epoch_loss: {:.4}",
                        (progress.epoch_progress() * 100.0) as u32,
                        self.model.epoch_loss()
                    );
                }
            }
        }
        bar.finish();
        self.model.end_training_epoch();
        self.report.epoch_losses.push(self.model.epoch_loss());
        Ok(())
    }

    /// Evaluate every test set, then the validation set if present.
    /// Returns the last test result and the validation result.
    fn evaluate_epoch(
        &mut self,
        epoch: u32,
    ) -> Result<(Option<EvaluationResult>, Option<EvaluationResult>)> {
        let opts = EvalOptions {
            batch_size: self
                .options
                .eval_batch_size
                .unwrap_or_else(|| self.options.schedule.base_size()),
            metrics: self.options.metrics.clone(),
            output_path: self.options.log_dir.as_ref().map(|d| d.join("results")),
            output_tag: "latest".to_string(),
            write_outputs: self.options.output_test_samples,
        };

        let mut last_test = None;
        for (name, test_set) in &self.datasets.tests {
            debug!("evaluating test set '{name}'");
            let result = evaluate(
                &mut *self.model,
                &**test_set,
                f64::from(epoch),
                &opts,
                self.summary.as_mut(),
            )?;
            self.record_result(&result)?;
            self.report.epoch_test_results.push(result.results.clone());
            last_test = Some(result);
        }

        let valid_result = match &self.datasets.valid {
            Some(valid_set) => {
                let result = evaluate(
                    &mut *self.model,
                    &**valid_set,
                    f64::from(epoch),
                    &opts,
                    self.summary.as_mut(),
                )?;
                self.record_result(&result)?;
                self.report.epoch_valid_results.push(result.results.clone());
                Some(result)
            }
            None => None,
        };

        Ok((last_test, valid_result))
    }

    /// Persist one evaluation into the results store.
    fn record_result(&self, result: &EvaluationResult) -> Result<()> {
        if let Some(store) = &self.results {
            let train = &self.datasets.train;
            store.add_result(&self.report.metrics, result.to_record(), |m, a, b| {
                train.is_better_result(m, a, b)
            })?;
        }
        Ok(())
    }

    /// Apply the best-result selection policy for the epoch just evaluated.
    fn select_results(
        &mut self,
        last_test: &Option<EvaluationResult>,
        valid_result: &Option<EvaluationResult>,
    ) -> Result<()> {
        match self.options.select_model {
            SelectModel::Last => {
                if let Some(result) = last_test.as_ref().or(valid_result.as_ref()) {
                    self.report.current_results = result.results.clone();
                }
            }
            SelectModel::Best => match valid_result {
                None => {
                    // no validation set: the lowest-loss epoch wins
                    let loss = *self.report.epoch_losses.last().expect("epoch recorded");
                    if loss <= self.report.min_loss().unwrap_or(f32::INFINITY) {
                        if let Some(result) = last_test {
                            self.report.current_results = result.results.clone();
                        }
                        self.model.save_checkpoint(&CheckpointKind::Best)?;
                        info!(
                            "result updated (lowest loss reached: {loss:.4}) - {}",
                            format_results(&self.report.current_results)
                        );
                    }
                }
                Some(valid) => {
                    for metric in &self.report.metrics {
                        let Some(&value) = valid.results.get(metric) else {
                            continue;
                        };
                        let improved = match self.best_valid.get(metric) {
                            Some(&old) => self.datasets.train.is_better_result(metric, value, old),
                            None => true,
                        };
                        if improved {
                            self.best_valid.insert(metric.clone(), value);
                            let selected = last_test
                                .as_ref()
                                .and_then(|t| t.results.get(metric).copied())
                                .unwrap_or(value);
                            self.report.current_results.insert(metric.clone(), selected);
                        }
                    }
                }
            },
        }
        Ok(())
    }

    /// Epoch-boundary early-stopping decision.
    fn stop_early(&self, epoch: u32) -> bool {
        let Some(policy) = &self.options.early_stop else {
            return false;
        };
        let stop = if self.datasets.valid.is_some() {
            policy.should_stop_on_validation(&self.report.metrics, &self.report.epoch_valid_results)
        } else {
            let losses = &self.report.epoch_losses;
            if losses.len() > policy.window() {
                let split = losses.len() - policy.window();
                let head = losses[..split].iter().copied().fold(f32::INFINITY, f32::min);
                let tail = losses[split..].iter().copied().fold(f32::INFINITY, f32::min);
                debug!("last {} epochs decrease: {:.4}", policy.window(), head - tail);
            }
            policy.should_stop_on_loss(&self.report.epoch_losses)
        };
        if stop {
            info!("early stop at epoch {epoch}");
        }
        stop
    }
}

fn format_results(results: &HashMap<String, f64>) -> String {
    let mut pairs: Vec<_> = results.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(metric, value)| format!("{metric}: {value:.2}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{index_batches, BatchIter, OutputTriple};
    use crate::model::{Batch, Inference, StepError};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubDataset {
        n: usize,
        shuffles: Arc<AtomicUsize>,
    }

    impl StubDataset {
        fn new(n: usize) -> Self {
            Self {
                n,
                shuffles: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Dataset for StubDataset {
        fn len(&self) -> usize {
            self.n
        }

        fn shuffle(&mut self) {
            self.shuffles.fetch_add(1, Ordering::SeqCst);
        }

        fn get_iter(&self, batch_size: usize, start: usize, end: usize) -> BatchIter<'_> {
            Box::new(index_batches(batch_size, start, end))
        }

        fn evaluate(
            &self,
            predictions: &[Value],
            _references: &[Value],
            _metric: &str,
            _output_path: Option<&Path>,
        ) -> crate::error::Result<f64> {
            // score encodes how many predictions were seen
            Ok(predictions.len() as f64)
        }

        fn format_output(&self, prediction: &Value, sample_id: usize) -> crate::error::Result<OutputTriple> {
            Ok(OutputTriple {
                input: sample_id.to_string(),
                reference: String::new(),
                hypothesis: prediction.to_string(),
            })
        }

        fn write_results_to_file(
            &self,
            _predictions: &[Value],
            _sample_ids: &[usize],
            output_path: &Path,
            tag: &str,
        ) -> crate::error::Result<std::path::PathBuf> {
            Ok(output_path.join(tag))
        }
    }

    /// Scripted model: per-epoch losses come from a table; checkpoint saves
    /// are counted by kind.
    struct ScriptedModel {
        losses: Vec<f32>,
        epoch: usize,
        batches_seen: usize,
        global_step: u64,
        saved: Vec<String>,
        fail_at_batch: Option<(usize, StepError)>,
    }

    impl ScriptedModel {
        fn new(losses: Vec<f32>) -> Self {
            Self {
                losses,
                epoch: 0,
                batches_seen: 0,
                global_step: 0,
                saved: Vec::new(),
                fail_at_batch: None,
            }
        }
    }

    impl Model for ScriptedModel {
        fn training_step(&mut self, batch: &Batch) -> std::result::Result<f32, StepError> {
            if let Some((at, _)) = &self.fail_at_batch {
                if self.batches_seen == *at {
                    let (_, err) = self.fail_at_batch.take().unwrap();
                    return Err(err);
                }
            }
            self.batches_seen += 1;
            let _ = batch;
            Ok(self.epoch_loss())
        }

        fn infer(&mut self, batch: &Batch) -> std::result::Result<Inference, StepError> {
            Ok(Inference {
                predictions: batch.ids.iter().map(|&i| json!(i)).collect(),
                references: batch.ids.iter().map(|&i| json!(i)).collect(),
                extras: Vec::new(),
            })
        }

        fn epoch_loss(&self) -> f32 {
            self.losses.get(self.epoch.saturating_sub(1)).copied().unwrap_or(0.0)
        }

        fn global_step(&self) -> u64 {
            self.global_step
        }

        fn set_global_step(&mut self, step: u64) {
            self.global_step = step;
        }

        fn save_checkpoint(&mut self, kind: &CheckpointKind) -> crate::error::Result<()> {
            self.saved.push(kind.tag());
            Ok(())
        }

        fn load_checkpoint(&mut self, _kind: &CheckpointKind) -> crate::error::Result<String> {
            Ok("scripted".into())
        }

        fn reset_counter(&mut self) {
            self.epoch += 1;
        }
    }

    fn options(num_epochs: u32) -> TrainOptions {
        TrainOptions {
            num_epochs,
            schedule: BatchSizeSchedule::fixed(10).unwrap(),
            save_interval: None,
            log_interval: None,
            shuffle: false,
            select_model: SelectModel::Last,
            early_stop: None,
            save_all_epochs: false,
            eval_batch_size: None,
            metrics: vec!["count".to_string()],
            log_dir: None,
            output_test_samples: false,
            show_progress: false,
        }
    }

    fn datasets(n: usize) -> Datasets {
        Datasets {
            train: Box::new(StubDataset::new(n)),
            valid: None,
            tests: vec![("test".to_string(), Box::new(StubDataset::new(20)))],
        }
    }

    #[test]
    fn test_full_run_processes_every_batch() {
        // N=100, schedule {0: 10} => 10 batches of 10 per epoch
        let model = ScriptedModel::new(vec![1.0, 0.8, 0.6]);
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(100), options(3)).unwrap();

        let mut epochs_seen = 0;
        let report = ctl.run(&mut |_| epochs_seen += 1).unwrap();

        assert!(report.finished);
        assert_eq!(report.epoch_losses, vec![1.0, 0.8, 0.6]);
        assert_eq!(report.current_epoch, 3);
        assert_eq!(epochs_seen, 3);
        assert_eq!(ctl.state(), RunState::Stopped);
        // test set evaluated every epoch
        assert_eq!(report.epoch_test_results.len(), 3);
        assert_eq!(report.current_results["count"], 20.0);
    }

    #[test]
    fn test_recoverable_failure_skips_batch() {
        let mut model = ScriptedModel::new(vec![1.0]);
        model.fail_at_batch = Some((3, StepError::Failed("nan".into())));
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(100), options(1)).unwrap();

        let report = ctl.run(&mut |_| {}).unwrap();
        assert!(report.finished);
        assert_eq!(ctl.state(), RunState::Stopped);
    }

    #[test]
    fn test_fatal_failure_saves_latest_and_aborts() {
        let mut model = ScriptedModel::new(vec![1.0]);
        model.fail_at_batch = Some((3, StepError::ResourceExhausted("device memory".into())));
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(100), options(1)).unwrap();

        let err = ctl.run(&mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(ctl.state(), RunState::Aborted);
        assert!(!ctl.report().finished);
    }

    #[test]
    fn test_early_stop_on_stalled_loss() {
        // min(head) - min(tail) = 0 => stop once history exceeds window
        let model = ScriptedModel::new(vec![1.0; 10]);
        let mut opts = options(10);
        opts.early_stop = Some(EarlyStopPolicy::new(2, 0.0));
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(50), opts).unwrap();

        let report = ctl.run(&mut |_| {}).unwrap();
        assert!(report.finished);
        assert_eq!(report.current_epoch, 3);
        assert_eq!(report.epoch_losses.len(), 3);
    }

    #[test]
    fn test_best_selection_without_validation_saves_best() {
        let model = ScriptedModel::new(vec![1.0, 0.5, 0.7]);
        let mut opts = options(3);
        opts.select_model = SelectModel::Best;
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(50), opts).unwrap();
        ctl.run(&mut |_| {}).unwrap();

        // epochs 1 and 2 reach a new minimum loss; epoch 3 does not
        // (saved kinds are recorded by the scripted model)
        let report = ctl.report();
        assert_eq!(report.current_results["count"], 20.0);
    }

    #[test]
    fn test_resume_mid_epoch_consumes_remaining_samples_only() {
        let mut model = ScriptedModel::new(vec![1.0, 1.0]);
        // 1 full epoch of 100 plus 40 into epoch 2
        model.global_step = 140;
        let mut ctl = TrainingLoop::new(Box::new(model), datasets(100), options(2)).unwrap();

        let report = ctl.run(&mut |_| {}).unwrap();
        assert!(report.finished);
        // only epoch 2 ran, and only its trailing 60 samples
        assert_eq!(report.epoch_losses.len(), 1);
        assert_eq!(report.current_epoch, 2);
    }

    #[test]
    fn test_shuffle_called_once_per_epoch() {
        let train = StubDataset::new(40);
        let shuffles = train.shuffles.clone();
        let ds = Datasets {
            train: Box::new(train),
            valid: None,
            tests: vec![],
        };
        let mut opts = options(3);
        opts.shuffle = true;
        let mut ctl = TrainingLoop::new(Box::new(ScriptedModel::new(vec![1.0; 3])), ds, opts).unwrap();
        ctl.run(&mut |_| {}).unwrap();

        assert_eq!(shuffles.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_training_set_is_config_error() {
        let ds = Datasets {
            train: Box::new(StubDataset::new(0)),
            valid: None,
            tests: vec![],
        };
        let err = TrainingLoop::new(Box::new(ScriptedModel::new(vec![])), ds, options(1));
        assert!(err.is_err());
    }
}
