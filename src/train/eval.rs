//! Evaluation runner
//!
//! One invocation runs a full pass over an evaluation dataset, accumulates
//! every prediction, and computes each configured metric once over the
//! complete accumulated sets. Metrics are whole-dataset computations;
//! per-batch averages would mis-score corpus-level metrics.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::dataset::{Dataset, OutputTriple};
use crate::error::Result;
use crate::model::{Model, SummaryWriter};
use crate::results::ResultRecord;

/// Settings for one evaluation pass.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Evaluation batch size, independent from the training schedule.
    pub batch_size: usize,
    /// Metrics to compute over the accumulated sets.
    pub metrics: Vec<String>,
    /// Base path for metric side outputs and persisted raw outputs.
    pub output_path: Option<PathBuf>,
    /// Tag appended to persisted output files ("latest", a config id, …).
    pub output_tag: String,
    /// Persist raw per-sample outputs and run the post-evaluation script.
    pub write_outputs: bool,
}

/// Result of one evaluation pass. Ephemeral; history lives on the
/// [`ModelReport`](crate::train::ModelReport).
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Epoch label at evaluation time, fractional while mid-epoch.
    pub epoch: String,
    pub results: HashMap<String, f64>,
    pub outputs: Vec<OutputTriple>,
}

impl EvaluationResult {
    /// The record shape persisted into the results store.
    pub fn to_record(&self) -> ResultRecord {
        ResultRecord {
            epoch: self.epoch.clone(),
            result: self.results.clone(),
        }
    }
}

/// Run a full evaluation pass of `model` over `dataset`.
///
/// Batch-level inference failures and per-sample formatting failures are
/// logged and skipped; the pass itself only fails on I/O or metric errors.
pub fn evaluate(
    model: &mut dyn Model,
    dataset: &dyn Dataset,
    current_epoch: f64,
    opts: &EvalOptions,
    mut summary: Option<&mut SummaryWriter>,
) -> Result<EvaluationResult> {
    let mut all_preds = Vec::new();
    let mut all_refs = Vec::new();
    let mut sample_ids = Vec::new();
    let mut outputs = Vec::new();

    for batch in dataset.get_iter(opts.batch_size, 0, dataset.len()) {
        if batch.is_empty() {
            warn!("skipping empty evaluation batch");
            continue;
        }
        let inference = match model.infer(&batch) {
            Ok(inference) => inference,
            Err(e) => {
                error!("inference failed, skipping batch: {e}");
                continue;
            }
        };

        for (i, prediction) in inference.predictions.iter().enumerate() {
            let Some(&sample_id) = batch.ids.get(i) else {
                warn!("prediction {i} has no matching sample id");
                continue;
            };
            match dataset.format_output(prediction, sample_id) {
                Ok(triple) => outputs.push(triple),
                Err(e) => warn!("failed to format sample {sample_id}: {e}"),
            }
        }

        if let Some(writer) = summary.as_deref_mut() {
            model.write_summary(writer, &batch, &inference);
        }

        sample_ids.extend_from_slice(&batch.ids);
        all_preds.extend(inference.predictions);
        all_refs.extend(inference.references);
    }

    let mut results = HashMap::new();
    for metric in &opts.metrics {
        let score = dataset.evaluate(&all_preds, &all_refs, metric, opts.output_path.as_deref())?;
        results.insert(metric.clone(), score);
    }
    info!("evaluation results: {results:?}");

    if opts.write_outputs {
        if let Some(output_path) = &opts.output_path {
            let path =
                dataset.write_results_to_file(&all_preds, &sample_ids, output_path, &opts.output_tag)?;
            dataset.run_evaluation_script(&path)?;
        }
    }

    Ok(EvaluationResult {
        epoch: format!("{current_epoch:.1}"),
        results,
        outputs,
    })
}
