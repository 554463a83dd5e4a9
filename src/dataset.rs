//! Dataset capability seam
//!
//! Datasets own their samples, their shuffling, and their metric
//! definitions. The loop only asks for batch iterators over sample ranges
//! and hands accumulated predictions back for whole-dataset scoring.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::Batch;

/// One formatted evaluation sample: what went in, what was expected, what
/// came out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTriple {
    pub input: String,
    pub reference: String,
    pub hypothesis: String,
}

/// The dataset capability consumed by the training loop and the evaluation
/// runner.
pub trait Dataset: Send {
    /// Total number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reorder samples in place. Called once per epoch when shuffling is
    /// configured.
    fn shuffle(&mut self);

    /// Lazy finite sequence of batches over the sample range
    /// `[start, end)`. The final batch may be short.
    fn get_iter(&self, batch_size: usize, start: usize, end: usize) -> BatchIter<'_>;

    /// Score the complete prediction/reference sets under `metric`.
    ///
    /// Whole-dataset computation: corpus-level metrics (BLEU, F1 over all
    /// samples) must not be approximated by averaging per-batch scores.
    fn evaluate(
        &self,
        predictions: &[Value],
        references: &[Value],
        metric: &str,
        output_path: Option<&Path>,
    ) -> Result<f64>;

    /// Render one prediction as display strings.
    fn format_output(&self, prediction: &Value, sample_id: usize) -> Result<OutputTriple>;

    /// Persist raw per-sample outputs; returns the written path.
    fn write_results_to_file(
        &self,
        predictions: &[Value],
        sample_ids: &[usize],
        output_path: &Path,
        tag: &str,
    ) -> Result<PathBuf>;

    /// Comparison direction for `metric`: is `a` a better score than `b`?
    ///
    /// Defaults to higher-is-better; error-rate style metrics override.
    fn is_better_result(&self, _metric: &str, a: f64, b: f64) -> bool {
        a > b
    }

    /// External post-evaluation hook (official scoring scripts etc.).
    fn run_evaluation_script(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Boxed batch iterator returned by [`Dataset::get_iter`].
pub type BatchIter<'a> = Box<dyn Iterator<Item = Batch> + 'a>;

/// Chunk the id range `[start, end)` into consecutive batches.
///
/// The standard `get_iter` body for datasets whose ids are positional.
pub fn index_batches(batch_size: usize, start: usize, end: usize) -> impl Iterator<Item = Batch> {
    debug_assert!(batch_size > 0);
    let mut pos = start;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let stop = (pos + batch_size).min(end);
        let batch = Batch::new((pos..stop).collect());
        pos = stop;
        Some(batch)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_batches_exact() {
        let batches: Vec<_> = index_batches(10, 0, 100).collect();
        assert_eq!(batches.len(), 10);
        assert!(batches.iter().all(|b| b.len() == 10));
        assert_eq!(batches[0].ids[0], 0);
        assert_eq!(batches[9].ids[9], 99);
    }

    #[test]
    fn test_index_batches_short_tail() {
        let batches: Vec<_> = index_batches(8, 0, 20).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 4);
    }

    #[test]
    fn test_index_batches_resumed_range() {
        // resuming mid-segment: first batch starts exactly at the offset
        let batches: Vec<_> = index_batches(10, 37, 60).collect();
        assert_eq!(batches[0].ids[0], 37);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 23);
    }

    #[test]
    fn test_index_batches_empty_range() {
        assert_eq!(index_batches(10, 50, 50).count(), 0);
    }
}
