//! Persisted evaluation results
//!
//! Every evaluation appends to a keyed JSON store in the run's log
//! directory; per-metric best records are maintained under the dataset's
//! comparison direction.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One recorded evaluation: the (possibly fractional) epoch it was taken
/// at, and its per-metric scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub epoch: String,
    pub result: HashMap<String, f64>,
}

/// On-disk shape of `results.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsFile {
    pub best_results: HashMap<String, ResultRecord>,
    pub evaluations: Vec<ResultRecord>,
}

/// File-backed results store for one run.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    path: PathBuf,
}

impl ResultsStore {
    /// Store at `<log_dir>/results.json`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: log_dir.into().join("results.json"),
        }
    }

    /// Load all saved results; a missing file is an empty store.
    pub fn load(&self) -> Result<ResultsFile> {
        if !self.path.exists() {
            return Ok(ResultsFile::default());
        }
        let data = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Append `record` and refresh per-metric bests, where `is_better(m,
    /// a, b)` says whether score `a` beats score `b` under metric `m`.
    ///
    /// Returns the updated best records.
    pub fn add_result(
        &self,
        metrics: &[String],
        record: ResultRecord,
        is_better: impl Fn(&str, f64, f64) -> bool,
    ) -> Result<HashMap<String, ResultRecord>> {
        let mut file = self.load()?;
        for metric in metrics {
            let Some(&new_score) = record.result.get(metric) else {
                continue;
            };
            let replace = match file.best_results.get(metric) {
                Some(best) => best
                    .result
                    .get(metric)
                    .is_none_or(|&old| is_better(metric, new_score, old)),
                None => true,
            };
            if replace {
                file.best_results.insert(metric.clone(), record.clone());
            }
        }
        file.evaluations.push(record);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&file)?)?;
        Ok(file.best_results)
    }
}
