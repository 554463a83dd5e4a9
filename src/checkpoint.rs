//! Checkpoint kinds and persistence
//!
//! A checkpoint is a named snapshot of model state plus the global step
//! counter. Kinds are enumerated rather than free-form strings so a typo'd
//! tag is a compile error, not a silently fresh training run. Writes go
//! through a temp file and rename, so a crashed save never clobbers the
//! previous snapshot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Named checkpoint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKind {
    /// Most recent save; overwritten on every save trigger.
    Latest,
    /// Snapshot of the best-selected epoch.
    Best,
    /// Per-epoch snapshot, kept when save-all is configured.
    Epoch(u32),
}

impl CheckpointKind {
    /// Stable tag used in file names and on the CLI.
    pub fn tag(&self) -> String {
        match self {
            CheckpointKind::Latest => "latest".to_string(),
            CheckpointKind::Best => "best".to_string(),
            CheckpointKind::Epoch(n) => format!("epoch-{n:02}"),
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for CheckpointKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "latest" => Ok(CheckpointKind::Latest),
            "best" => Ok(CheckpointKind::Best),
            _ => {
                if let Some(n) = s.strip_prefix("epoch-") {
                    n.parse::<u32>()
                        .map(CheckpointKind::Epoch)
                        .map_err(|_| format!("invalid epoch tag '{s}'"))
                } else {
                    Err(format!(
                        "unknown checkpoint tag '{s}' (expected latest, best, or epoch-NN)"
                    ))
                }
            }
        }
    }
}

/// Serialized checkpoint contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Identity of the run that produced this snapshot.
    pub run_id: String,
    /// Completed samples across all epochs.
    pub global_step: u64,
    pub saved_at: DateTime<Utc>,
    /// Opaque model payload; ensayo never inspects it.
    pub model_state: Value,
}

/// Where a resumed run picks up within the training set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Fully completed epochs. Training resumes at `epoch + 1`.
    pub epoch: u32,
    /// Within-epoch sample offset already consumed.
    pub offset: usize,
}

impl ResumePoint {
    /// Derive the resume point from a global step counter and the training
    /// set size.
    pub fn from_global_step(global_step: u64, num_samples: usize) -> Self {
        let n = num_samples as u64;
        Self {
            epoch: (global_step / n) as u32,
            offset: (global_step % n) as usize,
        }
    }

    pub fn start() -> Self {
        Self { epoch: 0, offset: 0 }
    }
}

/// Directory-backed checkpoint store with atomic saves.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: &CheckpointKind) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.json", kind.tag()))
    }

    /// Write `state` under `kind`. The write lands in a temp file first and
    /// is renamed into place, so readers only ever see a complete snapshot.
    pub fn save(&self, kind: &CheckpointKind, state: &CheckpointState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(&self, kind: &CheckpointKind) -> Result<CheckpointState> {
        let path = self.path(kind);
        let data = std::fs::read(&path)
            .map_err(|_| Error::CheckpointNotFound(path.display().to_string()))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn exists(&self, kind: &CheckpointKind) -> bool {
        self.path(kind).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(global_step: u64) -> CheckpointState {
        CheckpointState {
            run_id: "run-1".into(),
            global_step,
            saved_at: Utc::now(),
            model_state: serde_json::json!({"w": [0.1, 0.2]}),
        }
    }

    #[test]
    fn test_tag_round_trip() {
        for kind in [
            CheckpointKind::Latest,
            CheckpointKind::Best,
            CheckpointKind::Epoch(7),
            CheckpointKind::Epoch(12),
        ] {
            let parsed: CheckpointKind = kind.tag().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(CheckpointKind::Epoch(7).tag(), "epoch-07");
        assert!("epoch-xx".parse::<CheckpointKind>().is_err());
        assert!("newest".parse::<CheckpointKind>().is_err());
    }

    #[test]
    fn test_resume_point_math() {
        // 2 full epochs of 100 samples plus 37 into the third
        let rp = ResumePoint::from_global_step(237, 100);
        assert_eq!(rp.epoch, 2);
        assert_eq!(rp.offset, 37);

        let rp = ResumePoint::from_global_step(0, 100);
        assert_eq!(rp, ResumePoint::start());

        // exact epoch boundary: next epoch starts fresh
        let rp = ResumePoint::from_global_step(300, 100);
        assert_eq!(rp.epoch, 3);
        assert_eq!(rp.offset, 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.save(&CheckpointKind::Latest, &state(237)).unwrap();
        let loaded = store.load(&CheckpointKind::Latest).unwrap();
        assert_eq!(loaded.global_step, 237);
        assert_eq!(loaded.run_id, "run-1");

        let rp = ResumePoint::from_global_step(loaded.global_step, 100);
        assert_eq!(rp.epoch, 2);
        assert_eq!(rp.offset, 37);
    }

    #[test]
    fn test_save_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store.save(&CheckpointKind::Latest, &state(10)).unwrap();
        store.save(&CheckpointKind::Latest, &state(20)).unwrap();

        // no temp file left behind, and the slot holds the newest state
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["checkpoint_latest.json"]);
        assert_eq!(store.load(&CheckpointKind::Latest).unwrap().global_step, 20);
    }

    #[test]
    fn test_load_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(
            store.load(&CheckpointKind::Best),
            Err(Error::CheckpointNotFound(_))
        ));
    }
}
