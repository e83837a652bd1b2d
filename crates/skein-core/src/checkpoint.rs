//! Durable checkpoints for crash recovery and resume.
//!
//! After each completed top-level step the runner persists enough state to
//! reconstruct the run: the resolved inputs, every completed step result,
//! the index of the next step, and (for an interrupted loop) the partial
//! iteration progress. The on-disk format is plain JSON and is not a
//! compatibility surface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use skein_types::result::StepResult;

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

/// Partial progress of an in-progress loop step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopProgress {
    /// Iteration the run stopped in.
    pub iteration_index: usize,
    /// Last nested step index completed within that iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_step_index: Option<usize>,
}

/// A reconstructible snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the workflow being executed.
    pub workflow_name: String,
    /// Index of the next top-level step to run.
    pub step_index: usize,
    /// All completed top-level step results, in execution order.
    pub completed: Vec<StepResult>,
    /// The resolved input map.
    pub inputs: serde_json::Map<String, Value>,
    /// Partial loop progress for the step at `step_index`, if it was
    /// interrupted mid-loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_progress: Option<LoopProgress>,
    /// When this checkpoint was written.
    pub created_at: DateTime<Utc>,
}

/// Object-safe persistence contract for checkpoints, keyed by workflow
/// name.
pub trait CheckpointStore: Send + Sync {
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, Result<(), CheckpointError>>;

    fn load<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>>;

    fn clear<'a>(&'a self, workflow_name: &'a str) -> BoxFuture<'a, Result<(), CheckpointError>>;
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Checkpoint store writing one pretty-printed JSON file per workflow under
/// a data directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, workflow_name: &str) -> PathBuf {
        self.dir.join(format!("{workflow_name}.checkpoint.json"))
    }
}

impl CheckpointStore for JsonFileStore {
    fn save<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            std::fs::create_dir_all(&self.dir)?;
            let json = serde_json::to_string_pretty(checkpoint)
                .map_err(|e| CheckpointError::Serde(e.to_string()))?;
            std::fs::write(self.path_for(&checkpoint.workflow_name), json)?;
            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>> {
        Box::pin(async move {
            let path = self.path_for(workflow_name);
            if !path.exists() {
                return Ok(None);
            }
            let content = std::fs::read_to_string(path)?;
            let checkpoint = serde_json::from_str(&content)
                .map_err(|e| CheckpointError::Serde(e.to_string()))?;
            Ok(Some(checkpoint))
        })
    }

    fn clear<'a>(&'a self, workflow_name: &'a str) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            let path = self.path_for(workflow_name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory checkpoint store for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn save<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            self.inner
                .lock()
                .expect("checkpoint store lock poisoned")
                .insert(checkpoint.workflow_name.clone(), checkpoint.clone());
            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        workflow_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Checkpoint>, CheckpointError>> {
        Box::pin(async move {
            Ok(self
                .inner
                .lock()
                .expect("checkpoint store lock poisoned")
                .get(workflow_name)
                .cloned())
        })
    }

    fn clear<'a>(&'a self, workflow_name: &'a str) -> BoxFuture<'a, Result<(), CheckpointError>> {
        Box::pin(async move {
            self.inner
                .lock()
                .expect("checkpoint store lock poisoned")
                .remove(workflow_name);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_types::result::StepType;

    fn sample_checkpoint() -> Checkpoint {
        Checkpoint {
            workflow_name: "release-train".to_string(),
            step_index: 2,
            completed: vec![
                StepResult::success("prepare", StepType::Python, json!("tree"), 10),
                StepResult::success("implement", StepType::Agent, json!({"diff": "..."}), 900),
            ],
            inputs: [("branch".to_string(), json!("main"))].into_iter().collect(),
            loop_progress: Some(LoopProgress { iteration_index: 1, nested_step_index: Some(0) }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("checkpoints"));
        let checkpoint = sample_checkpoint();

        store.save(&checkpoint).await.unwrap();
        let loaded = store.load("release-train").await.unwrap().expect("present");
        assert_eq!(loaded.step_index, 2);
        assert_eq!(loaded.completed.len(), 2);
        assert_eq!(loaded.inputs.get("branch"), Some(&json!("main")));
        let progress = loaded.loop_progress.expect("loop progress");
        assert_eq!(progress.iteration_index, 1);
        assert_eq!(progress.nested_step_index, Some(0));

        store.clear("release-train").await.unwrap();
        assert!(store.load("release-train").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("never-saved").await.unwrap().is_none());
        // Clearing a missing checkpoint is fine
        store.clear("never-saved").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        let checkpoint = sample_checkpoint();

        store.save(&checkpoint).await.unwrap();
        assert!(store.load("release-train").await.unwrap().is_some());
        store.clear("release-train").await.unwrap();
        assert!(store.load("release-train").await.unwrap().is_none());
    }
}
