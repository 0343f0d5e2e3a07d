//! terminal-bench's local output layout.
//!
//! ```text
//! runs/<run-id>/
//!     tb.lock  results.json  run_metadata.json  run.log
//!     <task>/<trial>/
//!         results.json  commands.txt
//!         sessions/agent.log  sessions/tests.log  sessions/agent.cast
//!         panes/pre-agent.txt  panes/post-agent.txt  panes/post-test.txt
//! ```

use std::path::{Path, PathBuf};

use super::{
    child_dirs, is_safe_key, read_tail, ArtifactSource, RunMarkers, SourceError, LOCK_FILE,
    MAX_JSON_BYTES, METADATA_FILE, RESULTS_FILE, RUN_METADATA_FILES,
};
use crate::inference::{ArtifactBag, ArtifactKind};

/// A directory of terminal-bench runs.
#[derive(Debug, Clone)]
pub struct RunsDir {
    root: PathBuf,
    max_artifact_bytes: u64,
}

impl RunsDir {
    pub fn new(root: impl AsRef<Path>, max_artifact_bytes: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_artifact_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run: &str) -> Result<PathBuf, SourceError> {
        if !is_safe_key(run) {
            return Err(SourceError::RunNotFound(run.to_string()));
        }
        let dir = self.root.join(run);
        if !dir.is_dir() {
            return Err(SourceError::RunNotFound(run.to_string()));
        }
        Ok(dir)
    }

    /// Fill `bag` from one trial directory.
    async fn read_trial(&self, trial_dir: &Path, bag: &mut ArtifactBag) {
        let cap = self.max_artifact_bytes;

        if let Some(text) = read_tail(&trial_dir.join(RESULTS_FILE), MAX_JSON_BYTES).await {
            bag.insert(ArtifactKind::Results, text);
        }

        // Older harness versions wrote session logs next to results.json.
        for name in ["agent.log", "tests.log"] {
            let kind = ArtifactKind::from_file_name(name);
            let nested = trial_dir.join("sessions").join(name);
            let text = match read_tail(&nested, cap).await {
                Some(text) => Some(text),
                None => read_tail(&trial_dir.join(name), cap).await,
            };
            if let (Some(kind), Some(text)) = (kind, text) {
                bag.insert(kind, text);
            }
        }

        if let Some(text) = read_tail(&trial_dir.join("commands.txt"), cap).await {
            bag.insert(ArtifactKind::Commands, text);
        }

        if let Ok(mut entries) = tokio::fs::read_dir(trial_dir.join("panes")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(kind @ ArtifactKind::Pane(_)) = ArtifactKind::from_file_name(&name) {
                    if let Some(text) = read_tail(&entry.path(), cap).await {
                        bag.insert(kind, text);
                    }
                }
            }
        }

        let cast = trial_dir.join("sessions").join("agent.cast");
        if tokio::fs::try_exists(&cast).await.unwrap_or(false) {
            bag.insert(ArtifactKind::Recording, String::new());
        }
    }
}

/// Attempt index from a trial directory named `<task>.<N>-of-<M>`.
fn attempt_number(trial: &str) -> Option<u32> {
    let (_, suffix) = trial.rsplit_once('.')?;
    let (n, total) = suffix.split_once("-of-")?;
    total.parse::<u32>().ok()?;
    n.parse().ok()
}

#[async_trait::async_trait]
impl ArtifactSource for RunsDir {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list_runs(&self) -> Result<Vec<String>, SourceError> {
        let mut runs = child_dirs(&self.root).await.map_err(|source| SourceError::Io {
            path: self.root.clone(),
            source,
        })?;
        // Run keys are timestamps; lexical order is chronological.
        runs.reverse();
        Ok(runs)
    }

    async fn run_markers(&self, run: &str) -> Result<RunMarkers, SourceError> {
        let dir = self.run_dir(run)?;
        Ok(RunMarkers {
            lock: Some(tokio::fs::try_exists(dir.join(LOCK_FILE)).await.unwrap_or(false)),
            results: read_tail(&dir.join(RESULTS_FILE), MAX_JSON_BYTES).await,
            metadata: read_tail(&dir.join(METADATA_FILE), MAX_JSON_BYTES).await,
        })
    }

    async fn list_tasks(&self, run: &str) -> Result<Vec<String>, SourceError> {
        let dir = self.run_dir(run)?;
        let tasks = child_dirs(&dir)
            .await
            .map_err(|source| SourceError::Io {
                path: dir.clone(),
                source,
            })?
            .into_iter()
            .filter(|name| !RUN_METADATA_FILES.contains(&name.as_str()))
            .collect();
        Ok(tasks)
    }

    async fn task_bag(&self, run: &str, task: &str) -> ArtifactBag {
        let mut bag = ArtifactBag::default();
        if !is_safe_key(run) || !is_safe_key(task) {
            return bag;
        }
        let task_dir = self.root.join(run).join(task);

        let mut trials = match child_dirs(&task_dir).await {
            Ok(trials) => trials,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(run = %run, task = %task, error = %e, "cannot list task directory");
                }
                return bag;
            }
        };

        // `t.10-of-10` sorts before `t.9-of-10` as text.
        trials.sort_by(|a, b| (attempt_number(a), a).cmp(&(attempt_number(b), b)));
        let Some(trial) = trials.last() else {
            return bag;
        };

        bag.trial_present = true;
        bag.trial = Some(trial.clone());
        self.read_trial(&task_dir.join(trial), &mut bag).await;
        bag
    }
}
