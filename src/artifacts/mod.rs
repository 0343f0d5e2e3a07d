//! Artifact sources -- where a run's trial artifacts are read from.
//!
//! Sources only read. A file that is missing, unreadable or cut off mid-write
//! comes back as absent or truncated text; only failing to find the run
//! itself is an error.

pub mod bucket;
pub mod local;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::SourcesConfig;
use crate::inference::{ArtifactBag, LogKind};

pub use self::bucket::{BucketMirror, HttpBucket};
pub use self::local::RunsDir;

/// Files at the run root that are never tasks.
pub const RUN_METADATA_FILES: [&str; 4] = ["tb.lock", "results.json", "run_metadata.json", "run.log"];

/// Marker file present while the harness is running.
pub const LOCK_FILE: &str = "tb.lock";
pub const RESULTS_FILE: &str = "results.json";
pub const METADATA_FILE: &str = "run_metadata.json";

/// Read cap for JSON files. Results files are small; this only guards
/// against a corrupt giant file. Log tails use `max_artifact_bytes`.
pub(crate) const MAX_JSON_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-level markers.
#[derive(Debug, Clone, Default)]
pub struct RunMarkers {
    /// Lock file presence. `None` when the layout has no lock concept.
    pub lock: Option<bool>,
    /// Aggregate results file text, if present.
    pub results: Option<String>,
    /// `run_metadata.json` text, if present.
    pub metadata: Option<String>,
}

/// A place runs and their trial artifacts can be read from.
#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short name for logs and API metadata.
    fn name(&self) -> &'static str;

    /// Run keys, newest first.
    async fn list_runs(&self) -> Result<Vec<String>, SourceError>;

    async fn run_markers(&self, run: &str) -> Result<RunMarkers, SourceError>;

    /// Task names found under the run, sorted.
    async fn list_tasks(&self, run: &str) -> Result<Vec<String>, SourceError>;

    /// Collect a task's artifacts. Never fails; absence is an empty bag.
    async fn task_bag(&self, run: &str, task: &str) -> ArtifactBag;

    /// Text of a single artifact.
    async fn artifact_text(&self, run: &str, task: &str, kind: LogKind) -> Option<String> {
        let bag = self.task_bag(run, task).await;
        bag.text(kind).map(str::to_owned)
    }
}

/// Build the source used for registered batches. A local mirror wins over a
/// bucket URL; with neither configured there is no batch source.
pub fn bucket_source(cfg: &SourcesConfig) -> anyhow::Result<Option<Arc<dyn ArtifactSource>>> {
    if let Some(dir) = &cfg.bucket_mirror_dir {
        return Ok(Some(Arc::new(BucketMirror::new(dir, cfg.max_artifact_bytes))));
    }
    if let Some(url) = &cfg.bucket_url {
        return Ok(Some(Arc::new(HttpBucket::new(url, cfg.max_artifact_bytes)?)));
    }
    Ok(None)
}

/// Reject keys that would escape the source root.
pub(crate) fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains('/')
        && !key.contains('\\')
        && !key.starts_with('.')
}

/// Sorted names of the visible subdirectories of `dir`.
pub(crate) async fn child_dirs(dir: &Path) -> Result<Vec<String>, std::io::Error> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        // A directory can vanish between listing and stat while a run is cleaned up.
        match entry.file_type().await {
            Ok(ft) if ft.is_dir() => names.push(name),
            _ => {}
        }
    }
    names.sort();
    Ok(names)
}

/// Read at most the last `max_bytes` of a file as lossy UTF-8.
///
/// Returns `None` for missing or unreadable files. Logs are appended to while
/// we read, so a short read or a split multi-byte sequence is expected.
pub(crate) async fn read_tail(path: &Path, max_bytes: u64) -> Option<String> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "artifact unreadable");
            }
            return None;
        }
    };

    let len = file.metadata().await.ok()?.len();
    if len > max_bytes {
        if let Err(e) = file.seek(std::io::SeekFrom::Start(len - max_bytes)).await {
            tracing::debug!(path = %path.display(), error = %e, "seek failed");
            return None;
        }
    }

    let mut buf = Vec::with_capacity(len.min(max_bytes) as usize);
    if let Err(e) = file.take(max_bytes).read_to_end(&mut buf).await {
        tracing::debug!(path = %path.display(), error = %e, "artifact read failed");
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}
