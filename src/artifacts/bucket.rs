//! Object-storage batches laid out as `{batch}/{task}/{file}`.
//!
//! Two ways in: a local mirror of the bucket (e.g. after `aws s3 sync`) and
//! direct HTTP reads of object URLs. Neither layout has a lock file, so run
//! state for batches is decided from task states alone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};

use super::{
    child_dirs, is_safe_key, read_tail, ArtifactSource, RunMarkers, SourceError, MAX_JSON_BYTES,
    METADATA_FILE, RESULTS_FILE,
};
use crate::inference::{ArtifactBag, ArtifactKind};

/// Object names the runners upload per task.
const TASK_OBJECTS: [&str; 7] = [
    "results.json",
    "agent.log",
    "tests.log",
    "commands.txt",
    "pre-agent.txt",
    "post-agent.txt",
    "post-test.txt",
];
const RECORDING_OBJECT: &str = "agent.cast";

// ---------------------------------------------------------------------------
// Local mirror
// ---------------------------------------------------------------------------

/// A synced copy of the results bucket on local disk.
#[derive(Debug, Clone)]
pub struct BucketMirror {
    root: PathBuf,
    max_artifact_bytes: u64,
}

impl BucketMirror {
    pub fn new(root: impl AsRef<Path>, max_artifact_bytes: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_artifact_bytes,
        }
    }

    fn batch_dir(&self, batch: &str) -> Result<PathBuf, SourceError> {
        let dir = self.root.join(batch);
        if is_safe_key(batch) && dir.is_dir() {
            Ok(dir)
        } else {
            Err(SourceError::RunNotFound(batch.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl ArtifactSource for BucketMirror {
    fn name(&self) -> &'static str {
        "bucket-mirror"
    }

    async fn list_runs(&self) -> Result<Vec<String>, SourceError> {
        let mut batches = child_dirs(&self.root).await.map_err(|source| SourceError::Io {
            path: self.root.clone(),
            source,
        })?;
        batches.reverse();
        Ok(batches)
    }

    async fn run_markers(&self, batch: &str) -> Result<RunMarkers, SourceError> {
        let dir = self.batch_dir(batch)?;
        Ok(RunMarkers {
            lock: None,
            results: read_tail(&dir.join(RESULTS_FILE), MAX_JSON_BYTES).await,
            metadata: read_tail(&dir.join(METADATA_FILE), MAX_JSON_BYTES).await,
        })
    }

    async fn list_tasks(&self, batch: &str) -> Result<Vec<String>, SourceError> {
        let dir = self.batch_dir(batch)?;
        child_dirs(&dir)
            .await
            .map_err(|source| SourceError::Io { path: dir, source })
    }

    async fn task_bag(&self, batch: &str, task: &str) -> ArtifactBag {
        let mut bag = ArtifactBag::default();
        if !is_safe_key(batch) || !is_safe_key(task) {
            return bag;
        }
        let dir = self.root.join(batch).join(task);

        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return bag;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            // Any object under the task prefix means the attempt started.
            bag.trial_present = true;
            let name = entry.file_name().to_string_lossy().into_owned();
            match ArtifactKind::from_file_name(&name) {
                Some(ArtifactKind::Recording) => bag.insert(ArtifactKind::Recording, String::new()),
                Some(kind) => {
                    let cap = match kind {
                        ArtifactKind::Results => MAX_JSON_BYTES,
                        _ => self.max_artifact_bytes,
                    };
                    if let Some(text) = read_tail(&entry.path(), cap).await {
                        bag.insert(kind, text);
                    }
                }
                None => {}
            }
        }
        bag
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Reads batch objects straight from `{base_url}/{batch}/{task}/{file}`.
///
/// Buckets are not listed: batch and task names come from the registry, so
/// `list_runs` and `list_tasks` return nothing.
pub struct HttpBucket {
    client: Client,
    base_url: String,
    max_artifact_bytes: u64,
}

impl HttpBucket {
    pub fn new(base_url: &str, max_artifact_bytes: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_artifact_bytes,
        })
    }

    fn url(&self, parts: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for part in parts {
            url.push('/');
            url.push_str(part);
        }
        url
    }

    /// GET the last `max_bytes` of an object. 404 and transport errors are
    /// absence.
    async fn fetch_tail(&self, url: &str, max_bytes: u64) -> Option<String> {
        let result = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=-{}", max_bytes))
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(%url, error = %e, "object fetch failed");
                return None;
            }
        };

        match resp.status() {
            s if s.is_success() => resp.bytes().await.ok().map(|b| {
                // Servers that ignore Range send the whole object.
                let start = b.len().saturating_sub(max_bytes as usize);
                String::from_utf8_lossy(&b[start..]).into_owned()
            }),
            // Empty objects cannot satisfy a suffix range.
            StatusCode::RANGE_NOT_SATISFIABLE => Some(String::new()),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => None,
            status => {
                tracing::warn!(%url, %status, "unexpected object status");
                None
            }
        }
    }

    async fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(%url, error = %e, "object probe failed");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl ArtifactSource for HttpBucket {
    fn name(&self) -> &'static str {
        "bucket-http"
    }

    async fn list_runs(&self) -> Result<Vec<String>, SourceError> {
        Ok(Vec::new())
    }

    async fn run_markers(&self, batch: &str) -> Result<RunMarkers, SourceError> {
        if !is_safe_key(batch) {
            return Err(SourceError::RunNotFound(batch.to_string()));
        }
        Ok(RunMarkers {
            lock: None,
            results: self.fetch_tail(&self.url(&[batch, RESULTS_FILE]), MAX_JSON_BYTES).await,
            metadata: self.fetch_tail(&self.url(&[batch, METADATA_FILE]), MAX_JSON_BYTES).await,
        })
    }

    async fn list_tasks(&self, _batch: &str) -> Result<Vec<String>, SourceError> {
        Ok(Vec::new())
    }

    async fn task_bag(&self, batch: &str, task: &str) -> ArtifactBag {
        let mut bag = ArtifactBag::default();
        if !is_safe_key(batch) || !is_safe_key(task) {
            return bag;
        }

        for object in TASK_OBJECTS {
            let Some(kind) = ArtifactKind::from_file_name(object) else {
                continue;
            };
            let cap = match kind {
                ArtifactKind::Results => MAX_JSON_BYTES,
                _ => self.max_artifact_bytes,
            };
            if let Some(text) = self.fetch_tail(&self.url(&[batch, task, object]), cap).await {
                bag.trial_present = true;
                bag.insert(kind, text);
            }
        }
        if self.exists(&self.url(&[batch, task, RECORDING_OBJECT])).await {
            bag.trial_present = true;
            bag.insert(ArtifactKind::Recording, String::new());
        }
        bag
    }
}
