use std::sync::Arc;

use anyhow::Result;

use crate::artifacts::{self, ArtifactSource, RunsDir};
use crate::config::Config;
use crate::inference::Heuristics;
use crate::registry::Registry;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub runs: Arc<RunsDir>,
    /// Source for registered batches, when a bucket is configured.
    pub bucket: Option<Arc<dyn ArtifactSource>>,
    pub rules: Arc<Heuristics>,
}

impl AppState {
    pub fn from_config(config: &Config, pool: Pool) -> Result<Self> {
        Ok(Self {
            registry: Registry::new(pool),
            runs: Arc::new(RunsDir::new(
                &config.sources.runs_dir,
                config.sources.max_artifact_bytes,
            )),
            bucket: artifacts::bucket_source(&config.sources)?,
            rules: Arc::new(config.inference.clone()),
        })
    }
}
