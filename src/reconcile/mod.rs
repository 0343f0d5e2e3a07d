//! Run reconciliation: per-task inference aggregated into run records.
//!
//! Every call rescans the source from scratch. Nothing is cached or written,
//! so any polling cadence is safe while the harness is still running.

pub mod watch;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::artifacts::{ArtifactSource, RunMarkers, SourceError};
use crate::inference::results::{self, RunMetadata};
use crate::inference::{self, Evidence, Heuristics, TaskStatus};
use crate::registry::Batch;

/// Run-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Status record for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub evidence: Evidence,
    pub trial: Option<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    /// Passed over resolved tasks; `None` until something resolves.
    pub accuracy: Option<f64>,
}

impl RunSummary {
    pub fn from_tasks(tasks: &[TaskReport]) -> Self {
        let mut s = RunSummary {
            total: tasks.len(),
            ..Default::default()
        };
        for t in tasks {
            match t.status {
                TaskStatus::Queued => s.queued += 1,
                TaskStatus::Running => s.running += 1,
                TaskStatus::Passed => s.passed += 1,
                TaskStatus::Failed => s.failed += 1,
            }
        }
        let resolved = s.passed + s.failed;
        if resolved > 0 {
            s.accuracy = Some(s.passed as f64 / resolved as f64);
        }
        s
    }

    pub fn unresolved(&self) -> usize {
        self.queued + self.running
    }
}

/// Status record for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: String,
    pub source: &'static str,
    pub state: RunState,
    /// `None` for layouts without a lock file.
    pub locked: Option<bool>,
    pub has_results: bool,
    pub metadata: Option<RunMetadata>,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskReport>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Decide the run state from its markers and the inferred task states.
///
/// A results file is terminal. Otherwise the lock decides: held means the
/// harness is still going, released without results means it died. Layouts
/// with no lock fall back to whether any task is unresolved.
pub fn run_state(markers: &RunMarkers, summary: &RunSummary) -> RunState {
    if markers.results.is_some() {
        return RunState::Completed;
    }
    match markers.lock {
        Some(true) => RunState::Running,
        Some(false) => RunState::Failed,
        None if summary.unresolved() > 0 => RunState::Running,
        None => RunState::Completed,
    }
}

/// Reconcile one run found in `source`.
pub async fn reconcile_run(
    source: &dyn ArtifactSource,
    run: &str,
    rules: &Heuristics,
) -> Result<RunReport, SourceError> {
    reconcile_with(source, run, None, rules).await
}

/// Reconcile a registered batch, counting registered tasks that have not
/// produced any objects yet as queued. A batch whose prefix does not exist
/// yet has uploaded nothing, which is not an error.
pub async fn reconcile_batch(
    source: &dyn ArtifactSource,
    batch: &Batch,
    rules: &Heuristics,
) -> Result<RunReport, SourceError> {
    reconcile_with(source, &batch.id, Some(batch.tasks.as_slice()), rules).await
}

async fn reconcile_with(
    source: &dyn ArtifactSource,
    run: &str,
    expected: Option<&[String]>,
    rules: &Heuristics,
) -> Result<RunReport, SourceError> {
    let registered = expected.is_some();
    let markers = match source.run_markers(run).await {
        Err(SourceError::RunNotFound(_)) if registered => RunMarkers::default(),
        other => other?,
    };
    let aggregate = markers
        .results
        .as_deref()
        .map(results::run_results)
        .unwrap_or_default();

    let listed = match source.list_tasks(run).await {
        Err(SourceError::RunNotFound(_)) if registered => Vec::new(),
        other => other?,
    };
    let mut names: BTreeSet<String> = listed.into_iter().collect();
    names.extend(expected.unwrap_or_default().iter().cloned());
    names.extend(aggregate.keys().cloned());

    let mut tasks = Vec::with_capacity(names.len());
    for name in names {
        tasks.push(task_report(source, run, &name, &aggregate, rules).await);
    }

    let summary = RunSummary::from_tasks(&tasks);
    let state = run_state(&markers, &summary);
    tracing::debug!(
        run = %run,
        %state,
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        "run reconciled"
    );

    Ok(RunReport {
        id: run.to_string(),
        source: source.name(),
        state,
        locked: markers.lock,
        has_results: markers.results.is_some(),
        metadata: markers.metadata.as_deref().and_then(results::run_metadata),
        summary,
        tasks,
        checked_at: chrono::Utc::now(),
    })
}

/// Reconcile a single task of a run.
pub async fn reconcile_task(
    source: &dyn ArtifactSource,
    run: &str,
    task: &str,
    rules: &Heuristics,
) -> Result<TaskReport, SourceError> {
    let markers = source.run_markers(run).await?;
    let aggregate = markers
        .results
        .as_deref()
        .map(results::run_results)
        .unwrap_or_default();
    Ok(task_report(source, run, task, &aggregate, rules).await)
}

async fn task_report(
    source: &dyn ArtifactSource,
    run: &str,
    task: &str,
    aggregate: &BTreeMap<String, bool>,
    rules: &Heuristics,
) -> TaskReport {
    let mut bag = source.task_bag(run, task).await;
    bag.run_result = aggregate.get(task).copied();
    let verdict = inference::infer(&bag, rules);

    TaskReport {
        name: task.to_string(),
        status: verdict.status,
        evidence: verdict.evidence,
        trial: bag.trial.clone(),
        artifacts: bag.present(),
    }
}

/// Summaries of every run in the source, newest first, without task lists.
///
/// A run that disappears or cannot be read mid-scan is skipped.
pub async fn list_runs(
    source: &dyn ArtifactSource,
    rules: &Heuristics,
) -> Result<Vec<RunReport>, SourceError> {
    let runs = source.list_runs().await?;
    let mut reports = Vec::with_capacity(runs.len());
    for run in runs {
        match reconcile_run(source, &run, rules).await {
            Ok(mut report) => {
                report.tasks.clear();
                reports.push(report);
            }
            Err(e) => tracing::warn!(run = %run, error = %e, "skipping run"),
        }
    }
    Ok(reports)
}
