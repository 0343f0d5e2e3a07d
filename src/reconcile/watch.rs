//! Poll a run and report status transitions.
//!
//! Inference is recomputed from scratch on each poll, so a task can appear to
//! move backwards (e.g. `passed` -> `running` when a results file is being
//! rewritten). Such regressions are reported, never smoothed over.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, info, warn};

use super::{reconcile_run, RunReport, RunState};
use crate::artifacts::{ArtifactSource, SourceError};
use crate::inference::{Heuristics, TaskStatus};

/// A change in one task's inferred status between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub task: String,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
}

impl Transition {
    /// The status moved against the queued -> running -> terminal lifecycle,
    /// or flipped between the two terminal outcomes.
    pub fn is_regression(&self) -> bool {
        match self.from {
            Some(from) => from.rank() > self.to.rank() || (from.is_terminal() && from != self.to),
            None => false,
        }
    }
}

/// Remembers the last status seen per task.
#[derive(Debug, Default)]
pub struct Watcher {
    last: HashMap<String, TaskStatus>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh report and return what changed since the previous one.
    pub fn observe(&mut self, report: &RunReport) -> Vec<Transition> {
        let mut changes = Vec::new();
        for task in &report.tasks {
            let prev = self.last.insert(task.name.clone(), task.status);
            if prev != Some(task.status) {
                changes.push(Transition {
                    task: task.name.clone(),
                    from: prev,
                    to: task.status,
                });
            }
        }
        changes
    }
}

/// Poll `run` every `interval` until it leaves the running state.
///
/// Returns the final report. A poll that fails to read the run is logged and
/// retried on the next tick; the run vanishing entirely ends the watch.
pub async fn watch_run(
    source: &dyn ArtifactSource,
    run: &str,
    rules: &Heuristics,
    interval: Duration,
) -> Result<RunReport, SourceError> {
    info!(run = %run, interval_secs = interval.as_secs(), "watching run");

    let mut watcher = Watcher::new();
    let mut ticker = tokio::time::interval(interval);
    let mut first = true;

    loop {
        ticker.tick().await;

        let report = match reconcile_run(source, run, rules).await {
            Ok(r) => r,
            Err(SourceError::RunNotFound(id)) => return Err(SourceError::RunNotFound(id)),
            Err(e) => {
                error!(run = %run, error = %e, "poll failed");
                continue;
            }
        };

        for t in watcher.observe(&report) {
            let from = t.from.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            if t.is_regression() {
                warn!(run = %run, task = %t.task, %from, to = %t.to, "status regressed");
            } else if !first {
                info!(run = %run, task = %t.task, %from, to = %t.to, "status changed");
            }
        }

        if first {
            info!(
                run = %run,
                state = %report.state,
                total = report.summary.total,
                passed = report.summary.passed,
                failed = report.summary.failed,
                "initial status"
            );
            first = false;
        }

        if report.state != RunState::Running {
            info!(
                run = %run,
                state = %report.state,
                passed = report.summary.passed,
                failed = report.summary.failed,
                "run finished"
            );
            return Ok(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::RunsDir;
    use crate::inference::Evidence;
    use crate::reconcile::{RunSummary, TaskReport};

    fn report(tasks: &[(&str, TaskStatus)]) -> RunReport {
        let tasks: Vec<TaskReport> = tasks
            .iter()
            .map(|(name, status)| TaskReport {
                name: name.to_string(),
                status: *status,
                evidence: Evidence::None,
                trial: None,
                artifacts: vec![],
            })
            .collect();
        RunReport {
            id: "r1".into(),
            source: "test",
            state: RunState::Running,
            locked: Some(true),
            has_results: false,
            metadata: None,
            summary: RunSummary::from_tasks(&tasks),
            tasks,
            checked_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_observe_reports_changes_only() {
        let mut w = Watcher::new();
        let first = w.observe(&report(&[("a", TaskStatus::Queued), ("b", TaskStatus::Running)]));
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|t| t.from.is_none()));

        let second = w.observe(&report(&[("a", TaskStatus::Running), ("b", TaskStatus::Running)]));
        assert_eq!(
            second,
            vec![Transition {
                task: "a".into(),
                from: Some(TaskStatus::Queued),
                to: TaskStatus::Running,
            }]
        );
    }

    #[test]
    fn test_regressions() {
        let t = |from, to| Transition {
            task: "t".into(),
            from: Some(from),
            to,
        };
        assert!(!t(TaskStatus::Queued, TaskStatus::Running).is_regression());
        assert!(!t(TaskStatus::Running, TaskStatus::Failed).is_regression());
        assert!(t(TaskStatus::Passed, TaskStatus::Running).is_regression());
        assert!(t(TaskStatus::Running, TaskStatus::Queued).is_regression());
        assert!(t(TaskStatus::Passed, TaskStatus::Failed).is_regression());
    }

    #[tokio::test]
    async fn test_watch_returns_when_run_is_done() {
        let tmp = tempfile::TempDir::new().unwrap();
        let run = tmp.path().join("r1");
        std::fs::create_dir_all(run.join("t/t.1-of-1")).unwrap();
        std::fs::write(run.join("t/t.1-of-1/results.json"), r#"{"is_resolved": true}"#).unwrap();
        std::fs::write(run.join("results.json"), "[]").unwrap();

        let src = RunsDir::new(tmp.path(), 1024);
        let report = watch_run(&src, "r1", &Heuristics::default(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.summary.passed, 1);
    }

    #[tokio::test]
    async fn test_watch_missing_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = RunsDir::new(tmp.path(), 1024);
        let res = watch_run(&src, "gone", &Heuristics::default(), Duration::from_millis(10)).await;
        assert!(matches!(res, Err(SourceError::RunNotFound(_))));
    }
}
