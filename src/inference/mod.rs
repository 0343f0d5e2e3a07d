//! Task status inference from raw trial artifacts.
//!
//! The harness never writes a single canonical status file, so the status of a
//! task is re-derived on every poll from whatever artifacts exist. Evidence is
//! consulted in tiers, strongest first, and the first tier that yields a
//! verdict wins:
//!
//! 1. explicit results JSON (trial `results.json`, then the run aggregate)
//! 2. the test-runner transcript
//! 3. the agent transcript
//! 4. existence of the trial directory
//!
//! Inference is a pure function of the [`ArtifactBag`]: nothing is cached and
//! nothing can fail. Missing or malformed artifacts are absence of evidence.

pub mod results;
pub mod transcript;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::transcript::Heuristics;

/// Best-guess status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Passed,
    Failed,
}

impl TaskStatus {
    /// `true` once a definitive outcome has been inferred.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Passed | TaskStatus::Failed)
    }

    /// Position in the intended lifecycle queued -> running -> terminal.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Running => 1,
            TaskStatus::Passed | TaskStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Passed => write!(f, "passed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Which class of artifact decided a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    ResultsFile,
    RunResults,
    TestTranscript,
    AgentTranscript,
    TrialDirectory,
    None,
}

/// Kinds of artifact a trial can leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    Results,
    AgentLog,
    TestLog,
    Commands,
    /// tmux pane capture, keyed by its stem (`post-test`, `post-agent`, ...).
    Pane(String),
    Recording,
}

impl ArtifactKind {
    /// Classify a file by its base name. Unknown files return `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "results.json" => Some(ArtifactKind::Results),
            "agent.log" => Some(ArtifactKind::AgentLog),
            "tests.log" => Some(ArtifactKind::TestLog),
            "commands.txt" => Some(ArtifactKind::Commands),
            "agent.cast" | "recording.cast" => Some(ArtifactKind::Recording),
            other => other
                .strip_suffix(".txt")
                .filter(|stem| stem.starts_with("pre-") || stem.starts_with("post-"))
                .map(|stem| ArtifactKind::Pane(stem.to_string())),
        }
    }
}

/// Artifacts that can be requested as raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Agent,
    Tests,
    Commands,
    Results,
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(LogKind::Agent),
            "tests" => Ok(LogKind::Tests),
            "commands" => Ok(LogKind::Commands),
            "results" => Ok(LogKind::Results),
            other => Err(format!(
                "unknown log kind '{}' (expected agent, tests, commands or results)",
                other
            )),
        }
    }
}

/// Everything known about one task attempt. Every field is optional evidence.
#[derive(Debug, Clone, Default)]
pub struct ArtifactBag {
    /// A trial directory (or, in bucket layouts, any object) exists.
    pub trial_present: bool,
    /// Name of the trial directory the artifacts were read from.
    pub trial: Option<String>,
    pub results_json: Option<String>,
    /// Verdict for this task from the run-level aggregate results file.
    pub run_result: Option<bool>,
    pub agent_log: Option<String>,
    pub test_log: Option<String>,
    pub commands: Option<String>,
    pub panes: BTreeMap<String, String>,
    pub has_recording: bool,
}

impl ArtifactBag {
    /// Store an artifact's text under its kind.
    pub fn insert(&mut self, kind: ArtifactKind, text: String) {
        match kind {
            ArtifactKind::Results => self.results_json = Some(text),
            ArtifactKind::AgentLog => self.agent_log = Some(text),
            ArtifactKind::TestLog => self.test_log = Some(text),
            ArtifactKind::Commands => self.commands = Some(text),
            ArtifactKind::Pane(name) => {
                self.panes.insert(name, text);
            }
            ArtifactKind::Recording => self.has_recording = true,
        }
    }

    /// No artifact file of any kind was found.
    pub fn is_empty(&self) -> bool {
        self.results_json.is_none()
            && self.agent_log.is_none()
            && self.test_log.is_none()
            && self.commands.is_none()
            && self.panes.is_empty()
            && !self.has_recording
    }

    /// Names of the artifacts present, for status records.
    pub fn present(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.results_json.is_some() {
            names.push("results".to_string());
        }
        if self.agent_log.is_some() {
            names.push("agent".to_string());
        }
        if self.test_log.is_some() {
            names.push("tests".to_string());
        }
        if self.commands.is_some() {
            names.push("commands".to_string());
        }
        names.extend(self.panes.keys().map(|p| format!("pane:{}", p)));
        if self.has_recording {
            names.push("recording".to_string());
        }
        names
    }

    /// Raw text for a requested log kind.
    pub fn text(&self, kind: LogKind) -> Option<&str> {
        match kind {
            LogKind::Agent => self.agent_log.as_deref(),
            LogKind::Tests => self.test_log.as_deref(),
            LogKind::Commands => self.commands.as_deref(),
            LogKind::Results => self.results_json.as_deref(),
        }
    }

    /// Test log, falling back to the pane captured after the tests ran.
    fn test_transcript(&self) -> Option<&str> {
        self.test_log
            .as_deref()
            .or_else(|| self.panes.get("post-test").map(String::as_str))
    }

    /// Agent log, falling back to the command transcript, then the post-agent pane.
    fn agent_transcript(&self) -> Option<&str> {
        self.agent_log
            .as_deref()
            .or(self.commands.as_deref())
            .or_else(|| self.panes.get("post-agent").map(String::as_str))
    }
}

/// Inferred status plus the tier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: TaskStatus,
    pub evidence: Evidence,
}

impl Verdict {
    fn new(status: TaskStatus, evidence: Evidence) -> Self {
        Self { status, evidence }
    }
}

/// Infer a task's status from its artifacts. Never fails.
pub fn infer(bag: &ArtifactBag, rules: &Heuristics) -> Verdict {
    // 1. Explicit results
    if let Some(passed) = bag.results_json.as_deref().and_then(results::trial_passed) {
        return Verdict::new(pass_fail(passed), Evidence::ResultsFile);
    }
    if let Some(passed) = bag.run_result {
        return Verdict::new(pass_fail(passed), Evidence::RunResults);
    }

    // 2. Test runner transcript
    if let Some(status) = bag.test_transcript().and_then(transcript::classify_tests) {
        return Verdict::new(status, Evidence::TestTranscript);
    }

    // 3. Agent transcript
    if let Some(text) = bag.agent_transcript() {
        let status = rules.classify_agent(text).unwrap_or(TaskStatus::Running);
        return Verdict::new(status, Evidence::AgentTranscript);
    }

    // 4. Directory presence
    if bag.trial_present || !bag.is_empty() {
        Verdict::new(TaskStatus::Running, Evidence::TrialDirectory)
    } else {
        Verdict::new(TaskStatus::Queued, Evidence::None)
    }
}

fn pass_fail(passed: bool) -> TaskStatus {
    if passed {
        TaskStatus::Passed
    } else {
        TaskStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer_default(bag: &ArtifactBag) -> Verdict {
        infer(bag, &Heuristics::default())
    }

    #[test]
    fn test_empty_bag_is_queued() {
        let v = infer_default(&ArtifactBag::default());
        assert_eq!(v.status, TaskStatus::Queued);
        assert_eq!(v.evidence, Evidence::None);
    }

    #[test]
    fn test_bare_trial_directory_is_running() {
        let bag = ArtifactBag {
            trial_present: true,
            ..Default::default()
        };
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Running);
        assert_eq!(v.evidence, Evidence::TrialDirectory);
    }

    #[test]
    fn test_results_file_beats_transcripts() {
        let bag = ArtifactBag {
            trial_present: true,
            results_json: Some(r#"{"task_id": "hello-world", "is_resolved": true}"#.into()),
            test_log: Some("FAILED tests/test_outputs.py::test_hello - assert 1 == 2".into()),
            agent_log: Some("Traceback (most recent call last):".into()),
            ..Default::default()
        };
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Passed);
        assert_eq!(v.evidence, Evidence::ResultsFile);
    }

    #[test]
    fn test_results_file_failure() {
        let bag = ArtifactBag {
            results_json: Some(r#"{"is_resolved": false, "failure_mode": "unset"}"#.into()),
            test_log: Some("3 passed in 0.20s".into()),
            ..Default::default()
        };
        assert_eq!(infer_default(&bag).status, TaskStatus::Failed);
    }

    #[test]
    fn test_truncated_results_falls_through() {
        let bag = ArtifactBag {
            trial_present: true,
            results_json: Some(r#"{"task_id": "hello-world", "is_reso"#.into()),
            test_log: Some("2 passed in 0.01s".into()),
            ..Default::default()
        };
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Passed);
        assert_eq!(v.evidence, Evidence::TestTranscript);
    }

    #[test]
    fn test_run_results_used_when_trial_has_none() {
        let bag = ArtifactBag {
            trial_present: true,
            run_result: Some(false),
            agent_log: Some("Task completed successfully".into()),
            ..Default::default()
        };
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Failed);
        assert_eq!(v.evidence, Evidence::RunResults);
    }

    #[test]
    fn test_test_log_example() {
        let bag = ArtifactBag {
            test_log: Some("2 passed in 0.01s".into()),
            ..Default::default()
        };
        assert_eq!(infer_default(&bag).status, TaskStatus::Passed);
    }

    #[test]
    fn test_failure_marker_wins_over_success_phrase() {
        let bag = ArtifactBag {
            trial_present: true,
            test_log: Some(
                "All tests passed\n\
                 FAILED tests/test_outputs.py::test_server - ConnectionRefusedError\n\
                 1 failed, 4 passed in 1.02s"
                    .into(),
            ),
            ..Default::default()
        };
        assert_eq!(infer_default(&bag).status, TaskStatus::Failed);
    }

    #[test]
    fn test_agent_traceback_example() {
        let bag = ArtifactBag {
            agent_log: Some("Traceback (most recent call last)".into()),
            ..Default::default()
        };
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Failed);
        assert_eq!(v.evidence, Evidence::AgentTranscript);
    }

    #[test]
    fn test_ambiguous_agent_log_is_running() {
        let bag = ArtifactBag {
            trial_present: true,
            agent_log: Some("$ ls -la\ntotal 8\n".into()),
            ..Default::default()
        };
        assert_eq!(infer_default(&bag).status, TaskStatus::Running);
    }

    #[test]
    fn test_post_test_pane_stands_in_for_test_log() {
        let mut bag = ArtifactBag {
            trial_present: true,
            ..Default::default()
        };
        bag.insert(
            ArtifactKind::Pane("post-test".into()),
            "===== 5 passed in 2.31s =====".into(),
        );
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Passed);
        assert_eq!(v.evidence, Evidence::TestTranscript);
    }

    #[test]
    fn test_commands_stand_in_for_agent_log() {
        let mut bag = ArtifactBag::default();
        bag.insert(ArtifactKind::Commands, "bash: pip3: command not found".into());
        assert_eq!(infer_default(&bag).status, TaskStatus::Failed);
    }

    #[test]
    fn test_recording_only_is_running() {
        let mut bag = ArtifactBag::default();
        bag.insert(ArtifactKind::Recording, String::new());
        let v = infer_default(&bag);
        assert_eq!(v.status, TaskStatus::Running);
        assert_eq!(v.evidence, Evidence::TrialDirectory);
    }

    #[test]
    fn test_inference_is_idempotent() {
        let bag = ArtifactBag {
            trial_present: true,
            agent_log: Some("Starting server...\nServer started on :8080\nrecording finished".into()),
            ..Default::default()
        };
        let rules = Heuristics::default();
        assert_eq!(infer(&bag, &rules), infer(&bag, &rules));
    }

    #[test]
    fn test_artifact_kind_from_file_name() {
        assert_eq!(ArtifactKind::from_file_name("results.json"), Some(ArtifactKind::Results));
        assert_eq!(ArtifactKind::from_file_name("tests.log"), Some(ArtifactKind::TestLog));
        assert_eq!(
            ArtifactKind::from_file_name("post-agent.txt"),
            Some(ArtifactKind::Pane("post-agent".into()))
        );
        assert_eq!(ArtifactKind::from_file_name("notes.txt"), None);
        assert_eq!(ArtifactKind::from_file_name("tb.lock"), None);
    }

    #[test]
    fn test_status_rank_orders_lifecycle() {
        assert!(TaskStatus::Queued.rank() < TaskStatus::Running.rank());
        assert!(TaskStatus::Running.rank() < TaskStatus::Passed.rank());
        assert_eq!(TaskStatus::Passed.rank(), TaskStatus::Failed.rank());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
