//! Marker matching over test-runner and agent transcripts.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// pytest short summary line: `FAILED tests/test_outputs.py::test_x - ...`
static FAILED_TEST_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*FAILED\s+\S+").expect("valid FAILED regex"));

/// Counted outcomes from a summary line: `3 passed`, `1 failed`, `2 errors`.
static SUMMARY_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(passed|failed|errors?)\b").expect("valid summary regex")
});

/// Per-test verdict words as printed by `pytest -v`.
static ISOLATED_FAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(FAILED|ERROR)\b").expect("valid fail regex"));
static ISOLATED_PASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bPASSED\b").expect("valid pass regex"));

#[derive(Debug, Default, PartialEq, Eq)]
struct SummaryCounts {
    passed: u64,
    failed: u64,
    errors: u64,
}

fn summary_counts(text: &str) -> SummaryCounts {
    let mut counts = SummaryCounts::default();
    for caps in SUMMARY_COUNT.captures_iter(text) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        match caps[2].to_ascii_lowercase().as_str() {
            "passed" => counts.passed += n,
            "failed" => counts.failed += n,
            _ => counts.errors += n,
        }
    }
    counts
}

/// Classify a test-runner transcript.
///
/// Any failure marker wins. Otherwise a counted `N passed` summary decides,
/// and only without one do isolated verdict words count.
pub fn classify_tests(text: &str) -> Option<TaskStatus> {
    let counts = summary_counts(text);

    if FAILED_TEST_PATH.is_match(text) || counts.failed > 0 || counts.errors > 0 {
        return Some(TaskStatus::Failed);
    }
    if counts.passed > 0 {
        return Some(TaskStatus::Passed);
    }
    if ISOLATED_FAIL.is_match(text) {
        return Some(TaskStatus::Failed);
    }
    if ISOLATED_PASS.is_match(text) {
        return Some(TaskStatus::Passed);
    }
    None
}

/// Phrase lists driving the agent-transcript cascade.
///
/// Matching is case-insensitive substring search, except for generic success
/// phrases, which must stand as whole words and not follow a negation. Loaded
/// from the `[inference]` config section; any list left out keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Phrases that on their own mean the task succeeded.
    pub explicit_success: Vec<String>,
    /// Weaker phrases, trusted only when no error token is present.
    pub generic_success: Vec<String>,
    /// Markers that the session ended (asciinema, harness).
    pub completion_markers: Vec<String>,
    /// Task-specific signs of success, trusted together with a completion marker.
    pub domain_signals: Vec<String>,
    /// Tokens that mark the attempt as failed.
    pub error_tokens: Vec<String>,
}

impl Default for Heuristics {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            explicit_success: owned(&[
                "task completed successfully",
                "all tests passed",
                "task passed",
                "\u{2713} passed",
                "resolved: 1",
                "accuracy: 100",
            ]),
            generic_success: owned(&["success", "successfully", "completed"]),
            completion_markers: owned(&["recording finished"]),
            domain_signals: owned(&[
                "server started",
                "server running",
                "listening on",
                "hello, world",
            ]),
            error_tokens: owned(&[
                "traceback (most recent call last)",
                "command not found",
                "error:",
                "exception:",
                "fatal:",
                "permission denied",
                "no such file or directory",
            ]),
        }
    }
}

impl Heuristics {
    /// Run the agent-transcript cascade. `None` means the transcript is
    /// ambiguous and the attempt should be treated as still running.
    pub fn classify_agent(&self, text: &str) -> Option<TaskStatus> {
        let haystack = text.to_lowercase();
        let any = |list: &[String]| {
            list.iter()
                .any(|needle| !needle.is_empty() && haystack.contains(&needle.to_lowercase()))
        };

        let has_errors = any(&self.error_tokens);

        if any(&self.explicit_success) {
            return Some(TaskStatus::Passed);
        }
        let generic = self
            .generic_success
            .iter()
            .any(|phrase| contains_affirmed_word(&haystack, &phrase.to_lowercase()));
        if generic && !has_errors {
            return Some(TaskStatus::Passed);
        }
        if any(&self.completion_markers) && any(&self.domain_signals) {
            return Some(TaskStatus::Passed);
        }
        if has_errors {
            return Some(TaskStatus::Failed);
        }
        None
    }
}

/// Words that flip the meaning of the phrase right after them.
const NEGATIONS: [&str; 4] = ["not", "no", "never", "without"];

/// `needle` occurs in `haystack` as a whole word (or words) and the word
/// before it is not a negation. Both sides are expected lowercase.
fn contains_affirmed_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = &haystack[..start];
        let after = &haystack[start + needle.len()..];
        if before.chars().next_back().is_some_and(is_word) || after.chars().next().is_some_and(is_word) {
            return false;
        }
        let prev_word = before
            .trim_end_matches(|c: char| !is_word(c))
            .rsplit(|c: char| !is_word(c))
            .next()
            .unwrap_or("");
        !NEGATIONS.contains(&prev_word)
    })
}
