//! Parsing of the harness's JSON result artifacts.
//!
//! All parsers are lenient: a file that is mid-write, truncated or shaped
//! differently than expected yields `None` / nothing rather than an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean outcome fields, in order of preference.
const OUTCOME_FIELDS: [&str; 3] = ["is_resolved", "resolved", "passed"];

/// Extract the explicit outcome from a trial `results.json`.
///
/// Returns `None` when the text does not parse or carries no boolean outcome
/// (terminal-bench writes `"is_resolved": null` before the verdict is known).
pub fn trial_passed(text: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(text).ok()?;
    outcome(&value)
}

fn outcome(entry: &Value) -> Option<bool> {
    let obj = entry.as_object()?;
    OUTCOME_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_bool))
}

/// Parse a run-level aggregate results file into `task_id -> passed`.
///
/// Accepts either a bare list of entries or an object with a `results` list.
/// Entries without a task id or boolean outcome are skipped.
pub fn run_results(text: &str) -> BTreeMap<String, bool> {
    let mut map = BTreeMap::new();
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return map;
    };

    let entries = match &value {
        Value::Array(list) => list.as_slice(),
        Value::Object(obj) => match obj.get("results").and_then(Value::as_array) {
            Some(list) => list.as_slice(),
            None => return map,
        },
        _ => return map,
    };

    for entry in entries {
        let task_id = entry.get("task_id").and_then(Value::as_str);
        if let (Some(task_id), Some(passed)) = (task_id, outcome(entry)) {
            // Later entries for the same task are later attempts.
            map.insert(task_id.to_string(), passed);
        }
    }
    map
}

/// Descriptive fields from `run_metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, alias = "agent")]
    pub agent_name: Option<String>,
    #[serde(default, alias = "model")]
    pub model_name: Option<String>,
    #[serde(default, alias = "dataset")]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

pub fn run_metadata(text: &str) -> Option<RunMetadata> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_passed_prefers_is_resolved() {
        assert_eq!(trial_passed(r#"{"is_resolved": true, "passed": false}"#), Some(true));
        assert_eq!(trial_passed(r#"{"resolved": false}"#), Some(false));
        assert_eq!(trial_passed(r#"{"passed": true}"#), Some(true));
    }

    #[test]
    fn test_trial_passed_null_outcome_is_no_evidence() {
        assert_eq!(trial_passed(r#"{"is_resolved": null, "passed": null}"#), None);
        assert_eq!(trial_passed(r#"{"task_id": "x"}"#), None);
    }

    #[test]
    fn test_trial_passed_skips_null_for_next_field() {
        assert_eq!(trial_passed(r#"{"is_resolved": null, "passed": true}"#), Some(true));
    }

    #[test]
    fn test_trial_passed_malformed() {
        assert_eq!(trial_passed(""), None);
        assert_eq!(trial_passed(r#"{"is_resolved": tr"#), None);
        assert_eq!(trial_passed("[true]"), None);
    }

    #[test]
    fn test_run_results_object_form() {
        let text = r#"{
            "results": [
                {"task_id": "hello-world", "is_resolved": true},
                {"task_id": "fix-permissions", "is_resolved": false},
                {"task_id": "pending-one", "is_resolved": null}
            ],
            "accuracy": 0.5
        }"#;
        let map = run_results(text);
        assert_eq!(map.len(), 2);
        assert_eq!(map["hello-world"], true);
        assert_eq!(map["fix-permissions"], false);
    }

    #[test]
    fn test_run_results_list_form() {
        let text = r#"[{"task_id": "a", "passed": true}, {"name": "b", "passed": true}]"#;
        let map = run_results(text);
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"], true);
    }

    #[test]
    fn test_run_results_partial_write() {
        assert!(run_results(r#"{"results": [{"task_id": "a", "is_res"#).is_empty());
    }

    #[test]
    fn test_run_metadata_aliases() {
        let meta = run_metadata(
            r#"{"run_id": "2025-01-01__00-00-00", "agent": "opencode", "model_name": "openai/gpt-4o-mini"}"#,
        )
        .unwrap();
        assert_eq!(meta.agent_name.as_deref(), Some("opencode"));
        assert_eq!(meta.model_name.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(meta.dataset_name, None);
    }
}
