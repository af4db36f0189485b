use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::lock::LockObservation;

/// Result of one scenario run, in the shape the CLI prints as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub passed: bool,
    pub elapsed_ms: u64,
    /// Lock rows that satisfied the scenario's expectation, if it had one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observed: Vec<LockObservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioReport {
    pub fn new(
        scenario: &str,
        elapsed: Duration,
        result: Result<Vec<LockObservation>, ProbeError>,
    ) -> Self {
        let (passed, observed, error) = match result {
            Ok(observed) => (true, observed, None),
            Err(e) => (false, Vec::new(), Some(e.to_string())),
        };
        ScenarioReport {
            scenario: scenario.to_string(),
            passed,
            elapsed_ms: elapsed.as_millis() as u64,
            observed,
            error,
        }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| self.fallback_line(&e))
    }

    /// Summary line without the observations, for a report that would not serialize.
    fn fallback_line(&self, reason: &dyn std::fmt::Display) -> String {
        serde_json::json!({
            "scenario": self.scenario,
            "passed": self.passed,
            "elapsed_ms": self.elapsed_ms,
            "error": format!("unserializable report: {}", reason),
        })
        .to_string()
    }
}
