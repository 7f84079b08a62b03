use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Result messages ──────────────────────────────────────────────────────

/// The object printed by `claude --print --output-format json`.
///
/// `subtype` distinguishes success from the various error conditions. Only
/// the answer text and the error flag are kept; everything else the CLI
/// prints is ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ResultMessage {
    Success(ResultSuccess),
    ErrorDuringExecution(ResultError),
    ErrorMaxTurns(ResultError),
    ErrorMaxBudgetUsd(ResultError),
}

impl ResultMessage {
    /// A success subtype can still carry `is_error: true` (e.g. an API error
    /// reported as the result text).
    pub fn is_error(&self) -> bool {
        match self {
            ResultMessage::Success(r) => r.is_error,
            _ => true,
        }
    }

    /// The answer for a success, or the reported errors joined with `; `.
    pub fn result_text(&self) -> String {
        match self {
            ResultMessage::Success(r) => r.result.clone(),
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => r.errors.join("; "),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultSuccess {
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultError {
    #[serde(default)]
    pub errors: Vec<String>,
}

// ─── QueryOptions ─────────────────────────────────────────────────────────

/// Options for a single `claude --print` invocation.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Claude model name (e.g. `"claude-sonnet-4-6"`)
    pub model: Option<String>,
    /// Override system prompt
    pub system_prompt: Option<String>,
    pub max_turns: Option<u32>,
    /// Custom path to the `claude` binary (default: `"claude"`)
    pub path_to_executable: Option<String>,
    /// Working directory for the subprocess (default: current dir)
    pub cwd: Option<PathBuf>,
    /// Wall-clock limit; the subprocess is killed when it elapses.
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_with_extra_fields() {
        let json = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":1200,
            "num_turns":1,"result":"ALIGNED","session_id":"abc","total_cost_usd":0.01,
            "usage":{"input_tokens":10,"output_tokens":2}}"#;
        let msg: ResultMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.result_text(), "ALIGNED");
        assert!(!msg.is_error());
    }

    #[test]
    fn error_subtype_reports_its_errors() {
        let json = r#"{"type":"result","subtype":"error_max_turns","num_turns":3,
            "session_id":"x","errors":["max turns reached","budget"]}"#;
        let msg: ResultMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_error());
        assert_eq!(msg.result_text(), "max turns reached; budget");
    }

    #[test]
    fn error_subtype_without_errors_is_empty() {
        let json = r#"{"type":"result","subtype":"error_during_execution"}"#;
        let msg: ResultMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_error());
        assert_eq!(msg.result_text(), "");
    }

    #[test]
    fn success_flagged_as_error() {
        let json = r#"{"subtype":"success","is_error":true,"result":"API Error: 529"}"#;
        let msg: ResultMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_error());
        assert_eq!(msg.result_text(), "API Error: 529");
    }
}
