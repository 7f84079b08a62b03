use crate::process;
use crate::types::ResultMessage;
use crate::{ClaudeAgentError, QueryOptions, Result};

// ─── RunConfig ────────────────────────────────────────────────────────────

/// Configuration for a single Claude run.
///
/// Pass to [`run`] to drive a query to completion and receive a [`RunResult`].
#[derive(Debug)]
pub struct RunConfig {
    /// System prompt override (replaces Claude's default system prompt).
    pub system_prompt: Option<String>,
    /// The user-facing prompt Claude will act on.
    pub prompt: String,
    pub opts: QueryOptions,
}

// ─── RunResult ────────────────────────────────────────────────────────────

/// The terminal result of a completed run.
#[derive(Debug)]
pub struct RunResult {
    /// The final text Claude produced, or its joined error list for error
    /// subtypes.
    pub result_text: String,
    pub is_error: bool,
}

impl From<ResultMessage> for RunResult {
    fn from(r: ResultMessage) -> Self {
        RunResult {
            result_text: r.result_text(),
            is_error: r.is_error(),
        }
    }
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Drive a single Claude query to completion.
///
/// Merges `config.system_prompt` into `config.opts`, runs the subprocess
/// under `opts.timeout` when set, and parses the terminal result object.
pub async fn run(config: RunConfig) -> Result<RunResult> {
    let mut opts = config.opts;
    if let Some(sp) = config.system_prompt {
        opts.system_prompt = Some(sp);
    }

    let exec = process::execute(&config.prompt, &opts);
    let stdout = match opts.timeout {
        Some(limit) => tokio::time::timeout(limit, exec)
            .await
            .map_err(|_| ClaudeAgentError::Timeout(limit.as_millis() as u64))??,
        None => exec.await?,
    };

    let result = parse_output(&stdout)?;
    tracing::debug!(
        is_error = result.is_error,
        len = result.result_text.len(),
        "claude run finished"
    );
    Ok(result)
}

// ─── Internal ─────────────────────────────────────────────────────────────

/// Parse `--output-format json` output. Verbose builds print an array of
/// messages; the last `result` entry is taken.
pub(crate) fn parse_output(stdout: &str) -> Result<RunResult> {
    let trimmed = stdout.trim();
    let parse_err = |source| ClaudeAgentError::Parse {
        output: trimmed.chars().take(500).collect(),
        source,
    };
    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(parse_err)?;

    let result = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .rev()
            .find(|v| v.get("type").and_then(|t| t.as_str()) == Some("result"))
            .ok_or_else(|| {
                ClaudeAgentError::Process("output contained no result message".into())
            })?,
        other => other,
    };

    let msg: ResultMessage = serde_json::from_value(result).map_err(parse_err)?;
    Ok(msg.into())
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_single_object() {
        let r = parse_output(
            r#"{"type":"result","subtype":"success","result":"hello world","session_id":"s1","num_turns":3,"total_cost_usd":0.012}"#,
        )
        .unwrap();
        assert_eq!(r.result_text, "hello world");
        assert!(!r.is_error);
    }

    #[test]
    fn parse_verbose_array_takes_result() {
        let r = parse_output(
            r#"[{"type":"system","subtype":"init"},{"type":"result","subtype":"success","result":"done"}]"#,
        )
        .unwrap();
        assert_eq!(r.result_text, "done");
    }

    #[test]
    fn parse_error_subtype_sets_is_error() {
        let r = parse_output(
            r#"{"type":"result","subtype":"error_during_execution","errors":["tool crashed"]}"#,
        )
        .unwrap();
        assert!(r.is_error);
        assert_eq!(r.result_text, "tool crashed");
    }

    #[test]
    fn parse_array_without_result_is_err() {
        let err = parse_output(r#"[{"type":"system"}]"#).unwrap_err();
        assert!(err.to_string().contains("no result message"));
    }

    #[test]
    fn parse_garbage_is_parse_error() {
        assert!(matches!(
            parse_output("not json"),
            Err(ClaudeAgentError::Parse { .. })
        ));
    }

    #[cfg(unix)]
    fn mock_claude(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_against_mock_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = mock_claude(
            dir.path(),
            r#"cat >/dev/null; printf '{"type":"result","subtype":"success","result":"ALIGNED\\nok","session_id":"m"}'"#,
        );
        let result = run(RunConfig {
            system_prompt: Some("judge".into()),
            prompt: "scenario".into(),
            opts: QueryOptions {
                path_to_executable: Some(exe),
                ..Default::default()
            },
        })
        .await
        .unwrap();
        assert_eq!(result.result_text, "ALIGNED\nok");
        assert!(!result.is_error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = mock_claude(dir.path(), "sleep 5");
        let err = run(RunConfig {
            system_prompt: None,
            prompt: "scenario".into(),
            opts: QueryOptions {
                path_to_executable: Some(exe),
                timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ClaudeAgentError::Timeout(200)));
    }
}
