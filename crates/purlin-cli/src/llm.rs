//! Logic drift oracle backed by the async `claude-agent` driver.

use async_trait::async_trait;
use claude_agent::{agent_run, ClaudeAgentError, QueryOptions, RunConfig};
use purlin_core::config::CriticConfig;
use purlin_core::drift::DriftOracle;
use purlin_core::error::LlmError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ClaudeOracle {
    executable: PathBuf,
    model: String,
    timeout: Duration,
    cwd: PathBuf,
}

impl ClaudeOracle {
    /// Build an oracle when a `claude` binary is on `PATH`. `None` means the
    /// client is unavailable and drift checks will be skipped.
    pub fn detect(root: &Path, config: &CriticConfig) -> Option<Self> {
        let executable = match which::which("claude") {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "claude binary not found, logic drift will be skipped");
                return None;
            }
        };
        tracing::debug!(exe = %executable.display(), model = %config.critic_llm_model, "logic drift client ready");
        Some(Self {
            executable,
            model: config.critic_llm_model.clone(),
            timeout: config.llm_timeout(),
            cwd: root.to_path_buf(),
        })
    }

    fn config(&self, system: &str, user: &str) -> RunConfig {
        RunConfig {
            system_prompt: Some(system.to_string()),
            prompt: user.to_string(),
            opts: QueryOptions {
                model: Some(self.model.clone()),
                max_turns: Some(1),
                path_to_executable: Some(self.executable.to_string_lossy().into_owned()),
                cwd: Some(self.cwd.clone()),
                timeout: Some(self.timeout),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl DriftOracle for ClaudeOracle {
    async fn judge(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let result = agent_run(self.config(system, user)).await.map_err(to_llm_error)?;
        if result.is_error {
            return Err(LlmError::Failed(format!(
                "claude returned an error result: {}",
                result.result_text
            )));
        }
        Ok(result.result_text)
    }
}

/// Cancel `token` on the first Ctrl-C. The process keeps running so the
/// report for already-judged pairs is still written.
pub async fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                tracing::warn!("interrupted, cancelling outstanding logic drift calls");
                token.cancel();
            }
        }
        _ = token.cancelled() => {}
    }
}

fn to_llm_error(e: ClaudeAgentError) -> LlmError {
    match e {
        ClaudeAgentError::Timeout(ms) => LlmError::Timeout(ms.div_ceil(1000)),
        ClaudeAgentError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            LlmError::Unavailable(io.to_string())
        }
        other => LlmError::Failed(other.to_string()),
    }
}
