use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeAgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse claude output: {source}\n  output: {output}")]
    Parse {
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Claude process timed out after {0} ms")]
    Timeout(u64),
}
