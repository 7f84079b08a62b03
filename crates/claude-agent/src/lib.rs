//! `claude-agent`: a small async driver for one-shot `claude --print` calls.
//!
//! The prompt is written to the subprocess stdin and the single JSON result
//! object printed by `--output-format json` is parsed into a [`RunResult`].
//!
//! ```rust,ignore
//! use claude_agent::{agent_run, QueryOptions, RunConfig};
//!
//! let result = agent_run(RunConfig {
//!     system_prompt: Some("Answer in one word.".into()),
//!     prompt: "Is water wet?".into(),
//!     opts: QueryOptions::default(),
//! })
//! .await?;
//! println!("{}", result.result_text);
//! ```

pub mod error;
pub mod runner;
pub mod types;

pub(crate) mod process;

pub use error::ClaudeAgentError;
pub use runner::{run as agent_run, RunConfig, RunResult};
pub use types::{QueryOptions, ResultError, ResultMessage, ResultSuccess};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
