use thiserror::Error;

#[derive(Debug, Error)]
pub enum PurlinError {
    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    #[error("features directory not found: {0}")]
    FeaturesDirMissing(String),

    #[error("invalid checklist file {path}: {reason}")]
    InvalidChecklist { path: String, reason: String },

    #[error("step id '{0}' uses the reserved 'purlin.' prefix")]
    ReservedStepId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PurlinError>;

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

/// Structural problems found while parsing a feature file. These never abort
/// a critic run; the gate controller turns them into FAIL checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("duplicate scenario title: {0}")]
    DuplicateScenarioTitle(String),

    #[error("missing Scenarios section")]
    MissingScenariosSection,

    #[error("scenario header without a title at line {line}")]
    UnparseableScenarioHeader { line: usize },
}

// ---------------------------------------------------------------------------
// VcsError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to spawn git: {0}")]
    Spawn(String),

    #[error("git timed out after {0}s")]
    Timeout(u64),

    #[error("git exited with failure: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// LlmError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("llm client unavailable: {0}")]
    Unavailable(String),

    #[error("llm call timed out after {0}s")]
    Timeout(u64),

    #[error("llm call cancelled")]
    Cancelled,

    #[error("llm call failed: {0}")]
    Failed(String),
}
