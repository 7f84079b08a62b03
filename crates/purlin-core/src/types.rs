use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Check, gate, and feature verdict. Ordered so that `max` is the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
        }
    }

    /// Worst status across `iter`; PASS when empty.
    pub fn worst<I: IntoIterator<Item = Status>>(iter: I) -> Status {
        iter.into_iter().max().unwrap_or(Status::Pass)
    }

    /// CLI exit code for an aggregate verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Pass => 0,
            Status::Warn => 1,
            Status::Fail => 2,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Lifecycle {
    Todo,
    Testing,
    Complete,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Todo => "TODO",
            Lifecycle::Testing => "TESTING",
            Lifecycle::Complete => "COMPLETE",
        }
    }

    /// One state lower; TODO stays TODO.
    pub fn downgrade(self) -> Lifecycle {
        match self {
            Lifecycle::Complete => Lifecycle::Testing,
            Lifecycle::Testing | Lifecycle::Todo => Lifecycle::Todo,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AnchorKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    None,
    Arch,
    Design,
    Policy,
}

impl AnchorKind {
    pub fn from_stem(stem: &str) -> AnchorKind {
        if stem.starts_with("arch_") {
            AnchorKind::Arch
        } else if stem.starts_with("design_") {
            AnchorKind::Design
        } else if stem.starts_with("policy_") {
            AnchorKind::Policy
        } else {
            AnchorKind::None
        }
    }

    pub fn is_anchor(self) -> bool {
        self != AnchorKind::None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_wins() {
        assert_eq!(Status::worst([Status::Pass, Status::Warn]), Status::Warn);
        assert_eq!(
            Status::worst([Status::Warn, Status::Fail, Status::Pass]),
            Status::Fail
        );
        assert_eq!(Status::worst(Vec::new()), Status::Pass);
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Status::Warn).unwrap(), "\"WARN\"");
        assert_eq!(
            serde_json::to_string(&Lifecycle::Complete).unwrap(),
            "\"COMPLETE\""
        );
    }

    #[test]
    fn lifecycle_downgrade_chain() {
        assert_eq!(Lifecycle::Complete.downgrade(), Lifecycle::Testing);
        assert_eq!(Lifecycle::Testing.downgrade(), Lifecycle::Todo);
        assert_eq!(Lifecycle::Todo.downgrade(), Lifecycle::Todo);
    }

    #[test]
    fn anchor_kind_from_stem() {
        assert_eq!(AnchorKind::from_stem("arch_auth"), AnchorKind::Arch);
        assert_eq!(AnchorKind::from_stem("design_colors"), AnchorKind::Design);
        assert_eq!(AnchorKind::from_stem("policy_logging"), AnchorKind::Policy);
        assert_eq!(AnchorKind::from_stem("login"), AnchorKind::None);
        assert!(!AnchorKind::from_stem("archive").is_anchor());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Status::Pass.exit_code(), 0);
        assert_eq!(Status::Warn.exit_code(), 1);
        assert_eq!(Status::Fail.exit_code(), 2);
    }
}
