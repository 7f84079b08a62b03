//! Directives embedded in a feature's Implementation Notes:
//!
//! ```text
//! - traceability_override: "<scenario title>" -> <test_entry_name>
//! - impl_file: <path>
//! - allow_pattern: "<regex>" [in <glob>[,<glob>...]]
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static OVERRIDE_RE: OnceLock<Regex> = OnceLock::new();
static IMPL_FILE_RE: OnceLock<Regex> = OnceLock::new();
static ALLOW_RE: OnceLock<Regex> = OnceLock::new();

fn override_re() -> &'static Regex {
    OVERRIDE_RE.get_or_init(|| {
        Regex::new(r#"-\s*traceability_override:\s*"(?P<title>[^"]+)"\s*->\s*(?P<entry>\S+)"#)
            .unwrap()
    })
}

fn impl_file_re() -> &'static Regex {
    IMPL_FILE_RE.get_or_init(|| Regex::new(r"-\s*impl_file:\s*(?P<path>\S+)").unwrap())
}

fn allow_re() -> &'static Regex {
    ALLOW_RE.get_or_init(|| {
        Regex::new(r#"-\s*allow_pattern:\s*"(?P<pattern>[^"]+)"(?:\s+in\s+(?P<files>\S.*))?"#)
            .unwrap()
    })
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('`').trim()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityOverride {
    pub title: String,
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowPattern {
    pub pattern: String,
    /// Empty means the allowance applies to every scanned file.
    pub files: Vec<String>,
}

pub fn traceability_overrides(notes: &str) -> Vec<TraceabilityOverride> {
    notes
        .lines()
        .filter_map(|line| override_re().captures(line))
        .map(|caps| TraceabilityOverride {
            title: caps["title"].trim().to_string(),
            entry: unquote(&caps["entry"]).to_string(),
        })
        .collect()
}

pub fn impl_files(notes: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in notes.lines().filter_map(|line| impl_file_re().captures(line)) {
        let path = unquote(&caps["path"]).trim_start_matches("./").to_string();
        if !path.is_empty() && !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

pub fn allow_patterns(notes: &str) -> Vec<AllowPattern> {
    notes
        .lines()
        .filter_map(|line| allow_re().captures(line))
        .map(|caps| AllowPattern {
            pattern: caps["pattern"].to_string(),
            files: caps
                .name("files")
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(unquote)
                        .filter(|g| !g.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTES: &str = r#"
Some prose about the implementation.

- traceability_override: "User logs in with valid credentials" -> test_unrelated
- traceability_override: "Broken" ->
- impl_file: tools/auth/login.py
- impl_file: `./tools/auth/session.py`
- impl_file: tools/auth/login.py
- allow_pattern: "\bprint\s*\(" in tools/auth/login.py, tools/cli/*.py
- allow_pattern: "TODO"
"#;

    #[test]
    fn overrides_are_parsed() {
        let o = traceability_overrides(NOTES);
        assert_eq!(
            o,
            vec![TraceabilityOverride {
                title: "User logs in with valid credentials".into(),
                entry: "test_unrelated".into(),
            }]
        );
    }

    #[test]
    fn impl_files_are_deduplicated_and_normalized() {
        assert_eq!(
            impl_files(NOTES),
            vec![
                "tools/auth/login.py".to_string(),
                "tools/auth/session.py".to_string()
            ]
        );
    }

    #[test]
    fn allow_patterns_with_and_without_scope() {
        let a = allow_patterns(NOTES);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].pattern, r"\bprint\s*\(");
        assert_eq!(
            a[0].files,
            vec!["tools/auth/login.py".to_string(), "tools/cli/*.py".to_string()]
        );
        assert_eq!(a[1].pattern, "TODO");
        assert!(a[1].files.is_empty());
    }

    #[test]
    fn empty_notes_have_no_directives() {
        assert!(traceability_overrides("").is_empty());
        assert!(impl_files("").is_empty());
        assert!(allow_patterns("").is_empty());
    }
}
