//! Forbidden-pattern scanning of implementation files.
//!
//! Patterns come from the anchor nodes reachable through a feature's
//! prerequisites. Each line of each implementation file is tested on its
//! own; `allow_pattern` directives in the feature's notes suppress hits.

use crate::directives::{self, AllowPattern};
use crate::feature::ParsedFeature;
use crate::graph::FeatureSet;
use crate::io;
use crate::paths;
use crate::types::Status;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    pub line: usize,
    pub pattern: String,
    pub forbidden_by: String,
}

/// A forbidden pattern that failed to compile and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternIssue {
    pub pattern: String,
    pub forbidden_by: String,
    pub error: String,
}

/// An `allow_pattern` scope glob that failed to compile. The allowance
/// still applies to the remaining globs of its list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobIssue {
    pub glob: String,
    pub allow_pattern: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyResult {
    pub violations: Vec<Violation>,
    pub invalid_patterns: Vec<PatternIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid_globs: Vec<GlobIssue>,
    /// `impl_file` directives naming files that do not exist.
    pub missing_files: Vec<String>,
    pub scanned: Vec<String>,
    pub anchors: Vec<String>,
}

impl PolicyResult {
    pub fn status(&self) -> Status {
        if !self.violations.is_empty() {
            Status::Fail
        } else if !self.invalid_patterns.is_empty()
            || !self.invalid_globs.is_empty()
            || !self.missing_files.is_empty()
        {
            Status::Warn
        } else {
            Status::Pass
        }
    }
}

struct Rule {
    re: Regex,
    pattern: String,
    forbidden_by: String,
}

struct Allowance {
    spec: AllowPattern,
    re: Option<Regex>,
    scope: Scope,
}

impl Allowance {
    fn new(spec: AllowPattern, issues: &mut Vec<GlobIssue>) -> Self {
        let scope = Scope::compile(&spec, issues);
        Self {
            re: Regex::new(&spec.pattern).ok(),
            spec,
            scope,
        }
    }

    fn suppresses(&self, rule: &Rule, rel_file: &str, line: &str) -> bool {
        if !self.scope.contains(rel_file) {
            return false;
        }
        let same = self.spec.pattern == rule.pattern
            || collapse_escapes(&self.spec.pattern) == collapse_escapes(&rule.pattern);
        same || self.re.as_ref().map(|re| re.is_match(line)).unwrap_or(false)
    }
}

/// Files an allowance applies to. `*` stays within one path segment and
/// `**` crosses segments; a glob without a `/` also matches by basename.
enum Scope {
    Everywhere,
    Globs { paths: GlobSet, basenames: GlobSet },
}

impl Scope {
    fn compile(spec: &AllowPattern, issues: &mut Vec<GlobIssue>) -> Scope {
        if spec.files.is_empty() {
            return Scope::Everywhere;
        }
        let mut paths = GlobSetBuilder::new();
        let mut basenames = GlobSetBuilder::new();
        for raw in &spec.files {
            let glob = raw.trim().trim_start_matches("./");
            match GlobBuilder::new(glob).literal_separator(true).build() {
                Ok(g) => {
                    if !glob.contains('/') {
                        basenames.add(g.clone());
                    }
                    paths.add(g);
                }
                Err(e) => {
                    tracing::warn!(glob = %glob, pattern = %spec.pattern, "invalid allow_pattern scope");
                    issues.push(GlobIssue {
                        glob: glob.to_string(),
                        allow_pattern: spec.pattern.clone(),
                        error: e.kind().to_string(),
                    });
                }
            }
        }
        Scope::Globs {
            paths: build_set(paths),
            basenames: build_set(basenames),
        }
    }

    fn contains(&self, rel_file: &str) -> bool {
        match self {
            Scope::Everywhere => true,
            Scope::Globs { paths, basenames } => {
                let base = rel_file.rsplit('/').next().unwrap_or(rel_file);
                paths.is_match(rel_file) || basenames.is_match(base)
            }
        }
    }
}

fn build_set(builder: GlobSetBuilder) -> GlobSet {
    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "allow_pattern scope set failed to build");
        GlobSet::empty()
    })
}

/// Notes often double the backslashes of a pattern they quote.
fn collapse_escapes(pattern: &str) -> String {
    pattern.replace("\\\\", "\\")
}

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

/// Files to scan: `impl_file` directives when present, else every non-test
/// file under the tools root whose tools-relative path contains the stem.
/// Returns `(existing files, missing directive paths)`.
pub fn implementation_files(
    feature: &ParsedFeature,
    root: &Path,
    tools_root: &Path,
) -> (Vec<PathBuf>, Vec<String>) {
    let declared = directives::impl_files(&feature.impl_notes);
    if !declared.is_empty() {
        let mut files = Vec::new();
        let mut missing = Vec::new();
        for rel in declared {
            let path = root.join(&rel);
            if path.is_file() {
                files.push(path);
            } else {
                missing.push(rel);
            }
        }
        return (files, missing);
    }

    let files = io::collect_files(tools_root)
        .into_iter()
        .filter(|p| !paths::is_test_file(p))
        .filter(|p| paths::rel_display(tools_root, p).contains(&feature.stem))
        .collect();
    (files, Vec::new())
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

pub fn policy(
    feature: &ParsedFeature,
    features: &FeatureSet,
    root: &Path,
    tools_root: &Path,
) -> PolicyResult {
    let mut result = PolicyResult::default();

    let mut rules = Vec::new();
    for anchor in features.anchors_for(feature) {
        result.anchors.push(anchor.rel_path.clone());
        for pattern in &anchor.forbidden_patterns {
            match Regex::new(pattern) {
                Ok(re) => rules.push(Rule {
                    re,
                    pattern: pattern.clone(),
                    forbidden_by: anchor.rel_path.clone(),
                }),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, anchor = %anchor.rel_path, "invalid forbidden pattern");
                    result.invalid_patterns.push(PatternIssue {
                        pattern: pattern.clone(),
                        forbidden_by: anchor.rel_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    let allowances: Vec<Allowance> = directives::allow_patterns(&feature.impl_notes)
        .into_iter()
        .map(|spec| Allowance::new(spec, &mut result.invalid_globs))
        .collect();

    let (files, missing) = implementation_files(feature, root, tools_root);
    result.missing_files = missing;
    if rules.is_empty() {
        return result;
    }

    for path in files {
        let rel = paths::rel_display(root, &path);
        let content = match io::read_text_lossy(&path) {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::debug!(file = %rel, "skipping binary file");
                continue;
            }
            Err(e) => {
                tracing::warn!(file = %rel, error = %e, "unreadable implementation file");
                continue;
            }
        };
        result.violations.extend(scan(&rel, &content, &rules, &allowances));
        result.scanned.push(rel);
    }
    result
}

fn scan(rel: &str, content: &str, rules: &[Rule], allowances: &[Allowance]) -> Vec<Violation> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        for rule in rules {
            if !rule.re.is_match(line) {
                continue;
            }
            if allowances.iter().any(|a| a.suppresses(rule, rel, line)) {
                continue;
            }
            out.push(Violation {
                file: rel.to_string(),
                line: idx + 1,
                pattern: rule.pattern.clone(),
                forbidden_by: rule.forbidden_by.clone(),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::load_feature;
    use tempfile::TempDir;

    const ANCHOR: &str = "## Overview\nAuth rules.\n\n## Forbidden Patterns\n- \\bprint\\s*\\(\n";

    fn project(login_notes: &str) -> (TempDir, FeatureSet) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("features")).unwrap();
        std::fs::create_dir_all(root.join("tools/auth")).unwrap();
        std::fs::write(root.join("features/arch_auth.md"), ANCHOR).unwrap();
        std::fs::write(
            root.join("features/login.md"),
            format!(
                "> Prerequisite: arch_auth.md\n\n## Overview\nLogin.\n\n## Implementation Notes\n{login_notes}\n"
            ),
        )
        .unwrap();
        let mut source = String::new();
        for i in 1..12 {
            source.push_str(&format!("x{i} = {i}\n"));
        }
        source.push_str("print(\"debug\")\n");
        std::fs::write(root.join("tools/auth/login.py"), source).unwrap();
        let set = FeatureSet::load(root, &root.join("features")).unwrap();
        (dir, set)
    }

    fn run(dir: &TempDir, set: &FeatureSet) -> PolicyResult {
        let login = set.get("login.md").unwrap();
        policy(login, set, dir.path(), &dir.path().join("tools"))
    }

    #[test]
    fn violation_is_reported_with_location() {
        let (dir, set) = project("- impl_file: tools/auth/login.py");
        let result = run(&dir, &set);
        assert_eq!(result.status(), Status::Fail);
        assert_eq!(
            result.violations,
            vec![Violation {
                file: "tools/auth/login.py".into(),
                line: 12,
                pattern: r"\bprint\s*\(".into(),
                forbidden_by: "features/arch_auth.md".into(),
            }]
        );
        assert_eq!(result.anchors, vec!["features/arch_auth.md".to_string()]);
    }

    #[test]
    fn allow_pattern_with_doubled_backslashes_suppresses() {
        let (dir, set) = project(
            "- impl_file: tools/auth/login.py\n- allow_pattern: \"\\\\bprint\\\\s*\\\\(\" in tools/auth/login.py",
        );
        let result = run(&dir, &set);
        assert_eq!(result.status(), Status::Pass);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn allow_pattern_out_of_scope_does_not_suppress() {
        let (dir, set) = project(
            "- impl_file: tools/auth/login.py\n- allow_pattern: \"\\bprint\\s*\\(\" in tools/other/*.py",
        );
        assert_eq!(run(&dir, &set).violations.len(), 1);
    }

    #[test]
    fn allow_scope_globs() {
        let mut issues = Vec::new();
        let scope = |files: &[&str], issues: &mut Vec<GlobIssue>| {
            Scope::compile(
                &AllowPattern {
                    pattern: "x".into(),
                    files: files.iter().map(|f| f.to_string()).collect(),
                },
                issues,
            )
        };
        let path = "tools/auth/login.py";
        assert!(scope(&[], &mut issues).contains(path));
        assert!(scope(&["tools/auth/login.py"], &mut issues).contains(path));
        assert!(scope(&["./tools/*/login.py"], &mut issues).contains(path));
        assert!(scope(&["tools/**"], &mut issues).contains("tools/auth/deep/login.py"));
        assert!(scope(&["tools/**/*.py"], &mut issues).contains("tools/login.py"));
        assert!(scope(&["*.py"], &mut issues).contains(path));
        assert!(!scope(&["tools/*.py"], &mut issues).contains(path));
        assert!(!scope(&["other.py"], &mut issues).contains(path));
        assert!(issues.is_empty());
    }

    #[test]
    fn invalid_allow_scope_warns_and_does_not_suppress() {
        let (dir, set) = project(
            "- impl_file: tools/auth/login.py\n- allow_pattern: \"\\bprint\\s*\\(\" in tools/auth/[",
        );
        let result = run(&dir, &set);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.invalid_globs.len(), 1);
        assert_eq!(result.invalid_globs[0].glob, "tools/auth/[");

        let only_glob = PolicyResult {
            invalid_globs: result.invalid_globs.clone(),
            ..Default::default()
        };
        assert_eq!(only_glob.status(), Status::Warn);
    }

    #[test]
    fn one_bad_glob_keeps_the_rest_of_the_scope() {
        let (dir, set) = project(
            "- impl_file: tools/auth/login.py\n- allow_pattern: \"\\bprint\\s*\\(\" in tools/auth/[, tools/auth/*.py",
        );
        let result = run(&dir, &set);
        assert!(result.violations.is_empty());
        assert_eq!(result.status(), Status::Warn);
    }

    #[test]
    fn heuristic_discovery_skips_test_files() {
        let (dir, set) = project("");
        std::fs::write(dir.path().join("tools/auth/test_login.py"), "print('x')\n").unwrap();
        let result = run(&dir, &set);
        assert_eq!(result.scanned, vec!["tools/auth/login.py".to_string()]);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn missing_impl_file_warns() {
        let (dir, set) = project("- impl_file: tools/auth/gone.py");
        let result = run(&dir, &set);
        assert_eq!(result.status(), Status::Warn);
        assert_eq!(result.missing_files, vec!["tools/auth/gone.py".to_string()]);
    }

    #[test]
    fn invalid_pattern_is_skipped_with_warning() {
        let (dir, _) = project("- impl_file: tools/auth/login.py");
        std::fs::write(
            dir.path().join("features/arch_auth.md"),
            "## Forbidden Patterns\n- ([unclosed\n",
        )
        .unwrap();
        let set = FeatureSet::load(dir.path(), &dir.path().join("features")).unwrap();
        let result = run(&dir, &set);
        assert_eq!(result.status(), Status::Warn);
        assert_eq!(result.invalid_patterns[0].pattern, "([unclosed");
    }

    #[test]
    fn binary_files_are_skipped() {
        let (dir, set) = project("- impl_file: tools/auth/blob.bin");
        std::fs::write(dir.path().join("tools/auth/blob.bin"), b"print(\0)").unwrap();
        let result = run(&dir, &set);
        assert!(result.violations.is_empty());
        assert!(result.scanned.is_empty());
    }

    #[test]
    fn companion_notes_feed_directives() {
        let (dir, _) = project("");
        std::fs::write(
            dir.path().join("features/login.impl.md"),
            "- impl_file: tools/auth/login.py\n",
        )
        .unwrap();
        let login = load_feature(dir.path(), &dir.path().join("features/login.md")).unwrap();
        let (files, _) = implementation_files(&login, dir.path(), &dir.path().join("tools"));
        assert_eq!(files, vec![dir.path().join("tools/auth/login.py")]);
    }
}
