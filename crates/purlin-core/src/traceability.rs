//! Scenario-to-test traceability.
//!
//! Test entries come from two shapes: `def test_*` functions in code files
//! and `echo "[Scenario] <title>"` markers in shell scripts. An automated
//! scenario is traced when an override names an existing entry, or when at
//! least two of its title keywords appear in an entry's name or body.

use crate::directives::{self, TraceabilityOverride};
use crate::feature::Scenario;
use crate::io;
use crate::paths;
use crate::types::Status;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Articles, common prepositions, and conjunctions dropped from titles.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "so", "yet", "of", "in", "on", "at", "to",
    "for", "with", "by", "from", "as", "into", "onto", "over", "under", "via", "about", "after",
    "before", "without", "within", "between", "through", "upon",
];

/// Minimum keyword overlap for a keyword match.
pub const KEYWORD_THRESHOLD: usize = 2;

/// Coverage at or above this (but below 1.0) is WARN rather than FAIL.
pub const WARN_COVERAGE: f64 = 0.8;

static DEF_RE: OnceLock<Regex> = OnceLock::new();
static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn def_re() -> &'static Regex {
    DEF_RE.get_or_init(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+(test_\w+)\s*\(").unwrap())
}

fn block_re() -> &'static Regex {
    BLOCK_RE.get_or_init(|| Regex::new(r"^(\s*)(?:async\s+)?(?:def|class)\s+\w+").unwrap())
}

fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| Regex::new(r#"echo\s+["']?\[Scenario\]\s*(.+?)["']?$"#).unwrap())
}

// ---------------------------------------------------------------------------
// TestEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestEntry {
    CodeFunction {
        name: String,
        body: String,
        file: String,
        line: usize,
    },
    ShellMarker {
        name: String,
        body: String,
        file: String,
        line: usize,
    },
}

impl TestEntry {
    pub fn name(&self) -> &str {
        match self {
            TestEntry::CodeFunction { name, .. } | TestEntry::ShellMarker { name, .. } => name,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            TestEntry::CodeFunction { body, .. } | TestEntry::ShellMarker { body, .. } => body,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            TestEntry::CodeFunction { file, .. } | TestEntry::ShellMarker { file, .. } => file,
        }
    }

    /// Lowercased words from name and body; snake_case words contribute both
    /// the whole word and each part.
    fn words(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        for text in [self.name(), self.body()] {
            for word in text
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|w| !w.is_empty())
            {
                let word = word.to_lowercase();
                for part in word.split('_').filter(|p| !p.is_empty()) {
                    out.insert(part.to_string());
                }
                out.insert(word);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Entry extraction
// ---------------------------------------------------------------------------

/// Extract entries from one test file, dispatching on extension.
pub fn extract_entries(rel_file: &str, content: &str) -> Vec<TestEntry> {
    if rel_file.ends_with(".sh") {
        extract_shell_markers(rel_file, content)
    } else {
        extract_code_functions(rel_file, content)
    }
}

fn extract_code_functions(rel_file: &str, content: &str) -> Vec<TestEntry> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = def_re().captures(line) else {
            continue;
        };
        let indent = caps[1].len();
        let end = lines[i + 1..]
            .iter()
            .position(|l| {
                block_re()
                    .captures(l)
                    .map(|c| c[1].len() <= indent)
                    .unwrap_or(false)
            })
            .map(|p| i + 1 + p)
            .unwrap_or(lines.len());
        out.push(TestEntry::CodeFunction {
            name: caps[2].to_string(),
            body: lines[i..end].join("\n").trim_end().to_string(),
            file: rel_file.to_string(),
            line: i + 1,
        });
    }
    out
}

fn extract_shell_markers(rel_file: &str, content: &str) -> Vec<TestEntry> {
    let lines: Vec<&str> = content.lines().collect();
    let markers: Vec<(usize, String)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| {
            marker_re()
                .captures(l.trim_end())
                .map(|c| (i, c[1].trim().to_string()))
        })
        .filter(|(_, name)| !name.is_empty())
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(k, (start, name))| {
            let end = markers.get(k + 1).map(|(s, _)| *s).unwrap_or(lines.len());
            TestEntry::ShellMarker {
                name: name.clone(),
                body: lines[*start..end].join("\n").trim_end().to_string(),
                file: rel_file.to_string(),
                line: start + 1,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Test files under `tests/<stem>/` (recursive).
pub fn primary_test_files(root: &Path, stem: &str) -> Vec<PathBuf> {
    io::collect_files(&paths::feature_tests_dir(root, stem))
        .into_iter()
        .filter(|p| paths::is_test_file(p))
        .collect()
}

/// Test files directly inside each immediate child of the tools root, plus
/// loose test files at the tools root itself.
pub fn secondary_test_files(tools_root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = io::list_files(tools_root);
    for child in io::list_dirs(tools_root) {
        files.extend(io::list_files(&child));
    }
    files.retain(|p| paths::is_test_file(p));
    files.sort();
    files
}

fn entries_from(root: &Path, files: &[PathBuf]) -> Vec<TestEntry> {
    let mut out = Vec::new();
    for file in files {
        let content = match io::read_text_lossy(file) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "unreadable test file");
                continue;
            }
        };
        out.extend(extract_entries(&paths::rel_display(root, file), &content));
    }
    out
}

/// Discover entries for a feature. The tools root is consulted only when
/// `tests/<stem>/` yields nothing.
pub fn discover_entries(root: &Path, stem: &str, tools_root: &Path) -> Vec<TestEntry> {
    let primary = entries_from(root, &primary_test_files(root, stem));
    if !primary.is_empty() {
        return primary;
    }
    tracing::debug!(feature = stem, "no primary test entries, scanning tools root");
    entries_from(root, &secondary_test_files(tools_root))
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

pub fn keywords(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVia {
    Keyword,
    Override,
}

impl MatchVia {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchVia::Keyword => "keyword",
            MatchVia::Override => "override",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMatch {
    pub scenario_title: String,
    pub test_entry_names: Vec<String>,
    pub via: MatchVia,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceabilityResult {
    pub coverage: f64,
    pub automated: usize,
    pub manual: usize,
    pub matches: Vec<TraceMatch>,
    pub unmatched: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dangling_overrides: Vec<TraceabilityOverride>,
    #[serde(skip)]
    pub entries: Vec<TestEntry>,
}

impl TraceabilityResult {
    pub fn status(&self) -> Status {
        if self.coverage >= 1.0 {
            Status::Pass
        } else if self.coverage >= WARN_COVERAGE {
            Status::Warn
        } else {
            Status::Fail
        }
    }

    /// Bodies of the entries matched to `title`, in discovery order.
    pub fn matched_bodies(&self, title: &str) -> Vec<&str> {
        let Some(m) = self.matches.iter().find(|m| m.scenario_title == title) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| m.test_entry_names.iter().any(|n| n == e.name()))
            .map(|e| e.body())
            .collect()
    }
}

/// Discover entries for `feature_stem` and trace `scenarios` against them.
pub fn trace(
    scenarios: &[Scenario],
    project_root: &Path,
    feature_stem: &str,
    tools_root: &Path,
    impl_notes: &str,
) -> TraceabilityResult {
    let entries = discover_entries(project_root, feature_stem, tools_root);
    match_scenarios(scenarios, entries, impl_notes)
}

/// Match automated scenarios against already-discovered entries.
pub fn match_scenarios(
    scenarios: &[Scenario],
    entries: Vec<TestEntry>,
    impl_notes: &str,
) -> TraceabilityResult {
    let overrides = directives::traceability_overrides(impl_notes);
    let entry_words: Vec<HashSet<String>> = entries.iter().map(TestEntry::words).collect();
    let has_entry = |name: &str| entries.iter().any(|e| e.name() == name);

    let automated: Vec<&Scenario> = scenarios.iter().filter(|s| !s.is_manual).collect();
    let manual = scenarios.len() - automated.len();

    let dangling_overrides: Vec<TraceabilityOverride> = overrides
        .iter()
        .filter(|o| !has_entry(&o.entry) || !automated.iter().any(|s| s.title == o.title))
        .cloned()
        .collect();

    let mut matches = Vec::new();
    let mut unmatched = Vec::new();

    for scenario in &automated {
        let mut via_override: Vec<String> = Vec::new();
        for o in overrides.iter().filter(|o| o.title == scenario.title) {
            if has_entry(&o.entry) && !via_override.contains(&o.entry) {
                via_override.push(o.entry.clone());
            }
        }
        if !via_override.is_empty() {
            matches.push(TraceMatch {
                scenario_title: scenario.title.clone(),
                test_entry_names: via_override,
                via: MatchVia::Override,
            });
            continue;
        }

        let kw = keywords(&scenario.title);
        let mut names: Vec<String> = Vec::new();
        for (entry, words) in entries.iter().zip(&entry_words) {
            let overlap = kw.iter().filter(|k| words.contains(*k)).count();
            if overlap >= KEYWORD_THRESHOLD && !names.iter().any(|n| n == entry.name()) {
                names.push(entry.name().to_string());
            }
        }
        if names.is_empty() {
            unmatched.push(scenario.title.clone());
        } else {
            matches.push(TraceMatch {
                scenario_title: scenario.title.clone(),
                test_entry_names: names,
                via: MatchVia::Keyword,
            });
        }
    }

    let coverage = if automated.is_empty() {
        1.0
    } else {
        matches.len() as f64 / automated.len() as f64
    };

    TraceabilityResult {
        coverage,
        automated: automated.len(),
        manual,
        matches,
        unmatched,
        dangling_overrides,
        entries,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
