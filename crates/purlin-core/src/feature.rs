//! Line-oriented parser for Purlin feature files.
//!
//! A feature file is Markdown. Sections are `## <Name>` headings (an optional
//! numeric prefix such as `## 4. Visual Specification` is tolerated), and the
//! parser extracts scenarios, discoveries, prerequisites, token tables, and
//! forbidden-pattern blocks from them. Headings inside fenced code blocks are
//! ignored.

use crate::error::{ParseError, Result};
use crate::paths;
use crate::types::AnchorKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

pub const SECTION_OVERVIEW: &str = "Overview";
pub const SECTION_SCENARIOS: &str = "Scenarios";
pub const SECTION_DISCOVERIES: &str = "User Testing Discoveries";
pub const SECTION_VISUAL: &str = "Visual Specification";
pub const SECTION_IMPL_NOTES: &str = "Implementation Notes";

// ---------------------------------------------------------------------------
// Regexes
// ---------------------------------------------------------------------------

static SECTION_RE: OnceLock<Regex> = OnceLock::new();
static HEADING_RE: OnceLock<Regex> = OnceLock::new();
static SCENARIO_RE: OnceLock<Regex> = OnceLock::new();
static MANUAL_RE: OnceLock<Regex> = OnceLock::new();
static DISCOVERY_RE: OnceLock<Regex> = OnceLock::new();
static PREREQ_RE: OnceLock<Regex> = OnceLock::new();
static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
static FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();

fn section_re() -> &'static Regex {
    SECTION_RE.get_or_init(|| Regex::new(r"^##\s+(?:\d+\.\s+)?(.+?)\s*$").unwrap())
}

fn heading_re() -> &'static Regex {
    HEADING_RE.get_or_init(|| Regex::new(r"^#{1,6}\s").unwrap())
}

fn scenario_re() -> &'static Regex {
    SCENARIO_RE.get_or_init(|| Regex::new(r"^\s*(?:#{3,4}\s+)?Scenario:(.*)$").unwrap())
}

fn manual_re() -> &'static Regex {
    MANUAL_RE.get_or_init(|| Regex::new(r"(?i)\[manual\]").unwrap())
}

fn discovery_re() -> &'static Regex {
    DISCOVERY_RE.get_or_init(|| {
        Regex::new(
            r"^#{3,4}\s+\[(BUG|DISCOVERY|INTENT_DRIFT|SPEC_DISPUTE|CLARIFICATION)\]\s*(.*?)\s*$",
        )
        .unwrap()
    })
}

fn prereq_re() -> &'static Regex {
    PREREQ_RE.get_or_init(|| Regex::new(r"(?i)^>\s*prerequisites?:\s*(.+?)\s*$").unwrap())
}

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"^\|\s*`(--[A-Za-z0-9_-]+)`\s*\|\s*`([^`]*)`\s*\|\s*(.*?)\s*\|?\s*$").unwrap()
    })
}

fn forbidden_re() -> &'static Regex {
    FORBIDDEN_RE
        .get_or_init(|| Regex::new(r"^#{2,4}\s+(?:\d+\.\s+)?Forbidden Patterns\s*$").unwrap())
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub title: String,
    pub body: String,
    pub is_manual: bool,
    /// 1-based line of the scenario header.
    pub line: usize,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryKind {
    Bug,
    Discovery,
    IntentDrift,
    SpecDispute,
    Clarification,
}

impl DiscoveryKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "BUG" => Some(DiscoveryKind::Bug),
            "DISCOVERY" => Some(DiscoveryKind::Discovery),
            "INTENT_DRIFT" => Some(DiscoveryKind::IntentDrift),
            "SPEC_DISPUTE" => Some(DiscoveryKind::SpecDispute),
            "CLARIFICATION" => Some(DiscoveryKind::Clarification),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryKind::Bug => "BUG",
            DiscoveryKind::Discovery => "DISCOVERY",
            DiscoveryKind::IntentDrift => "INTENT_DRIFT",
            DiscoveryKind::SpecDispute => "SPEC_DISPUTE",
            DiscoveryKind::Clarification => "CLARIFICATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscoveryStatus {
    Open,
    Addressed,
    Deferred,
}

impl DiscoveryStatus {
    fn parse(value: &str) -> DiscoveryStatus {
        let word = value
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|w| !w.is_empty())
            .unwrap_or("")
            .to_ascii_uppercase();
        match word.as_str() {
            "ADDRESSED" | "RESOLVED" | "SPEC_UPDATED" => DiscoveryStatus::Addressed,
            "DEFERRED" => DiscoveryStatus::Deferred,
            _ => DiscoveryStatus::Open,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryStatus::Open => "OPEN",
            DiscoveryStatus::Addressed => "ADDRESSED",
            DiscoveryStatus::Deferred => "DEFERRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub kind: DiscoveryKind,
    pub title: String,
    pub status: DiscoveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub line: usize,
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Color,
    FontFamily,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub value: String,
    pub usage: String,
    pub kind: TokenKind,
}

fn classify_token(name: &str, value: &str) -> TokenKind {
    let v = value.trim().to_ascii_lowercase();
    if v.starts_with('#') || v.starts_with("rgb") || v.starts_with("hsl") || name.contains("color")
    {
        TokenKind::Color
    } else if name.contains("font") {
        TokenKind::FontFamily
    } else {
        TokenKind::Other
    }
}

// ---------------------------------------------------------------------------
// ParsedFeature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeature {
    /// Project-relative path, e.g. `features/login.md`.
    pub rel_path: String,
    pub stem: String,
    /// Section bodies keyed by lowercased section name.
    pub sections: BTreeMap<String, String>,
    pub scenarios: Vec<Scenario>,
    /// Implementation Notes, with companion-file text appended when present.
    pub impl_notes: String,
    pub has_companion: bool,
    pub is_policy: bool,
    pub anchor_kind: AnchorKind,
    pub discoveries: Vec<Discovery>,
    /// Raw `> Prerequisite:` targets in declaration order.
    pub prerequisites: Vec<String>,
    pub tokens: Vec<Token>,
    pub forbidden_patterns: Vec<String>,
    pub errors: Vec<ParseError>,
}

impl ParsedFeature {
    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(&name.to_ascii_lowercase())
    }

    pub fn has_impl_notes(&self) -> bool {
        self.has_section(SECTION_IMPL_NOTES) || self.has_companion
    }

    pub fn automated(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| !s.is_manual)
    }

    pub fn manual_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.is_manual).count()
    }
}

/// Read `path` (and its companion, if any) and parse it.
pub fn load_feature(root: &Path, path: &Path) -> Result<ParsedFeature> {
    let content = std::fs::read_to_string(path)?;
    let rel = paths::rel_display(root, path);
    let mut feature = parse_feature(&rel, &content);

    let companion = paths::companion_path(path);
    if companion != path && companion.is_file() {
        let notes = std::fs::read_to_string(&companion)?;
        if !feature.impl_notes.is_empty() {
            feature.impl_notes.push('\n');
        }
        feature.impl_notes.push_str(&notes);
        feature.has_companion = true;
    }
    Ok(feature)
}

/// Parse feature text. Never fails: structural problems land in `errors`.
pub fn parse_feature(rel_path: &str, content: &str) -> ParsedFeature {
    let stem = paths::feature_stem(Path::new(rel_path));
    let anchor_kind = AnchorKind::from_stem(&stem);

    let mut section_lines: BTreeMap<String, Vec<(usize, &str)>> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut in_fence = false;
    let mut prerequisites: Vec<String> = Vec::new();
    let mut tokens = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let ln = idx + 1;
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(caps) = section_re().captures(line) {
                let name = caps[1].to_ascii_lowercase();
                section_lines.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            if let Some(caps) = prereq_re().captures(line) {
                for target in caps[1].split(',') {
                    let target = target.trim().trim_matches('`').trim();
                    if !target.is_empty() && !prerequisites.iter().any(|p| p == target) {
                        prerequisites.push(target.to_string());
                    }
                }
            }
            if let Some(caps) = token_re().captures(line) {
                tokens.push(Token {
                    name: caps[1].to_string(),
                    value: caps[2].to_string(),
                    usage: caps[3].to_string(),
                    kind: classify_token(&caps[1], &caps[2]),
                });
            }
        }
        if let Some(name) = &current {
            section_lines.entry(name.clone()).or_default().push((ln, line));
        }
    }

    let sections: BTreeMap<String, String> = section_lines
        .iter()
        .map(|(name, lines)| {
            let text: Vec<&str> = lines.iter().map(|(_, l)| *l).collect();
            (name.clone(), trim_blank_lines(&text))
        })
        .collect();

    let mut errors = Vec::new();
    let scenarios = match section_lines.get(&SECTION_SCENARIOS.to_ascii_lowercase()) {
        Some(lines) => {
            let (scenarios, errs) = parse_scenarios(lines);
            errors.extend(errs);
            scenarios
        }
        None => {
            errors.push(ParseError::MissingScenariosSection);
            Vec::new()
        }
    };

    let discoveries = section_lines
        .get(&SECTION_DISCOVERIES.to_ascii_lowercase())
        .map(|lines| parse_discoveries(lines))
        .unwrap_or_default();

    let impl_notes = sections
        .get(&SECTION_IMPL_NOTES.to_ascii_lowercase())
        .cloned()
        .unwrap_or_default();

    ParsedFeature {
        rel_path: rel_path.to_string(),
        is_policy: anchor_kind == AnchorKind::Policy,
        anchor_kind,
        stem,
        sections,
        scenarios,
        impl_notes,
        has_companion: false,
        discoveries,
        prerequisites,
        tokens,
        forbidden_patterns: parse_forbidden_patterns(content),
        errors,
    }
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

struct OpenScenario<'a> {
    title: String,
    line: usize,
    body: Vec<&'a str>,
}

fn close_scenario(
    open: Option<OpenScenario<'_>>,
    seen: &mut HashSet<String>,
    scenarios: &mut Vec<Scenario>,
    errors: &mut Vec<ParseError>,
) {
    let Some(open) = open else { return };
    if !seen.insert(open.title.clone()) {
        errors.push(ParseError::DuplicateScenarioTitle(open.title));
        return;
    }
    let body = trim_blank_lines(&open.body);
    scenarios.push(Scenario {
        is_manual: manual_re().is_match(&body),
        title: open.title,
        body,
        line: open.line,
    });
}

fn parse_scenarios(lines: &[(usize, &str)]) -> (Vec<Scenario>, Vec<ParseError>) {
    let mut scenarios: Vec<Scenario> = Vec::new();
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current: Option<OpenScenario> = None;
    let mut in_fence = false;

    for &(ln, line) in lines {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if let Some(caps) = scenario_re().captures(line) {
            close_scenario(current.take(), &mut seen, &mut scenarios, &mut errors);
            let title = caps[1].trim().to_string();
            if title.is_empty() {
                errors.push(ParseError::UnparseableScenarioHeader { line: ln });
            } else {
                current = Some(OpenScenario {
                    title,
                    line: ln,
                    body: Vec::new(),
                });
            }
            continue;
        }
        if !in_fence && section_re().is_match(line) {
            close_scenario(current.take(), &mut seen, &mut scenarios, &mut errors);
            continue;
        }
        if let Some(open) = current.as_mut() {
            open.body.push(line);
        }
    }
    close_scenario(current.take(), &mut seen, &mut scenarios, &mut errors);

    (scenarios, errors)
}

// ---------------------------------------------------------------------------
// Discoveries
// ---------------------------------------------------------------------------

/// `- **Status:** OPEN` → `("status", "OPEN")`.
fn labeled(line: &str) -> Option<(String, String)> {
    let t = line.trim().trim_start_matches(['-', '*']).trim().replace("**", "");
    let (label, value) = t.split_once(':')?;
    let label = label.trim().to_ascii_lowercase();
    if label.is_empty() || label.len() > 32 {
        return None;
    }
    Some((label, value.trim().to_string()))
}

fn parse_discoveries(lines: &[(usize, &str)]) -> Vec<Discovery> {
    let mut out: Vec<Discovery> = Vec::new();
    for &(ln, line) in lines {
        if let Some(caps) = discovery_re().captures(line) {
            if let Some(kind) = DiscoveryKind::parse(&caps[1]) {
                out.push(Discovery {
                    kind,
                    title: caps[2].to_string(),
                    status: DiscoveryStatus::Open,
                    resolution: None,
                    line: ln,
                });
            }
            continue;
        }
        let Some(entry) = out.last_mut() else {
            continue;
        };
        if let Some((label, value)) = labeled(line) {
            match label.as_str() {
                "status" => entry.status = DiscoveryStatus::parse(&value),
                "resolution" | "rationale" | "resolution note" if !value.is_empty() => {
                    entry.resolution = Some(value)
                }
                _ => {}
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Forbidden patterns
// ---------------------------------------------------------------------------

fn parse_forbidden_patterns(content: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        if forbidden_re().is_match(line) {
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if heading_re().is_match(line) {
            in_block = false;
            continue;
        }
        if is_fence(line) {
            continue;
        }
        let Some(rest) = line.trim_start().strip_prefix("- ") else {
            continue;
        };
        let rest = rest.trim();
        if rest.is_empty() || rest.starts_with('#') || rest.starts_with("<!--") {
            continue;
        }
        let pattern = match rest.strip_prefix('`') {
            Some(inner) => match inner.find('`') {
                Some(end) => &inner[..end],
                None => rest,
            },
            None => rest,
        };
        if !pattern.is_empty() {
            patterns.push(pattern.to_string());
        }
    }
    patterns
}

// ---------------------------------------------------------------------------
// Discoveries stripping
// ---------------------------------------------------------------------------

/// Everything above the `User Testing Discoveries` heading, trailing
/// whitespace trimmed. Two versions of a feature that differ only in
/// discoveries strip to the same text.
pub fn strip_discoveries(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in content.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(caps) = section_re().captures(line) {
                if caps[1].eq_ignore_ascii_case(SECTION_DISCOVERIES) {
                    break;
                }
            }
        }
        kept.push(line);
    }
    kept.join("\n").trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
