//! Spec Gate and Implementation Gate.
//!
//! Each gate is a fixed, ordered list of checks. A gate's status is the worst
//! status among its gating checks; a feature's status is the worse of its two
//! gates.

use crate::drift::{DriftOutcome, DriftResult, DriftVerdict};
use crate::error::ParseError;
use crate::feature::{
    DiscoveryKind, DiscoveryStatus, ParsedFeature, SECTION_OVERVIEW, SECTION_SCENARIOS,
};
use crate::graph::FeatureSet;
use crate::policy::{PatternIssue, PolicyResult, Violation};
use crate::traceability::{TraceMatch, TraceabilityResult};
use crate::types::{Lifecycle, Status};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub const CHECK_SECTIONS: &str = "section_completeness";
pub const CHECK_CLASSIFICATION: &str = "scenario_classification";
pub const CHECK_ANCHORING: &str = "policy_anchoring";
pub const CHECK_PREREQUISITES: &str = "prerequisite_integrity";
pub const CHECK_GHERKIN: &str = "gherkin_quality";

pub const CHECK_STRUCTURE: &str = "structural_completeness";
pub const CHECK_TRACEABILITY: &str = "traceability";
pub const CHECK_POLICY: &str = "policy";
pub const CHECK_DRIFT: &str = "logic_drift";
pub const CHECK_AUDIT: &str = "user_testing_audit";

const ANCHOR_NODE: &str = "anchor node";

static CLAUSE_RE: OnceLock<Regex> = OnceLock::new();

fn clause_re() -> &'static Regex {
    CLAUSE_RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:[-*]\s+)?(?:\*\*)?(given|when|then)\b").unwrap()
    })
}

// ---------------------------------------------------------------------------
// Check / GateResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CheckItem {
    Violation(Violation),
    Pattern(PatternIssue),
    Trace(TraceMatch),
    Drift(DriftOutcome),
    Note(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: String,
    pub status: Status,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<CheckItem>,
    /// Non-gating checks are reported but never roll into the gate status.
    pub gating: bool,
}

impl Check {
    fn new(name: &str, status: Status, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
            items: Vec::new(),
            gating: true,
        }
    }

    fn with_items(mut self, items: Vec<CheckItem>) -> Self {
        self.items = items;
        self
    }

    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, Status::Pass, detail)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateResult {
    pub status: Status,
    pub checks: Vec<Check>,
}

impl GateResult {
    pub fn from_checks(checks: Vec<Check>) -> Self {
        let status = Status::worst(checks.iter().filter(|c| c.gating).map(|c| c.status));
        Self { status, checks }
    }

    pub fn check(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.name == name)
    }
}

fn note(text: impl Into<String>) -> CheckItem {
    CheckItem::Note(text.into())
}

// ---------------------------------------------------------------------------
// Spec Gate
// ---------------------------------------------------------------------------

pub fn spec_gate(feature: &ParsedFeature, features: &FeatureSet) -> GateResult {
    GateResult::from_checks(vec![
        section_completeness(feature),
        scenario_classification(feature),
        policy_anchoring(feature, features),
        prerequisite_integrity(feature, features),
        gherkin_quality(feature),
    ])
}

fn section_completeness(feature: &ParsedFeature) -> Check {
    let required: &[&str] = if feature.anchor_kind.is_anchor() {
        &[SECTION_OVERVIEW]
    } else {
        &[SECTION_OVERVIEW, SECTION_SCENARIOS]
    };
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|s| !feature.has_section(s))
        .collect();
    if missing.is_empty() {
        Check::pass(CHECK_SECTIONS, "all required sections present")
    } else {
        Check::new(
            CHECK_SECTIONS,
            Status::Fail,
            format!("missing sections: {}", missing.join(", ")),
        )
        .with_items(missing.iter().map(|s| note(format!("missing section: {s}"))).collect())
    }
}

fn scenario_classification(feature: &ParsedFeature) -> Check {
    if feature.anchor_kind.is_anchor() {
        return Check::pass(CHECK_CLASSIFICATION, ANCHOR_NODE);
    }
    let problems: Vec<CheckItem> = feature
        .errors
        .iter()
        .filter(|e| {
            matches!(
                e,
                ParseError::DuplicateScenarioTitle(_) | ParseError::UnparseableScenarioHeader { .. }
            )
        })
        .map(|e| note(e.to_string()))
        .collect();

    if feature.errors.contains(&ParseError::MissingScenariosSection) {
        return Check::new(CHECK_CLASSIFICATION, Status::Fail, "missing Scenarios section");
    }
    if !problems.is_empty() {
        return Check::new(
            CHECK_CLASSIFICATION,
            Status::Fail,
            format!("{} malformed scenario(s)", problems.len()),
        )
        .with_items(problems);
    }
    if feature.scenarios.is_empty() {
        return Check::new(CHECK_CLASSIFICATION, Status::Warn, "no scenarios defined");
    }
    Check::pass(
        CHECK_CLASSIFICATION,
        format!(
            "{} automated, {} manual",
            feature.automated().count(),
            feature.manual_count()
        ),
    )
}

fn policy_anchoring(feature: &ParsedFeature, features: &FeatureSet) -> Check {
    if feature.anchor_kind.is_anchor() {
        return Check::pass(CHECK_ANCHORING, ANCHOR_NODE);
    }
    let anchors: Vec<String> = features
        .anchors_for(feature)
        .iter()
        .map(|a| a.rel_path.clone())
        .collect();
    if anchors.is_empty() {
        Check::new(
            CHECK_ANCHORING,
            Status::Warn,
            "no prerequisite chain reaches an anchor node",
        )
    } else {
        Check::pass(CHECK_ANCHORING, format!("anchored by {}", anchors.join(", ")))
    }
}

fn prerequisite_integrity(feature: &ParsedFeature, features: &FeatureSet) -> Check {
    let unresolved = features.unresolved(feature);
    if !unresolved.is_empty() {
        return Check::new(
            CHECK_PREREQUISITES,
            Status::Fail,
            format!("{} unresolved prerequisite(s)", unresolved.len()),
        )
        .with_items(
            unresolved
                .iter()
                .map(|t| note(format!("unresolved prerequisite: {t}")))
                .collect(),
        );
    }
    match feature.prerequisites.len() {
        0 => Check::pass(CHECK_PREREQUISITES, "no prerequisites"),
        n => Check::pass(CHECK_PREREQUISITES, format!("{n} prerequisite(s) resolved")),
    }
}

fn gherkin_quality(feature: &ParsedFeature) -> Check {
    if feature.anchor_kind.is_anchor() {
        return Check::pass(CHECK_GHERKIN, ANCHOR_NODE);
    }
    let mut items = Vec::new();
    for scenario in &feature.scenarios {
        let present: Vec<String> = clause_re()
            .captures_iter(&scenario.body)
            .map(|c| c[1].to_ascii_lowercase())
            .collect();
        let missing: Vec<&str> = ["Given", "When", "Then"]
            .into_iter()
            .filter(|k| !present.iter().any(|p| p.eq_ignore_ascii_case(k)))
            .collect();
        if !missing.is_empty() {
            items.push(note(format!(
                "{}: missing {}",
                scenario.title,
                missing.join("/")
            )));
        }
    }
    if items.is_empty() {
        Check::pass(CHECK_GHERKIN, "every scenario has Given/When/Then")
    } else {
        Check::new(
            CHECK_GHERKIN,
            Status::Warn,
            format!("{} scenario(s) lack Given/When/Then clauses", items.len()),
        )
        .with_items(items)
    }
}

// ---------------------------------------------------------------------------
// Implementation Gate
// ---------------------------------------------------------------------------

/// Outcome of the optional logic-drift stage.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftState {
    /// Turned off in configuration.
    Disabled,
    /// Enabled, but no LLM client could be acquired.
    Unavailable(String),
    Ran(DriftResult),
}

pub struct ImplInputs<'a> {
    pub feature: &'a ParsedFeature,
    pub lifecycle: Lifecycle,
    pub traceability: &'a TraceabilityResult,
    pub policy: &'a PolicyResult,
    pub drift: &'a DriftState,
}

pub fn impl_gate(inputs: &ImplInputs<'_>) -> GateResult {
    GateResult::from_checks(vec![
        structural_completeness(inputs.feature, inputs.lifecycle),
        traceability_check(inputs.traceability),
        policy_check(inputs.policy),
        drift_check(inputs.drift),
        user_testing_audit(inputs.feature),
    ])
}

fn structural_completeness(feature: &ParsedFeature, lifecycle: Lifecycle) -> Check {
    if feature.has_impl_notes() {
        return Check::pass(CHECK_STRUCTURE, "Implementation Notes present");
    }
    if lifecycle >= Lifecycle::Testing {
        Check::new(
            CHECK_STRUCTURE,
            Status::Warn,
            format!("Implementation Notes missing for a {lifecycle} feature"),
        )
    } else {
        Check::pass(CHECK_STRUCTURE, "Implementation Notes not yet required")
    }
}

fn traceability_check(trace: &TraceabilityResult) -> Check {
    let matched = trace.matches.len();
    let detail = format!(
        "coverage {:.2} ({matched}/{} automated, {} manual)",
        trace.coverage, trace.automated, trace.manual
    );
    let mut items: Vec<CheckItem> = trace.matches.iter().cloned().map(CheckItem::Trace).collect();
    items.extend(trace.unmatched.iter().map(|t| note(format!("unmatched: {t}"))));
    items.extend(trace.dangling_overrides.iter().map(|o| {
        note(format!(
            "ignored override: \"{}\" -> {}",
            o.title, o.entry
        ))
    }));
    Check::new(CHECK_TRACEABILITY, trace.status(), detail).with_items(items)
}

fn policy_check(policy: &PolicyResult) -> Check {
    let detail = if !policy.violations.is_empty() {
        format!("{} forbidden pattern violation(s)", policy.violations.len())
    } else if policy.anchors.is_empty() {
        "no anchor nodes in prerequisite closure".to_string()
    } else {
        format!("no violations in {} file(s)", policy.scanned.len())
    };
    let mut items: Vec<CheckItem> = policy
        .violations
        .iter()
        .cloned()
        .map(CheckItem::Violation)
        .collect();
    items.extend(policy.invalid_patterns.iter().cloned().map(CheckItem::Pattern));
    items.extend(policy.invalid_globs.iter().map(|g| {
        note(format!(
            "invalid allow_pattern scope `{}` for \"{}\": {}",
            g.glob, g.allow_pattern, g.error
        ))
    }));
    items.extend(
        policy
            .missing_files
            .iter()
            .map(|f| note(format!("impl_file not found: {f}"))),
    );
    Check::new(CHECK_POLICY, policy.status(), detail).with_items(items)
}

fn drift_check(drift: &DriftState) -> Check {
    match drift {
        DriftState::Disabled => Check {
            gating: false,
            ..Check::new(CHECK_DRIFT, Status::Warn, "skipped: disabled")
        },
        DriftState::Unavailable(reason) => {
            Check::new(CHECK_DRIFT, Status::Warn, "skipped: disabled")
                .with_items(vec![note(reason.clone())])
        }
        DriftState::Ran(result) if result.outcomes.is_empty() => {
            Check::pass(CHECK_DRIFT, "no traced scenarios to compare")
        }
        DriftState::Ran(result) => {
            let detail = format!(
                "{} aligned, {} partial, {} divergent, {} skipped",
                result.count(DriftVerdict::Aligned),
                result.count(DriftVerdict::Partial),
                result.count(DriftVerdict::Divergent),
                result.count(DriftVerdict::Skipped),
            );
            Check::new(CHECK_DRIFT, result.status(), detail)
                .with_items(result.outcomes.iter().cloned().map(CheckItem::Drift).collect())
        }
    }
}

fn user_testing_audit(feature: &ParsedFeature) -> Check {
    let mut items = Vec::new();
    for d in &feature.discoveries {
        let label = format!("[{}] {}", d.kind.as_str(), d.title);
        let has_note = d.resolution.as_deref().map(|r| !r.trim().is_empty()).unwrap_or(false);
        match d.status {
            DiscoveryStatus::Open if d.kind == DiscoveryKind::Bug => {
                items.push(note(format!("{label}: BUG is still OPEN")));
            }
            DiscoveryStatus::Open => {}
            DiscoveryStatus::Deferred if !has_note => {
                items.push(note(format!("{label}: DEFERRED without a rationale")));
            }
            DiscoveryStatus::Addressed if !has_note => {
                items.push(note(format!("{label}: ADDRESSED without a resolution note")));
            }
            _ => {}
        }
    }
    let total = feature.discoveries.len();
    if items.is_empty() {
        Check::pass(CHECK_AUDIT, format!("{total} discovery entries audited"))
    } else {
        Check::new(
            CHECK_AUDIT,
            Status::Warn,
            format!("{} of {total} discovery entries need attention", items.len()),
        )
        .with_items(items)
    }
}

// ---------------------------------------------------------------------------
// Action items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Architect,
    Builder,
    Qa,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Builder => "builder",
            Role::Qa => "qa",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionItem {
    pub priority: Priority,
    pub role: Role,
    pub feature: String,
    pub check: String,
    pub message: String,
}

/// One action item per non-PASS gating check, in gate order.
pub fn action_items(feature: &str, spec: &GateResult, implementation: &GateResult) -> Vec<ActionItem> {
    let spec_items = spec.checks.iter().map(|c| (c, Role::Architect));
    let impl_items = implementation.checks.iter().map(|c| {
        let role = if c.name == CHECK_AUDIT {
            Role::Qa
        } else {
            Role::Builder
        };
        (c, role)
    });
    spec_items
        .chain(impl_items)
        .filter(|(c, _)| c.gating && c.status != Status::Pass)
        .map(|(c, role)| ActionItem {
            priority: match c.status {
                Status::Fail => Priority::High,
                _ if c.name == CHECK_TRACEABILITY || c.name == CHECK_POLICY => Priority::Medium,
                _ => Priority::Low,
            },
            role,
            feature: feature.to_string(),
            check: c.name.clone(),
            message: c.detail.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
