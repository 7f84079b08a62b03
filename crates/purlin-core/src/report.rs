//! Aggregate Markdown report. Output bytes depend only on the report value;
//! the single timestamp sits in the header and comes from the caller.

use crate::critic::{CriticReport, FeatureVerdict};
use crate::gate::{Check, CheckItem, GateResult, Priority};
use crate::types::Status;
use std::fmt::Write;

pub fn render(report: &CriticReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Critic Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated: {}", report.generated_at);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Aggregate status: {}** ({})",
        report.status,
        tally(report)
    );
    let _ = writeln!(out);

    render_action_items(&mut out, report);

    let _ = writeln!(out, "## Features");
    let _ = writeln!(out);
    let mut features: Vec<&FeatureVerdict> = report.features.iter().collect();
    features.sort_by(|a, b| b.status.cmp(&a.status).then_with(|| a.feature.cmp(&b.feature)));
    if features.is_empty() {
        let _ = writeln!(out, "_No features found._");
        let _ = writeln!(out);
    }
    for f in features {
        render_feature(&mut out, f);
    }

    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn tally(report: &CriticReport) -> String {
    let count = |s: Status| report.features.iter().filter(|f| f.status == s).count();
    format!(
        "{} feature(s): {} FAIL, {} WARN, {} PASS",
        report.features.len(),
        count(Status::Fail),
        count(Status::Warn),
        count(Status::Pass)
    )
}

fn render_action_items(out: &mut String, report: &CriticReport) {
    let _ = writeln!(out, "## Action Items");
    let _ = writeln!(out);
    let items = report.action_items();
    if items.is_empty() {
        let _ = writeln!(out, "_No action items._");
        let _ = writeln!(out);
        return;
    }
    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let group: Vec<_> = items.iter().filter(|i| i.priority == priority).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {}", priority.as_str());
        let _ = writeln!(out);
        for item in group {
            let _ = writeln!(
                out,
                "- [{}] {} `{}`: {}",
                item.role.as_str(),
                item.feature,
                item.check,
                item.message
            );
        }
        let _ = writeln!(out);
    }
}

fn render_feature(out: &mut String, f: &FeatureVerdict) {
    let _ = writeln!(out, "### {} {}", f.status, f.feature);
    let _ = writeln!(out);
    let _ = writeln!(out, "Lifecycle: {}", f.lifecycle);
    if let Some(trace) = &f.traceability {
        let _ = writeln!(
            out,
            "Traceability: {:.2} ({}/{} automated, {} manual)",
            trace.coverage,
            trace.matches.len(),
            trace.automated,
            trace.manual
        );
    }
    let _ = writeln!(out);
    render_gate(out, "Spec Gate", &f.spec_gate);
    render_gate(out, "Implementation Gate", &f.impl_gate);
}

fn render_gate(out: &mut String, title: &str, gate: &GateResult) {
    let _ = writeln!(out, "#### {title}: {}", gate.status);
    let _ = writeln!(out);
    for check in &gate.checks {
        render_check(out, check);
    }
    let _ = writeln!(out);
}

fn render_check(out: &mut String, check: &Check) {
    let suffix = if check.gating { "" } else { " (non-gating)" };
    let _ = writeln!(
        out,
        "- **{}** `{}`: {}{suffix}",
        check.status, check.name, check.detail
    );
    for item in &check.items {
        let _ = writeln!(out, "  - {}", item_line(item));
    }
}

fn code(text: &str) -> String {
    if text.contains('`') {
        format!("`` {text} ``")
    } else {
        format!("`{text}`")
    }
}

fn item_line(item: &CheckItem) -> String {
    match item {
        CheckItem::Violation(v) => format!(
            "{}:{} matches {} (forbidden by {})",
            v.file,
            v.line,
            code(&v.pattern),
            v.forbidden_by
        ),
        CheckItem::Pattern(p) => format!(
            "invalid pattern {} in {}: {}",
            code(&p.pattern),
            p.forbidden_by,
            p.error.lines().last().unwrap_or_default().trim()
        ),
        CheckItem::Trace(m) => format!(
            "{} -> {} ({})",
            m.scenario_title,
            m.test_entry_names.join(", "),
            m.via.as_str()
        ),
        CheckItem::Drift(d) => {
            if d.reasoning.is_empty() {
                format!("{} {}", d.verdict.as_str(), d.scenario_title)
            } else {
                format!("{} {}: {}", d.verdict.as_str(), d.scenario_title, d.reasoning)
            }
        }
        CheckItem::Note(text) => text.clone(),
    }
}
