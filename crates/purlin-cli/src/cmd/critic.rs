use crate::llm::{cancel_on_ctrl_c, ClaudeOracle};
use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use purlin_core::config::{CriticConfig, WarnLevel};
use purlin_core::critic::{write_outputs, Critic, CriticReport, OutputPaths};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct CriticArgs {
    /// Evaluate a single feature (stem or file name)
    #[arg(long)]
    feature: Option<String>,

    /// Timestamp stamped into reports, RFC 3339 (default: now)
    #[arg(long, value_parser = parse_timestamp)]
    generated_at: Option<DateTime<Utc>>,

    /// Aggregate Markdown report path (default: CRITIC_REPORT.md)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory for per-feature JSON as <stem>.json (default: tests/<stem>/critic.json)
    #[arg(long)]
    feature_report_dir: Option<PathBuf>,

    /// Evaluate and print without writing any report files
    #[arg(long)]
    no_write: bool,
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the critic and return the process exit code for its aggregate status.
pub fn run(root: &Path, args: CriticArgs, json: bool) -> anyhow::Result<i32> {
    let config = CriticConfig::load(root).context("failed to load .purlin/config.json")?;
    for w in config.validate(root) {
        if w.level == WarnLevel::Error {
            anyhow::bail!("invalid config: {}", w.message);
        }
        tracing::warn!("config: {}", w.message);
    }

    let cancel = CancellationToken::new();
    let oracle = if config.critic_llm_enabled {
        ClaudeOracle::detect(root, &config)
    } else {
        None
    };

    let mut critic = Critic::new(root, config).with_cancel(cancel.clone());
    // Kept alive until the run returns; dropping it ends the Ctrl-C watcher.
    let _runtime = match oracle {
        Some(oracle) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.spawn(cancel_on_ctrl_c(cancel.clone()));
            critic = critic
                .with_oracle(Arc::new(oracle))
                .with_runtime(runtime.handle().clone());
            Some(runtime)
        }
        None => None,
    };

    let generated_at = args.generated_at.unwrap_or_else(Utc::now);
    let report = critic
        .run(args.feature.as_deref(), generated_at)
        .context("critic run failed")?;

    if !args.no_write {
        let out = output_paths(root, args.report, args.feature_report_dir);
        let written = write_outputs(&report, root, &out)
            .with_context(|| format!("failed to write reports under {}", root.display()))?;
        tracing::debug!(files = written.len(), "critic reports written");
    }

    if json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }

    Ok(report.status.exit_code())
}

/// Relative paths are taken from the project root.
fn output_paths(root: &Path, report: Option<PathBuf>, feature_dir: Option<PathBuf>) -> OutputPaths {
    let defaults = OutputPaths::defaults(root);
    OutputPaths {
        report: report.map(|p| root.join(p)).unwrap_or(defaults.report),
        feature_dir: feature_dir.map(|p| root.join(p)).or(defaults.feature_dir),
    }
}

fn print_summary(report: &CriticReport) {
    let rows: Vec<Vec<String>> = report
        .features
        .iter()
        .map(|f| {
            vec![
                f.feature.clone(),
                f.status.to_string(),
                f.spec_gate.status.to_string(),
                f.impl_gate.status.to_string(),
                f.lifecycle.to_string(),
                f.traceability
                    .as_ref()
                    .map(|t| format!("{:.2}", t.coverage))
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["FEATURE", "STATUS", "SPEC", "IMPL", "LIFECYCLE", "COVERAGE"], &rows);

    let items = report.action_items();
    if !items.is_empty() {
        println!();
        println!("Action items:");
        for item in items {
            println!(
                "  {} [{}] {} {}: {}",
                item.priority.as_str(),
                item.role.as_str(),
                item.feature,
                item.check,
                item.message
            );
        }
    }
    println!();
    println!("Aggregate status: {}", report.status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_normalize_to_utc() {
        let t = parse_timestamp("2026-01-02T05:04:05+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn output_paths_resolve_against_root() {
        let root = Path::new("/proj");
        let out = output_paths(root, Some("out/r.md".into()), None);
        assert_eq!(out.report, Path::new("/proj/out/r.md"));
        assert!(out.feature_dir.is_none());

        let out = output_paths(root, None, Some("/abs/features".into()));
        assert_eq!(out.report, Path::new("/proj/CRITIC_REPORT.md"));
        assert_eq!(out.feature_dir.as_deref(), Some(Path::new("/abs/features")));
    }
}
