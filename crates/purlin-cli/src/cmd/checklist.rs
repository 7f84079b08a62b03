use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use purlin_core::checklist::{self, ResolvedStep};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ChecklistSubcommand {
    /// Merge global and local steps into one ordered checklist
    Resolve {
        /// Framework step definitions (global_steps.json)
        #[arg(long)]
        global: PathBuf,
        /// Project step definitions (local_steps.json)
        #[arg(long)]
        local: Option<PathBuf>,
        /// Ordering and enablement (config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Keep only steps visible to this role (e.g. builder, qa)
        #[arg(long)]
        role: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Exit code is 1 when any local step was rejected, else 0.
pub fn run(root: &Path, subcmd: ChecklistSubcommand, json: bool) -> anyhow::Result<i32> {
    match subcmd {
        ChecklistSubcommand::Resolve {
            global,
            local,
            config,
            role,
        } => resolve(
            root,
            &global,
            local.as_deref(),
            config.as_deref(),
            role.as_deref(),
            json,
        ),
    }
}

fn resolve(
    root: &Path,
    global: &Path,
    local: Option<&Path>,
    config: Option<&Path>,
    role: Option<&str>,
    json: bool,
) -> anyhow::Result<i32> {
    let global = root.join(global);
    let local = local.map(|p| root.join(p));
    let config = config.map(|p| root.join(p));

    let resolution = checklist::resolve_files(&global, local.as_deref(), config.as_deref())
        .with_context(|| format!("failed to resolve checklist from {}", global.display()))?;
    let steps = match role {
        Some(role) => resolution.resolve_for_role(role),
        None => resolution.steps.clone(),
    };

    for e in &resolution.errors {
        eprintln!("error: {e}");
    }
    for w in &resolution.warnings {
        eprintln!("warning: {w}");
    }

    if json {
        print_json(&serde_json::json!({
            "steps": steps,
            "errors": resolution.errors,
            "warnings": resolution.warnings,
        }))?;
    } else {
        print_steps(&steps);
    }

    Ok(if resolution.errors.is_empty() { 0 } else { 1 })
}

fn print_steps(steps: &[ResolvedStep]) {
    if steps.is_empty() {
        println!("No checklist steps.");
        return;
    }
    let rows: Vec<Vec<String>> = steps
        .iter()
        .map(|s| {
            vec![
                s.order.to_string(),
                s.step.id.clone(),
                s.step.friendly_name.clone(),
                s.source.as_str().to_string(),
                if s.enabled { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(&["#", "ID", "NAME", "SOURCE", "ENABLED"], &rows);
}
