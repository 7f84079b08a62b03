use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use purlin_core::config::{CriticConfig, WarnLevel};
use purlin_core::paths;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the effective critic configuration (defaults applied)
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    let config = CriticConfig::load(root).context("failed to load config")?;
    match subcmd {
        ConfigSubcommand::Show => show(root, &config, json),
        ConfigSubcommand::Validate => validate(root, &config, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, config: &CriticConfig, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(config);
    }
    let source = paths::config_path(root);
    if source.is_file() {
        println!("Config: {}", source.display());
    } else {
        println!("Config: defaults (no {})", paths::CONFIG_FILE);
    }
    println!();
    let rows = vec![
        row("features_dir", &config.features_dir),
        row("tools_root", &config.tools_root),
        row("critic_llm_enabled", &config.critic_llm_enabled.to_string()),
        row("critic_llm_model", &config.critic_llm_model),
        row("cache_dir", &config.cache_path(root).display().to_string()),
        row("critic_llm_parallelism", &config.critic_llm_parallelism.to_string()),
        row("critic_llm_timeout_secs", &config.critic_llm_timeout_secs.to_string()),
        row("vcs_timeout_secs", &config.vcs_timeout_secs.to_string()),
    ];
    print_table(&["KEY", "VALUE"], &rows);
    Ok(())
}

fn row(key: &str, value: &str) -> Vec<String> {
    vec![key.to_string(), value.to_string()]
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, config: &CriticConfig, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate(root);

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
