//! Checklist resolution for the handoff and release runners.
//!
//! Global steps ship with the framework; a project may add local steps and
//! an ordering config. Local steps may not claim the framework's reserved
//! `purlin.` id prefix.

use crate::error::{PurlinError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const RESERVED_PREFIX: &str = "purlin.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub id: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepSource {
    Global,
    Local,
}

impl StepSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StepSource::Global => "global",
            StepSource::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    #[serde(flatten)]
    pub step: StepDef,
    pub source: StepSource,
    pub enabled: bool,
    /// 1-based position in the resolved list.
    pub order: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    pub steps: Vec<ResolvedStep>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Steps visible to `role`: those without a role restriction or listing
    /// the role. `order` is renumbered.
    pub fn resolve_for_role(&self, role: &str) -> Vec<ResolvedStep> {
        self.steps
            .iter()
            .filter(|s| match &s.step.roles {
                Some(roles) if !roles.is_empty() => roles.iter().any(|r| r == role),
                _ => true,
            })
            .cloned()
            .enumerate()
            .map(|(i, mut s)| {
                s.order = i + 1;
                s
            })
            .collect()
    }
}

/// Merge global and local steps and order them.
pub fn resolve(global: &[StepDef], local: &[StepDef], config: Option<&[ConfigEntry]>) -> Resolution {
    let mut resolution = Resolution::default();

    let mut registry: BTreeMap<&str, (&StepDef, StepSource)> = BTreeMap::new();
    for step in global {
        registry.insert(step.id.as_str(), (step, StepSource::Global));
    }
    let mut accepted_local: Vec<&StepDef> = Vec::new();
    for step in local {
        if step.id.starts_with(RESERVED_PREFIX) {
            tracing::warn!(id = %step.id, "local checklist step uses reserved prefix");
            resolution
                .errors
                .push(PurlinError::ReservedStepId(step.id.clone()).to_string());
            continue;
        }
        registry.insert(step.id.as_str(), (step, StepSource::Local));
        accepted_local.push(step);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<(&StepDef, StepSource, bool)> = Vec::new();

    if let Some(config) = config {
        for entry in config {
            let Some(&(step, source)) = registry.get(entry.id.as_str()) else {
                tracing::warn!(id = %entry.id, "checklist config names an unknown step");
                resolution
                    .warnings
                    .push(format!("config step '{}' not found in any step list", entry.id));
                continue;
            };
            if seen.insert(step.id.as_str()) {
                ordered.push((step, source, entry.enabled));
            }
        }
    }

    let declared = global
        .iter()
        .map(|s| s.id.as_str())
        .chain(accepted_local.iter().map(|s| s.id.as_str()));
    for id in declared {
        if !seen.insert(id) {
            continue;
        }
        if let Some(&(step, source)) = registry.get(id) {
            ordered.push((step, source, true));
        }
    }

    resolution.steps = ordered
        .into_iter()
        .enumerate()
        .map(|(i, (step, source, enabled))| ResolvedStep {
            step: step.clone(),
            source,
            enabled,
            order: i + 1,
        })
        .collect();
    resolution
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ListFile<T> {
    Bare(Vec<T>),
    Wrapped { steps: Vec<T> },
}

fn load_list<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let data = std::fs::read_to_string(path)?;
    let parsed: ListFile<T> =
        serde_json::from_str(&data).map_err(|e| PurlinError::InvalidChecklist {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(match parsed {
        ListFile::Bare(v) | ListFile::Wrapped { steps: v } => v,
    })
}

/// Step definitions: a bare array or `{"steps": [...]}`.
pub fn load_steps(path: &Path) -> Result<Vec<StepDef>> {
    load_list(path)
}

pub fn load_config(path: &Path) -> Result<Vec<ConfigEntry>> {
    load_list(path)
}

/// Resolve from files. Missing optional files are treated as absent.
pub fn resolve_files(global: &Path, local: Option<&Path>, config: Option<&Path>) -> Result<Resolution> {
    let global = load_steps(global)?;
    let local = match local {
        Some(p) if p.exists() => load_steps(p)?,
        _ => Vec::new(),
    };
    let config = match config {
        Some(p) if p.exists() => Some(load_config(p)?),
        _ => None,
    };
    Ok(resolve(&global, &local, config.as_deref()))
}
