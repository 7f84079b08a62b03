use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for every external call (git, LLM).
pub const MAX_EXTERNAL_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// CriticConfig
// ---------------------------------------------------------------------------

/// Critic settings read from `.purlin/config.json`.
///
/// The file is shared with other Purlin tools, so unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticConfig {
    #[serde(default = "default_features_dir")]
    pub features_dir: String,
    #[serde(default = "default_tools_root")]
    pub tools_root: String,
    #[serde(default)]
    pub critic_llm_enabled: bool,
    #[serde(default = "default_llm_model")]
    pub critic_llm_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_parallelism")]
    pub critic_llm_parallelism: usize,
    #[serde(default = "default_timeout")]
    pub critic_llm_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub vcs_timeout_secs: u64,
}

fn default_features_dir() -> String {
    "features".to_string()
}

fn default_tools_root() -> String {
    "tools".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_parallelism() -> usize {
    4
}

fn default_timeout() -> u64 {
    MAX_EXTERNAL_TIMEOUT_SECS
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            features_dir: default_features_dir(),
            tools_root: default_tools_root(),
            critic_llm_enabled: false,
            critic_llm_model: default_llm_model(),
            cache_dir: None,
            critic_llm_parallelism: default_parallelism(),
            critic_llm_timeout_secs: default_timeout(),
            vcs_timeout_secs: default_timeout(),
        }
    }
}

impl CriticConfig {
    /// Load from `<root>/.purlin/config.json`; a missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let config: CriticConfig = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn features_path(&self, root: &Path) -> PathBuf {
        root.join(&self.features_dir)
    }

    pub fn tools_path(&self, root: &Path) -> PathBuf {
        root.join(&self.tools_root)
    }

    /// Cache directory: explicit override (relative paths resolve against
    /// `root`), else the project's runtime-private cache.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        match &self.cache_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => paths::drift_cache_dir(root),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(
            self.critic_llm_timeout_secs
                .clamp(1, MAX_EXTERNAL_TIMEOUT_SECS),
        )
    }

    pub fn vcs_timeout(&self) -> Duration {
        Duration::from_secs(self.vcs_timeout_secs.clamp(1, MAX_EXTERNAL_TIMEOUT_SECS))
    }

    pub fn parallelism(&self) -> usize {
        self.critic_llm_parallelism.max(1)
    }

    /// Return warnings for common mistakes.
    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.critic_llm_parallelism == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "critic_llm_parallelism must be at least 1".to_string(),
            });
        }

        for (key, value) in [
            ("critic_llm_timeout_secs", self.critic_llm_timeout_secs),
            ("vcs_timeout_secs", self.vcs_timeout_secs),
        ] {
            if value > MAX_EXTERNAL_TIMEOUT_SECS {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "{key} = {value} exceeds {MAX_EXTERNAL_TIMEOUT_SECS}s and will be clamped"
                    ),
                });
            }
        }

        if !self.features_path(root).is_dir() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("features_dir '{}' does not exist", self.features_dir),
            });
        }

        if !self.tools_path(root).is_dir() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("tools_root '{}' does not exist", self.tools_root),
            });
        }

        if self.critic_llm_enabled && self.critic_llm_model.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "critic_llm_enabled is true but critic_llm_model is empty".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CriticConfig::load(dir.path()).unwrap();
        assert_eq!(config, CriticConfig::default());
        assert!(!config.critic_llm_enabled);
        assert_eq!(config.parallelism(), 4);
        assert_eq!(config.tools_root, "tools");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".purlin")).unwrap();
        std::fs::write(
            dir.path().join(".purlin/config.json"),
            r#"{"agents": {"builder": {"model": "x"}}, "tools_root": "scripts", "critic_llm_enabled": true}"#,
        )
        .unwrap();
        let config = CriticConfig::load(dir.path()).unwrap();
        assert_eq!(config.tools_root, "scripts");
        assert!(config.critic_llm_enabled);
        assert_eq!(config.features_dir, "features");
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".purlin")).unwrap();
        std::fs::write(dir.path().join(".purlin/config.json"), "{not json").unwrap();
        assert!(CriticConfig::load(dir.path()).is_err());
    }

    #[test]
    fn cache_path_resolution() {
        let root = Path::new("/proj");
        let mut config = CriticConfig::default();
        assert_eq!(
            config.cache_path(root),
            PathBuf::from("/proj/.purlin/cache/logic_drift_cache")
        );
        config.cache_dir = Some(PathBuf::from("var/cache"));
        assert_eq!(config.cache_path(root), PathBuf::from("/proj/var/cache"));
        config.cache_dir = Some(PathBuf::from("/abs/cache"));
        assert_eq!(config.cache_path(root), PathBuf::from("/abs/cache"));
    }

    #[test]
    fn timeouts_are_clamped() {
        let config = CriticConfig {
            critic_llm_timeout_secs: 300,
            vcs_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.llm_timeout(), Duration::from_secs(30));
        assert_eq!(config.vcs_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        let config = CriticConfig {
            critic_llm_parallelism: 0,
            critic_llm_timeout_secs: 120,
            ..Default::default()
        };
        let warnings = config.validate(dir.path());
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("parallelism")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("clamped")));
        assert!(warnings.iter().any(|w| w.message.contains("features_dir")));
        assert!(warnings.iter().any(|w| w.message.contains("tools_root")));
    }

    #[test]
    fn validate_clean_project_has_no_warnings() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("features")).unwrap();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        assert!(CriticConfig::default().validate(dir.path()).is_empty());
    }
}
