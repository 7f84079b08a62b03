//! Critic orchestration: evaluate every feature once, then write the
//! per-feature JSON reports and the aggregate Markdown report.

use crate::config::CriticConfig;
use crate::drift::{self, DriftCache, DriftEngine, DriftOracle};
use crate::error::{PurlinError, Result};
use crate::feature::{ParsedFeature, Token};
use crate::gate::{self, ActionItem, Check, DriftState, GateResult, ImplInputs};
use crate::graph::FeatureSet;
use crate::io;
use crate::lifecycle;
use crate::paths;
use crate::policy;
use crate::report;
use crate::traceability::{self, TraceabilityResult};
use crate::types::{AnchorKind, Lifecycle, Status};
use crate::vcs::Git;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorSummary {
    pub kind: AnchorKind,
    pub tokens: Vec<Token>,
    pub forbidden_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVerdict {
    /// Project-relative feature path.
    pub feature: String,
    pub spec_gate: GateResult,
    pub impl_gate: GateResult,
    pub status: Status,
    pub lifecycle: Lifecycle,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceability: Option<TraceabilityResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorSummary>,
    pub action_items: Vec<ActionItem>,
}

impl FeatureVerdict {
    pub fn stem(&self) -> String {
        paths::feature_stem(Path::new(&self.feature))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticReport {
    pub status: Status,
    pub generated_at: String,
    pub features: Vec<FeatureVerdict>,
}

impl CriticReport {
    pub fn action_items(&self) -> Vec<&ActionItem> {
        let mut items: Vec<&ActionItem> = self.features.iter().flat_map(|f| &f.action_items).collect();
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.feature.cmp(&b.feature)));
        items
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Critic
// ---------------------------------------------------------------------------

pub struct Critic {
    root: PathBuf,
    config: CriticConfig,
    oracle: Option<Arc<dyn DriftOracle>>,
    cancel: CancellationToken,
    runtime: Option<Handle>,
}

impl Critic {
    pub fn new(root: &Path, config: CriticConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            oracle: None,
            cancel: CancellationToken::new(),
            runtime: None,
        }
    }

    /// LLM client for logic drift. Only consulted when
    /// `critic_llm_enabled` is set.
    pub fn with_oracle(mut self, oracle: Arc<dyn DriftOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runtime that drives oracle calls. Without one, a run that needs it
    /// starts a private runtime for its own duration. `run` must not be
    /// called from inside that runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    fn drift_runs(&self) -> bool {
        self.config.critic_llm_enabled && self.oracle.is_some()
    }

    /// Evaluate all features, or only `only` (a stem or file name).
    pub fn run(&self, only: Option<&str>, generated_at: DateTime<Utc>) -> Result<CriticReport> {
        let features_dir = self.config.features_path(&self.root);
        let set = FeatureSet::load(&self.root, &features_dir)?;
        let names = match only {
            Some(wanted) => vec![set
                .find(wanted)
                .ok_or_else(|| PurlinError::FeatureNotFound(wanted.to_string()))?],
            None => set.names(),
        };

        let git = Git::new(&self.root, self.config.vcs_timeout());
        let git = if git.is_repository() {
            Some(git)
        } else {
            tracing::warn!(root = %self.root.display(), "not a git work tree, lifecycle falls back to TODO");
            None
        };
        let owned_runtime = match (&self.runtime, self.drift_runs()) {
            (None, true) => Some(Runtime::new()?),
            _ => None,
        };
        let handle = self
            .runtime
            .clone()
            .or_else(|| owned_runtime.as_ref().map(|rt| rt.handle().clone()));
        let drift = handle.map(|handle| DriftRun {
            handle,
            cache: Arc::new(DriftCache::new(self.config.cache_path(&self.root))),
        });
        let stamp = format_timestamp(generated_at);

        let features: Vec<FeatureVerdict> = names
            .iter()
            .map(|name| match set.get(name) {
                Some(feature) => self.evaluate(feature, &set, git.as_ref(), drift.as_ref(), &stamp),
                None => unreadable(
                    &paths::rel_display(&self.root, &features_dir.join(name)),
                    set.load_error(name).unwrap_or("unreadable"),
                    &stamp,
                ),
            })
            .collect();

        let status = Status::worst(features.iter().map(|f| f.status));
        tracing::debug!(features = features.len(), status = %status, "critic run complete");
        Ok(CriticReport {
            status,
            generated_at: stamp,
            features,
        })
    }

    fn evaluate(
        &self,
        feature: &ParsedFeature,
        set: &FeatureSet,
        git: Option<&Git>,
        drift_run: Option<&DriftRun>,
        stamp: &str,
    ) -> FeatureVerdict {
        let tools_root = self.config.tools_path(&self.root);
        let spec_gate = gate::spec_gate(feature, set);
        let resolution = lifecycle::resolve_lifecycle(git, &self.root, feature);

        let trace = traceability::trace(
            &feature.scenarios,
            &self.root,
            &feature.stem,
            &tools_root,
            &feature.impl_notes,
        );
        let policy = policy::policy(feature, set, &self.root, &tools_root);
        let drift = self.drift_state(feature, &trace, drift_run);

        let impl_gate = gate::impl_gate(&ImplInputs {
            feature,
            lifecycle: resolution.lifecycle,
            traceability: &trace,
            policy: &policy,
            drift: &drift,
        });

        let status = Status::worst([spec_gate.status, impl_gate.status]);
        let mut lifecycle = resolution.lifecycle;
        if lifecycle == Lifecycle::Complete
            && !(spec_gate.status == Status::Pass && impl_gate.status != Status::Fail)
        {
            tracing::debug!(feature = %feature.rel_path, "COMPLETE reported as TESTING: gates not clean");
            lifecycle = Lifecycle::Testing;
        }

        let action_items = gate::action_items(&feature.rel_path, &spec_gate, &impl_gate);
        let anchor = feature.anchor_kind.is_anchor().then(|| AnchorSummary {
            kind: feature.anchor_kind,
            tokens: feature.tokens.clone(),
            forbidden_patterns: feature.forbidden_patterns.clone(),
        });

        FeatureVerdict {
            feature: feature.rel_path.clone(),
            spec_gate,
            impl_gate,
            status,
            lifecycle,
            generated_at: stamp.to_string(),
            traceability: Some(trace),
            anchor,
            action_items,
        }
    }

    fn drift_state(&self, feature: &ParsedFeature, trace: &TraceabilityResult, run: Option<&DriftRun>) -> DriftState {
        if !self.config.critic_llm_enabled {
            return DriftState::Disabled;
        }
        let (Some(oracle), Some(run)) = (&self.oracle, run) else {
            return DriftState::Unavailable("no LLM client available".to_string());
        };
        let pairs = drift::pairs_from(&feature.scenarios, trace);
        let engine = DriftEngine::new(
            oracle.clone(),
            run.cache.clone(),
            self.config.parallelism(),
            self.cancel.clone(),
        );
        DriftState::Ran(run.handle.block_on(engine.analyze(&pairs)))
    }
}

/// What a run needs to judge logic drift.
struct DriftRun {
    handle: Handle,
    cache: Arc<DriftCache>,
}

/// Verdict for a feature file that exists but could not be read.
fn unreadable(rel: &str, error: &str, stamp: &str) -> FeatureVerdict {
    let check = Check {
        name: gate::CHECK_SECTIONS.to_string(),
        status: Status::Fail,
        detail: format!("feature file unreadable: {error}"),
        items: Vec::new(),
        gating: true,
    };
    let spec_gate = GateResult::from_checks(vec![check]);
    let impl_gate = GateResult::from_checks(Vec::new());
    let action_items = gate::action_items(rel, &spec_gate, &impl_gate);
    FeatureVerdict {
        feature: rel.to_string(),
        spec_gate,
        impl_gate,
        status: Status::Fail,
        lifecycle: Lifecycle::Todo,
        generated_at: stamp.to_string(),
        traceability: None,
        anchor: None,
        action_items,
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where reports land. `feature_dir = None` puts each feature's JSON at
/// `tests/<stem>/critic.json`.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub report: PathBuf,
    pub feature_dir: Option<PathBuf>,
}

impl OutputPaths {
    pub fn defaults(root: &Path) -> Self {
        Self {
            report: root.join(paths::CRITIC_REPORT_MD),
            feature_dir: None,
        }
    }

    pub fn feature_report(&self, root: &Path, stem: &str) -> PathBuf {
        match &self.feature_dir {
            Some(dir) => dir.join(format!("{stem}.json")),
            None => paths::feature_report_path(root, stem),
        }
    }
}

pub fn feature_json(verdict: &FeatureVerdict) -> Result<String> {
    let mut out = serde_json::to_string_pretty(verdict)?;
    out.push('\n');
    Ok(out)
}

/// Write every per-feature JSON and the aggregate report atomically.
/// Returns the paths written, aggregate report last.
pub fn write_outputs(report: &CriticReport, root: &Path, out: &OutputPaths) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for verdict in &report.features {
        let path = out.feature_report(root, &verdict.stem());
        io::atomic_write(&path, feature_json(verdict)?.as_bytes())?;
        written.push(path);
    }
    io::atomic_write(&out.report, report::render(report).as_bytes())?;
    written.push(out.report.clone());
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const LOGIN: &str = "\
> Prerequisite: arch_auth.md

## Overview
Users sign in.

## Scenarios

### Scenario: User logs in with valid credentials
Given a registered user
When they submit valid credentials
Then they land on the dashboard
";

    const ARCH: &str = "## Overview\nAuth architecture.\n\n## Forbidden Patterns\n- \\bprint\\s*\\(\n";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    fn project(login: &str, test: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("features")).unwrap();
        std::fs::create_dir_all(root.join("tests/login")).unwrap();
        std::fs::create_dir_all(root.join("tools")).unwrap();
        std::fs::write(root.join("features/login.md"), login).unwrap();
        std::fs::write(root.join("features/arch_auth.md"), ARCH).unwrap();
        std::fs::write(root.join("tests/login/test_login.py"), test).unwrap();
        dir
    }

    fn run(dir: &TempDir) -> CriticReport {
        Critic::new(dir.path(), CriticConfig::default())
            .run(None, at())
            .unwrap()
    }

    fn login(report: &CriticReport) -> &FeatureVerdict {
        report
            .features
            .iter()
            .find(|f| f.feature == "features/login.md")
            .unwrap()
    }

    #[test]
    fn perfect_feature_passes() {
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    assert True\n");
        let report = run(&dir);
        let v = login(&report);
        assert_eq!(v.status, Status::Pass, "{v:#?}");
        assert_eq!(v.lifecycle, Lifecycle::Todo);
        assert_eq!(v.traceability.as_ref().unwrap().coverage, 1.0);
        assert!(v.action_items.is_empty());
        assert_eq!(v.generated_at, "2026-01-02T03:04:05Z");
        assert_eq!(report.status, Status::Pass);
    }

    #[test]
    fn unmatched_scenario_fails_impl_gate() {
        let dir = project(LOGIN, "def test_unrelated():\n    assert True\n");
        let v = login(&run(&dir)).clone();
        assert_eq!(v.spec_gate.status, Status::Pass);
        assert_eq!(v.impl_gate.status, Status::Fail);
        assert_eq!(v.status, Status::Fail);
        assert_eq!(
            v.traceability.unwrap().unmatched,
            vec!["User logs in with valid credentials".to_string()]
        );
    }

    #[test]
    fn anchor_summary_is_attached() {
        let dir = project(LOGIN, "");
        let report = run(&dir);
        let arch = report
            .features
            .iter()
            .find(|f| f.feature == "features/arch_auth.md")
            .unwrap();
        let anchor = arch.anchor.as_ref().unwrap();
        assert_eq!(anchor.kind, AnchorKind::Arch);
        assert_eq!(anchor.forbidden_patterns, vec![r"\bprint\s*\(".to_string()]);
        assert!(login(&report).anchor.is_none());
    }

    #[test]
    fn single_feature_run_and_unknown_feature() {
        let dir = project(LOGIN, "");
        let critic = Critic::new(dir.path(), CriticConfig::default());
        let report = critic.run(Some("login"), at()).unwrap();
        assert_eq!(report.features.len(), 1);
        assert!(matches!(
            critic.run(Some("nope"), at()),
            Err(PurlinError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn outputs_are_deterministic() {
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        let out = OutputPaths::defaults(dir.path());

        let first = run(&dir);
        let paths = write_outputs(&first, dir.path(), &out).unwrap();
        let json1 = std::fs::read(dir.path().join("tests/login/critic.json")).unwrap();
        let md1 = std::fs::read(&out.report).unwrap();

        let second = run(&dir);
        write_outputs(&second, dir.path(), &out).unwrap();
        assert_eq!(std::fs::read(dir.path().join("tests/login/critic.json")).unwrap(), json1);
        assert_eq!(std::fs::read(&out.report).unwrap(), md1);
        assert_eq!(paths.last(), Some(&out.report));
        assert!(paths.contains(&dir.path().join("tests/arch_auth/critic.json")));
    }

    #[test]
    fn feature_report_dir_override() {
        let dir = project(LOGIN, "");
        let out = OutputPaths {
            report: dir.path().join("out/report.md"),
            feature_dir: Some(dir.path().join("out/features")),
        };
        write_outputs(&run(&dir), dir.path(), &out).unwrap();
        assert!(dir.path().join("out/features/login.json").is_file());
        assert!(dir.path().join("out/report.md").is_file());
    }

    struct Failing(AtomicUsize);

    #[async_trait::async_trait]
    impl DriftOracle for Failing {
        async fn judge(&self, _: &str, _: &str) -> std::result::Result<String, LlmError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Failed("boom".into()))
        }
    }

    #[test]
    fn enabled_drift_without_client_warns() {
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        let config = CriticConfig {
            critic_llm_enabled: true,
            ..Default::default()
        };
        let report = Critic::new(dir.path(), config.clone()).run(None, at()).unwrap();
        let v = login(&report);
        assert_eq!(v.impl_gate.status, Status::Warn);
        assert_eq!(v.impl_gate.check(gate::CHECK_DRIFT).unwrap().detail, "skipped: disabled");

        let oracle = Arc::new(Failing(AtomicUsize::new(0)));
        let report = Critic::new(dir.path(), config)
            .with_oracle(oracle.clone())
            .run(None, at())
            .unwrap();
        assert_eq!(oracle.0.load(Ordering::SeqCst), 1);
        let drift = login(&report).impl_gate.check(gate::CHECK_DRIFT).unwrap().clone();
        assert_eq!(drift.status, Status::Warn);
        assert!(drift.detail.contains("1 skipped"));
    }

    #[test]
    fn supplied_runtime_and_cancel_reach_the_drift_engine() {
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        let config = CriticConfig {
            critic_llm_enabled: true,
            ..Default::default()
        };
        let runtime = Runtime::new().unwrap();
        let oracle = Arc::new(Failing(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = Critic::new(dir.path(), config)
            .with_oracle(oracle.clone())
            .with_runtime(runtime.handle().clone())
            .with_cancel(cancel)
            .run(None, at())
            .unwrap();
        assert_eq!(oracle.0.load(Ordering::SeqCst), 0);
        let drift = login(&report).impl_gate.check(gate::CHECK_DRIFT).unwrap().clone();
        assert_eq!(drift.status, Status::Warn);
        assert!(drift.detail.contains("1 skipped"));
    }

    fn commit_complete(dir: &Path, rel: &str) {
        let message = format!("[Complete {rel}] [Scope: full]");
        let steps: [&[&str]; 3] = [&["init", "-q"], &["add", "-A"], &["commit", "-q", "-m", message.as_str()]];
        for args in steps {
            let status = std::process::Command::new("git")
                .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
                .args(["-c", "commit.gpgsign=false"])
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_DATE", "2024-01-01T00:00:00Z")
                .env("GIT_COMMITTER_DATE", "2024-01-01T00:00:00Z")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        }
    }

    #[test]
    fn complete_with_failing_impl_gate_is_reported_as_testing() {
        if which::which("git").is_err() {
            return;
        }
        let dir = project(LOGIN, "def test_unrelated():\n    assert True\n");
        commit_complete(dir.path(), "features/login.md");
        let v = login(&run(&dir)).clone();
        assert_eq!(v.impl_gate.status, Status::Fail);
        assert_eq!(v.lifecycle, Lifecycle::Testing);
    }

    #[test]
    fn complete_with_non_passing_spec_gate_is_reported_as_testing() {
        if which::which("git").is_err() {
            return;
        }
        let weak = LOGIN.replace("When they submit valid credentials\n", "");
        let dir = project(&weak, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        commit_complete(dir.path(), "features/login.md");
        let v = login(&run(&dir)).clone();
        assert_eq!(v.spec_gate.status, Status::Warn);
        assert_ne!(v.impl_gate.status, Status::Fail);
        assert_eq!(v.lifecycle, Lifecycle::Testing);
    }

    #[test]
    fn complete_with_clean_gates_stays_complete() {
        if which::which("git").is_err() {
            return;
        }
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        commit_complete(dir.path(), "features/login.md");
        let v = login(&run(&dir)).clone();
        assert_eq!(v.spec_gate.status, Status::Pass);
        // Implementation Notes become required once COMPLETE; a WARN impl
        // gate still allows COMPLETE.
        assert_eq!(v.impl_gate.status, Status::Warn);
        assert_eq!(v.lifecycle, Lifecycle::Complete);
    }

    #[test]
    fn unreadable_feature_fails_alone() {
        let dir = project(LOGIN, "def test_user_logs_in_with_valid_credentials():\n    pass\n");
        std::fs::write(dir.path().join("features/broken.md"), [0xff, 0xfe, 0x00]).unwrap();
        let report = run(&dir);
        let broken = report
            .features
            .iter()
            .find(|f| f.feature == "features/broken.md")
            .unwrap();
        assert_eq!(broken.status, Status::Fail);
        assert_eq!(login(&report).status, Status::Pass);
        assert_eq!(report.status, Status::Fail);
    }
}
