//! Logic drift: an LLM judges whether each traced test actually exercises
//! the behavior its scenario describes.
//!
//! Verdicts are cached on disk under a content hash of the scenario and test
//! bodies, so unchanged pairs never trigger a second call. The transport is
//! abstracted behind [`DriftOracle`]; the core never talks to a network.

use crate::error::LlmError;
use crate::feature::Scenario;
use crate::io;
use crate::traceability::TraceabilityResult;
use crate::types::Status;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const SYSTEM_PROMPT: &str = "\
You review automated tests against the behavioral scenario they claim to cover.
Compare the scenario (Given/When/Then) with the test body and answer with a
single JSON object and nothing else:

{\"verdict\": \"ALIGNED\" | \"PARTIAL\" | \"DIVERGENT\", \"reasoning\": \"<one or two sentences>\"}

ALIGNED: the test sets up the Given, performs the When, and asserts the Then.
PARTIAL: the test exercises the scenario but misses or weakens some clause.
DIVERGENT: the test checks different behavior than the scenario describes.";

// ---------------------------------------------------------------------------
// DriftOracle
// ---------------------------------------------------------------------------

/// Something that can answer a two-message (system + user) prompt. The
/// engine drops the returned future when the run is cancelled, so an
/// implementation must release its resources on drop.
#[async_trait]
pub trait DriftOracle: Send + Sync {
    async fn judge(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftVerdict {
    Aligned,
    Partial,
    Divergent,
    Skipped,
}

impl DriftVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftVerdict::Aligned => "ALIGNED",
            DriftVerdict::Partial => "PARTIAL",
            DriftVerdict::Divergent => "DIVERGENT",
            DriftVerdict::Skipped => "SKIPPED",
        }
    }

    fn parse(s: &str) -> Option<DriftVerdict> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALIGNED" => Some(DriftVerdict::Aligned),
            "PARTIAL" => Some(DriftVerdict::Partial),
            "DIVERGENT" => Some(DriftVerdict::Divergent),
            _ => None,
        }
    }
}

/// One scenario and the concatenated bodies of the tests traced to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftPair {
    pub scenario_title: String,
    pub scenario_body: String,
    pub entry_names: Vec<String>,
    pub entry_body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftOutcome {
    pub scenario_title: String,
    pub entry_names: Vec<String>,
    pub verdict: DriftVerdict,
    pub reasoning: String,
    #[serde(skip)]
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftResult {
    pub outcomes: Vec<DriftOutcome>,
}

impl DriftResult {
    pub fn count(&self, verdict: DriftVerdict) -> usize {
        self.outcomes.iter().filter(|o| o.verdict == verdict).count()
    }

    pub fn status(&self) -> Status {
        if self.count(DriftVerdict::Divergent) > 0 {
            Status::Fail
        } else if self.count(DriftVerdict::Partial) > 0 || self.count(DriftVerdict::Skipped) > 0 {
            Status::Warn
        } else {
            Status::Pass
        }
    }
}

/// Build one pair per traced automated scenario.
pub fn pairs_from(scenarios: &[Scenario], trace: &TraceabilityResult) -> Vec<DriftPair> {
    scenarios
        .iter()
        .filter(|s| !s.is_manual)
        .filter_map(|s| {
            let m = trace.matches.iter().find(|m| m.scenario_title == s.title)?;
            let bodies = trace.matched_bodies(&s.title);
            if bodies.is_empty() {
                return None;
            }
            Some(DriftPair {
                scenario_title: s.title.clone(),
                scenario_body: s.body.clone(),
                entry_names: m.test_entry_names.clone(),
                entry_body: bodies.join("\n\n"),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DriftCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVerdict {
    pub verdict: DriftVerdict,
    pub reasoning: String,
}

/// Content-addressed verdict store: `<dir>/<sha256>.json`. Entries are
/// written once and never mutated.
#[derive(Debug)]
pub struct DriftCache {
    dir: PathBuf,
    write_failed: AtomicBool,
}

impl DriftCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_failed: AtomicBool::new(false),
        }
    }

    pub fn key(scenario_body: &str, entry_body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scenario_body.as_bytes());
        hasher.update(b"\n---\n");
        hasher.update(entry_body.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// A cached verdict, if present and one of the three real verdicts.
    pub fn get(&self, key: &str) -> Option<CachedVerdict> {
        let data = std::fs::read_to_string(self.entry_path(key)).ok()?;
        let cached: CachedVerdict = serde_json::from_str(&data).ok()?;
        (cached.verdict != DriftVerdict::Skipped).then_some(cached)
    }

    /// Persist a verdict. Failures are logged once per cache and otherwise
    /// ignored; the next run simply asks again.
    pub fn put(&self, key: &str, verdict: &CachedVerdict) {
        let written = serde_json::to_vec_pretty(verdict)
            .map_err(crate::error::PurlinError::from)
            .and_then(|data| io::atomic_write(&self.entry_path(key), &data));
        if let Err(e) = written {
            if !self.write_failed.swap(true, Ordering::SeqCst) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "drift cache write failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DriftEngine
// ---------------------------------------------------------------------------

pub struct DriftEngine {
    oracle: Arc<dyn DriftOracle>,
    cache: Arc<DriftCache>,
    parallelism: usize,
    cancel: CancellationToken,
}

impl DriftEngine {
    pub fn new(
        oracle: Arc<dyn DriftOracle>,
        cache: Arc<DriftCache>,
        parallelism: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            oracle,
            cache,
            parallelism: parallelism.max(1),
            cancel,
        }
    }

    /// Judge every pair, at most `parallelism` oracle calls at a time.
    /// Outcomes keep the order of `pairs`.
    pub async fn analyze(&self, pairs: &[DriftPair]) -> DriftResult {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(pairs.len());

        for pair in pairs.iter().cloned() {
            let sem = semaphore.clone();
            let oracle = self.oracle.clone();
            let cache = self.cache.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match sem.acquire().await {
                    Ok(p) => p,
                    Err(_) => return skipped(&pair, "semaphore closed".to_string()),
                };
                judge_pair(oracle.as_ref(), &cache, &cancel, &pair).await
            }));
        }

        let mut outcomes = Vec::with_capacity(pairs.len());
        for (pair, handle) in pairs.iter().zip(handles) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(scenario = %pair.scenario_title, error = %e, "drift task failed");
                    outcomes.push(skipped(pair, format!("task join error: {e}")));
                }
            }
        }
        DriftResult { outcomes }
    }
}

async fn judge_pair(
    oracle: &dyn DriftOracle,
    cache: &DriftCache,
    cancel: &CancellationToken,
    pair: &DriftPair,
) -> DriftOutcome {
    let key = DriftCache::key(&pair.scenario_body, &pair.entry_body);
    if let Some(hit) = cache.get(&key) {
        return DriftOutcome {
            scenario_title: pair.scenario_title.clone(),
            entry_names: pair.entry_names.clone(),
            verdict: hit.verdict,
            reasoning: hit.reasoning,
            cached: true,
        };
    }
    if cancel.is_cancelled() {
        return skipped(pair, LlmError::Cancelled.to_string());
    }

    let user = format!(
        "## Scenario: {}\n\n{}\n\n## Test\n\n{}\n",
        pair.scenario_title, pair.scenario_body, pair.entry_body
    );
    let response = tokio::select! {
        r = oracle.judge(SYSTEM_PROMPT, &user) => r,
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
    };
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(scenario = %pair.scenario_title, error = %e, "drift call failed");
            return skipped(pair, e.to_string());
        }
    };
    match parse_response(&response) {
        Ok(cached) => {
            cache.put(&key, &cached);
            DriftOutcome {
                scenario_title: pair.scenario_title.clone(),
                entry_names: pair.entry_names.clone(),
                verdict: cached.verdict,
                reasoning: cached.reasoning,
                cached: false,
            }
        }
        Err(reason) => skipped(pair, reason),
    }
}

fn skipped(pair: &DriftPair, reason: String) -> DriftOutcome {
    DriftOutcome {
        scenario_title: pair.scenario_title.clone(),
        entry_names: pair.entry_names.clone(),
        verdict: DriftVerdict::Skipped,
        reasoning: reason,
        cached: false,
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawResponse {
    verdict: String,
    #[serde(default)]
    reasoning: String,
}

fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a strictly-JSON `{verdict, reasoning}` reply, fences tolerated.
pub fn parse_response(text: &str) -> Result<CachedVerdict, String> {
    let raw: RawResponse = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| format!("malformed response: {e}"))?;
    let verdict = DriftVerdict::parse(&raw.verdict)
        .ok_or_else(|| format!("unexpected verdict '{}'", raw.verdict))?;
    Ok(CachedVerdict {
        verdict,
        reasoning: raw.reasoning.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
