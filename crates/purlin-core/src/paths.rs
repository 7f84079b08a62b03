use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PURLIN_DIR: &str = ".purlin";
pub const CONFIG_FILE: &str = ".purlin/config.json";
pub const DRIFT_CACHE_DIR: &str = ".purlin/cache/logic_drift_cache";
pub const TESTS_DIR: &str = "tests";

pub const CRITIC_REPORT_MD: &str = "CRITIC_REPORT.md";
pub const FEATURE_REPORT_FILE: &str = "critic.json";

pub const COMPANION_SUFFIX: &str = ".impl.md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Default location of a feature's machine report: `tests/<stem>/critic.json`.
pub fn feature_report_path(root: &Path, stem: &str) -> PathBuf {
    root.join(TESTS_DIR).join(stem).join(FEATURE_REPORT_FILE)
}

pub fn feature_tests_dir(root: &Path, stem: &str) -> PathBuf {
    root.join(TESTS_DIR).join(stem)
}

/// Default drift verdict cache, private to the project.
pub fn drift_cache_dir(root: &Path) -> PathBuf {
    root.join(DRIFT_CACHE_DIR)
}

pub fn is_companion(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(COMPANION_SUFFIX))
        .unwrap_or(false)
}

/// `features/login.md` → `login`. Companions keep their `.impl` infix off:
/// `features/login.impl.md` → `login`.
pub fn feature_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.strip_suffix(COMPANION_SUFFIX)
        .or_else(|| name.strip_suffix(".md"))
        .unwrap_or(name)
        .to_string()
}

pub fn companion_path(feature_path: &Path) -> PathBuf {
    let stem = feature_stem(feature_path);
    feature_path.with_file_name(format!("{stem}{COMPANION_SUFFIX}"))
}

/// Project-relative path with `/` separators, used in every report.
pub fn rel_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// Resolve `.` and `..` without touching the filesystem. `None` when the
/// path climbs above its first component.
pub fn normalize_lexical(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Normal(_) | Component::RootDir | Component::Prefix(_) => {
                out.push(c.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_none() || !out.pop() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Test file naming
// ---------------------------------------------------------------------------

static TEST_FILE_RE: OnceLock<Regex> = OnceLock::new();

fn test_file_re() -> &'static Regex {
    TEST_FILE_RE.get_or_init(|| Regex::new(r"^test.*\.(py|sh)$").unwrap())
}

/// Basename matches `^test.*\.(py|sh)$`.
pub fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| test_file_re().is_match(n))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
