//! The set of feature files in a project and the prerequisite edges between
//! them. Edges may form cycles; walks carry a visited set.

use crate::error::{PurlinError, Result};
use crate::feature::{self, ParsedFeature};
use crate::io;
use crate::paths;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// Features directory relative to the project root (absolute when it
    /// lies outside the root).
    features_rel: PathBuf,
    /// Parsed features keyed by file name (`login.md`).
    features: BTreeMap<String, ParsedFeature>,
    /// Files that exist but could not be read, keyed by file name.
    load_errors: BTreeMap<String, String>,
}

impl FeatureSet {
    /// Load every `*.md` feature (companions excluded) directly inside
    /// `features_dir`.
    pub fn load(root: &Path, features_dir: &Path) -> Result<Self> {
        if !features_dir.is_dir() {
            return Err(PurlinError::FeaturesDirMissing(paths::rel_display(
                root,
                features_dir,
            )));
        }
        let features_rel = features_dir.strip_prefix(root).unwrap_or(features_dir);
        let mut set = FeatureSet {
            features_rel: paths::normalize_lexical(features_rel)
                .unwrap_or_else(|| features_rel.to_path_buf()),
            ..Default::default()
        };
        for path in io::list_files(features_dir) {
            let name = file_name(&path);
            if !name.ends_with(".md") || paths::is_companion(&path) {
                continue;
            }
            match feature::load_feature(root, &path) {
                Ok(f) => {
                    set.features.insert(name, f);
                }
                Err(e) => {
                    tracing::warn!(feature = %name, error = %e, "failed to read feature");
                    set.load_errors.insert(name, e.to_string());
                }
            }
        }
        tracing::debug!(
            count = set.features.len(),
            errors = set.load_errors.len(),
            "loaded features"
        );
        Ok(set)
    }

    /// Build a set from already-parsed features. `features_rel` is the
    /// features directory relative to the project root.
    pub fn from_features(features_rel: &Path, features: Vec<ParsedFeature>) -> Self {
        let features = features
            .into_iter()
            .map(|f| (file_name(Path::new(&f.rel_path)), f))
            .collect();
        FeatureSet {
            features_rel: features_rel.to_path_buf(),
            features,
            load_errors: BTreeMap::new(),
        }
    }

    /// Every feature file name, readable or not, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .features
            .keys()
            .chain(self.load_errors.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&ParsedFeature> {
        self.features.get(name)
    }

    pub fn load_error(&self, name: &str) -> Option<&str> {
        self.load_errors.get(name).map(String::as_str)
    }

    /// Look up a feature by stem (`login`) or file name (`login.md`).
    pub fn find(&self, stem_or_name: &str) -> Option<String> {
        let name = self.target_name(stem_or_name)?;
        (self.features.contains_key(&name) || self.load_errors.contains_key(&name))
            .then_some(name)
    }

    /// Resolve a `> Prerequisite:` target to a parsed feature. A target is
    /// a bare file name, or a path relative to either the features directory
    /// or the project root that lands in the features directory. Companions
    /// never resolve.
    pub fn resolve(&self, target: &str) -> Option<&ParsedFeature> {
        self.features.get(&self.target_name(target)?)
    }

    /// File name a target refers to, when it points into the features
    /// directory.
    fn target_name(&self, target: &str) -> Option<String> {
        let target = Path::new(target.trim());
        let name = file_name(target);
        if name.is_empty() || name.ends_with(paths::COMPANION_SUFFIX) {
            return None;
        }
        let parent = target.parent().unwrap_or(Path::new(""));
        let lands_here = |p: &Path| paths::normalize_lexical(p).as_deref() == Some(self.features_rel.as_path());
        let inside = parent.as_os_str().is_empty()
            || lands_here(&self.features_rel.join(parent))
            || lands_here(parent);
        if !inside {
            return None;
        }
        if name.ends_with(".md") {
            Some(name)
        } else {
            Some(format!("{name}.md"))
        }
    }

    /// Direct prerequisite targets of `feature` that name no feature file.
    pub fn unresolved(&self, feature: &ParsedFeature) -> Vec<String> {
        feature
            .prerequisites
            .iter()
            .filter(|t| self.find(t).is_none())
            .cloned()
            .collect()
    }

    /// Transitive prerequisites of `feature`, breadth-first in declaration
    /// order, excluding the feature itself.
    pub fn closure(&self, feature: &ParsedFeature) -> Vec<&ParsedFeature> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(feature.rel_path.as_str());
        let mut queue: VecDeque<&ParsedFeature> = VecDeque::new();
        let mut out = Vec::new();

        for target in &feature.prerequisites {
            if let Some(next) = self.resolve(target) {
                if visited.insert(next.rel_path.as_str()) {
                    queue.push_back(next);
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            out.push(current);
            for target in &current.prerequisites {
                if let Some(next) = self.resolve(target) {
                    if visited.insert(next.rel_path.as_str()) {
                        queue.push_back(next);
                    }
                }
            }
        }
        out
    }

    /// Anchor nodes reachable through prerequisites.
    pub fn anchors_for(&self, feature: &ParsedFeature) -> Vec<&ParsedFeature> {
        self.closure(feature)
            .into_iter()
            .filter(|f| f.anchor_kind.is_anchor())
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::parse_feature;
    use tempfile::TempDir;

    fn set(files: &[(&str, &str)]) -> FeatureSet {
        let features = files
            .iter()
            .map(|(name, body)| parse_feature(&format!("features/{name}"), body))
            .collect();
        FeatureSet::from_features(Path::new("features"), features)
    }

    fn rels<'a>(features: &[&'a ParsedFeature]) -> Vec<&'a str> {
        features.iter().map(|f| f.rel_path.as_str()).collect()
    }

    #[test]
    fn closure_is_transitive_and_tolerates_cycles() {
        let s = set(&[
            ("login.md", "> Prerequisite: session.md\n"),
            ("session.md", "> Prerequisite: arch_auth.md, login.md\n"),
            ("arch_auth.md", "> Prerequisite: session.md\n"),
        ]);
        let login = s.get("login.md").unwrap();
        assert_eq!(
            rels(&s.closure(login)),
            vec!["features/session.md", "features/arch_auth.md"]
        );
        assert_eq!(rels(&s.anchors_for(login)), vec!["features/arch_auth.md"]);
    }

    #[test]
    fn targets_resolve_by_file_name() {
        let s = set(&[("arch_auth.md", ""), ("login.md", "")]);
        assert!(s.resolve("features/arch_auth.md").is_some());
        assert!(s.resolve("arch_auth").is_some());
        assert!(s.resolve("../features/login.md").is_some());
        assert!(s.resolve("login.impl.md").is_none());
        assert!(s.resolve("missing.md").is_none());
        assert!(s.resolve("./arch_auth.md").is_some());
    }

    #[test]
    fn targets_outside_the_features_dir_do_not_resolve() {
        let s = set(&[
            ("login.md", "> Prerequisite: elsewhere/arch_auth.md, ../arch_auth.md\n"),
            ("arch_auth.md", ""),
        ]);
        assert!(s.resolve("elsewhere/arch_auth.md").is_none());
        assert!(s.resolve("docs/features/arch_auth.md").is_none());
        let login = s.get("login.md").unwrap();
        assert_eq!(
            s.unresolved(login),
            vec!["elsewhere/arch_auth.md".to_string(), "../arch_auth.md".to_string()]
        );
        assert!(s.anchors_for(login).is_empty());
    }

    #[test]
    fn loaded_set_resolves_against_nested_features_dir() {
        let dir = TempDir::new().unwrap();
        let features = dir.path().join("specs/features");
        std::fs::create_dir_all(&features).unwrap();
        std::fs::write(features.join("arch_auth.md"), "## Overview\nx\n").unwrap();
        let s = FeatureSet::load(dir.path(), &features).unwrap();
        assert!(s.resolve("specs/features/arch_auth.md").is_some());
        assert!(s.resolve("arch_auth.md").is_some());
        assert!(s.resolve("features/arch_auth.md").is_none());
    }

    #[test]
    fn unresolved_lists_direct_targets_only() {
        let s = set(&[
            ("login.md", "> Prerequisite: arch_auth.md, ghost.md\n"),
            ("arch_auth.md", "> Prerequisite: phantom.md\n"),
        ]);
        let login = s.get("login.md").unwrap();
        assert_eq!(s.unresolved(login), vec!["ghost.md".to_string()]);
    }

    #[test]
    fn load_skips_companions_and_non_markdown() {
        let dir = TempDir::new().unwrap();
        let features = dir.path().join("features");
        std::fs::create_dir_all(&features).unwrap();
        std::fs::write(features.join("login.md"), "## Overview\nx\n").unwrap();
        std::fs::write(features.join("login.impl.md"), "- impl_file: a.py\n").unwrap();
        std::fs::write(features.join("notes.txt"), "").unwrap();

        let s = FeatureSet::load(dir.path(), &features).unwrap();
        assert_eq!(s.names(), vec!["login.md".to_string()]);
        assert!(s.get("login.md").unwrap().has_companion);
        assert_eq!(s.find("login"), Some("login.md".to_string()));
    }

    #[test]
    fn missing_features_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = FeatureSet::load(dir.path(), &dir.path().join("features")).unwrap_err();
        assert!(matches!(err, PurlinError::FeaturesDirMissing(_)));
    }
}
