//! Branch and tag lifecycle
//!
//! A branch is a repository path treated as the root of a line of
//! development (`trunk`, `branches/foo`, `tags/1.0`). The tracker keeps the
//! live branches keyed by path and, for every path that has been deleted, an
//! archive of the dead instances (most recent first), so a path that was
//! deleted and recreated still resolves to the right instance for a given
//! revision.

use crate::dump_format::{
    is_path_within, normalize_path, parent_path, CopySource, NodeAction, NodeChange,
    RevisionRecord,
};
use crate::error::{Error, Result};
use crate::properties::{PropertySet, PropertyValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Regex rewrite applied to branch display names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

/// Repository layout and naming rules, fixed when the tracker is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Path of the mainline
    pub mainline: String,
    /// Display name given to the mainline
    pub mainline_display_name: String,
    /// Directory whose children are branches
    pub branches_dir: String,
    /// Directory whose children are tags
    pub tags_dir: String,
    /// Applied in order to every display name
    pub rewrite_rules: Vec<RewriteRule>,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            mainline: "trunk".to_string(),
            mainline_display_name: "master".to_string(),
            branches_dir: "branches".to_string(),
            tags_dir: "tags".to_string(),
            rewrite_rules: Vec::new(),
        }
    }
}

impl BranchConfig {
    /// Load a JSON config; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load a JSON config that must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// True for the paths that start a line of development: the mainline and
    /// the direct children of the branches and tags directories
    pub fn is_branch_root(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if path == normalize_path(&self.mainline) {
            return true;
        }
        match parent_path(&path) {
            Some(parent) if !parent.is_empty() => {
                parent == normalize_path(&self.branches_dir) || parent == normalize_path(&self.tags_dir)
            }
            _ => false,
        }
    }

    /// True for paths inside a tags directory
    pub fn is_tag_path(&self, path: &str) -> bool {
        let tags = normalize_path(&self.tags_dir);
        path.starts_with(&format!("{}/", tags)) || path.contains(&format!("/{}/", tags))
    }

    fn short_name<'a>(&self, path: &'a str) -> &'a str {
        [&self.branches_dir, &self.tags_dir]
            .iter()
            .find_map(|dir| path.strip_prefix(&format!("{}/", normalize_path(dir))))
            .unwrap_or(path)
    }
}

/// One instance of a branch or tag
#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    name: String,
    display_name: String,
    created: u64,
    deleted: Option<u64>,
    is_tag: bool,
    is_pure: bool,
    origin: Option<CopySource>,
    activity: BTreeSet<u64>,
    /// path -> revision -> complete property set as of that revision
    #[serde(skip)]
    property_history: BTreeMap<String, BTreeMap<u64, PropertySet>>,
}

impl Branch {
    /// Repository path of the branch root
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn deleted(&self) -> Option<u64> {
        self.deleted
    }

    pub fn is_tag(&self) -> bool {
        self.is_tag
    }

    /// True while the branch holds nothing but its initial copy
    pub fn is_pure(&self) -> bool {
        self.is_pure
    }

    pub fn origin(&self) -> Option<&CopySource> {
        self.origin.as_ref()
    }

    /// Revisions that touched this branch, ascending
    pub fn activity(&self) -> impl Iterator<Item = u64> + '_ {
        self.activity.iter().copied()
    }

    pub fn is_active_at(&self, revision: u64) -> bool {
        self.activity.contains(&revision)
    }

    /// True if `revision` falls in `[created, deleted)`
    pub fn valid_at(&self, revision: u64) -> bool {
        revision >= self.created && self.deleted.is_none_or(|d| revision < d)
    }

    /// Path relative to the branch root
    pub fn relative_path<'a>(&self, path: &'a str) -> Result<&'a str> {
        let path = path.trim_matches('/');
        if !is_path_within(path, &self.name) {
            return Err(Error::NotFound(format!(
                "{} does not fall within {}",
                path, self.name
            )));
        }
        Ok(path[self.name.len()..].trim_start_matches('/'))
    }

    /// Properties of `path` as of `revision`: the set recorded at the
    /// revision itself, else the nearest earlier one
    pub fn properties_as_of(&self, path: &str, revision: u64) -> Option<&PropertySet> {
        self.property_history
            .get(&normalize_path(path))?
            .range(..=revision)
            .next_back()
            .map(|(_, props)| props)
    }

    pub fn property_as_of(&self, path: &str, revision: u64, name: &str) -> Option<&PropertyValue> {
        self.properties_as_of(path, revision)?.get(name)
    }

    fn record(&mut self, record: &RevisionRecord) {
        for node in &record.nodes {
            if !is_path_within(&node.path, &self.name) {
                continue;
            }
            self.activity.insert(record.revision);

            if let Some(props) = &node.props {
                self.property_history
                    .entry(node.path.clone())
                    .or_default()
                    .insert(record.revision, props.clone());
            }

            let is_root = node.path == self.name;
            let creates_branch = is_root
                && record.revision == self.created
                && matches!(node.action, NodeAction::Add | NodeAction::Replace);
            if creates_branch {
                continue;
            }
            match node.action {
                NodeAction::Add | NodeAction::Change | NodeAction::Replace => {
                    if self.is_pure {
                        tracing::debug!(
                            "{} is no longer pure: {} {} in r{}",
                            self.name,
                            node.action.as_str(),
                            node.path,
                            record.revision
                        );
                    }
                    self.is_pure = false;
                }
                NodeAction::Delete if !is_root => self.is_pure = false,
                NodeAction::Delete => {}
            }
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Branch({} -> {})", self.name, self.display_name)?;
        match (self.is_tag, self.is_pure) {
            (true, true) => write!(f, " pure-tag"),
            (true, false) => write!(f, " impure-tag"),
            _ => Ok(()),
        }
    }
}

/// Live branches plus the archive of deleted ones
#[derive(Debug)]
pub struct BranchTracker {
    config: BranchConfig,
    rules: Vec<(Regex, String)>,
    live: BTreeMap<String, Branch>,
    /// path -> dead instances, most recently deleted first
    dead: HashMap<String, Vec<Branch>>,
}

impl BranchTracker {
    /// Build a tracker; rewrite rule patterns are compiled here
    pub fn new(config: BranchConfig) -> Result<Self> {
        let rules = config
            .rewrite_rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.replacement.clone()))
                    .map_err(|e| Error::Config(format!("rewrite rule {:?}: {}", rule.pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            rules,
            live: BTreeMap::new(),
            dead: HashMap::new(),
        })
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    /// Start a branch at `path`
    pub fn create_branch_at(&mut self, path: &str, revision: u64) -> Result<&Branch> {
        self.insert(normalize_path(path), revision, None)
    }

    /// Start a branch at the node's path, remembering its copy source
    pub fn create_branch_for_node(&mut self, node: &NodeChange, revision: u64) -> Result<&Branch> {
        self.insert(node.path.clone(), revision, node.copy_from.clone())
    }

    /// Retire the live branch at `path` into the dead archive
    pub fn delete_branch_at(&mut self, path: &str, revision: u64) -> Result<&Branch> {
        let name = normalize_path(path);
        let mut branch = self
            .live
            .remove(&name)
            .ok_or_else(|| Error::NotFound(format!("live branch {}", name)))?;
        branch.deleted = Some(revision);
        branch.display_name = format!("{}@{}-{}", branch.display_name, branch.created, revision);
        tracing::debug!("Deleted {} in r{}", branch, revision);

        let archive = self.dead.entry(name).or_default();
        archive.insert(0, branch);
        Ok(&archive[0])
    }

    /// Branch owning `path` at `revision` (any revision if `None`).
    ///
    /// Walks from `path` towards the root; at each level a live branch
    /// created at or before `revision` wins, then a dead instance whose
    /// lifetime covers `revision` (the most recently created one).
    pub fn find(&self, path: &str, revision: Option<u64>) -> Option<&Branch> {
        let path = normalize_path(path);
        let mut candidate = Some(path.as_str());
        while let Some(current) = candidate {
            if let Some(branch) = self.live.get(current) {
                if revision.is_none_or(|rev| rev >= branch.created) {
                    return Some(branch);
                }
            }
            if let Some(rev) = revision {
                let dead = self
                    .dead
                    .get(current)
                    .and_then(|list| list.iter().filter(|b| b.valid_at(rev)).max_by_key(|b| b.created));
                if dead.is_some() {
                    return dead;
                }
            }
            candidate = parent_path(current);
        }
        None
    }

    /// The live branch rooted exactly at `path`
    pub fn live(&self, path: &str) -> Option<&Branch> {
        self.live.get(&normalize_path(path))
    }

    /// Names of live branches at or below `path`
    pub fn live_within(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);
        self.live
            .keys()
            .filter(|name| is_path_within(name, &path))
            .cloned()
            .collect()
    }

    pub fn live_branches(&self) -> impl Iterator<Item = &Branch> {
        self.live.values()
    }

    /// Every dead instance, grouped by path (most recent first within a path)
    pub fn dead_branches(&self) -> impl Iterator<Item = &Branch> {
        let mut paths: Vec<&String> = self.dead.keys().collect();
        paths.sort();
        paths.into_iter().flat_map(|p| self.dead[p].iter())
    }

    /// Dead instances at `path`, most recent first
    pub fn dead_at(&self, path: &str) -> &[Branch] {
        self.dead
            .get(&normalize_path(path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fold a revision into the live branch `name`: activity, property
    /// history and purity
    pub fn record_activity(&mut self, name: &str, record: &RevisionRecord) -> Result<()> {
        let branch = self
            .live
            .get_mut(&normalize_path(name))
            .ok_or_else(|| Error::NotFound(format!("live branch {}", name)))?;
        branch.record(record);
        Ok(())
    }

    fn insert(&mut self, name: String, revision: u64, origin: Option<CopySource>) -> Result<&Branch> {
        if self.live.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        let branch = Branch {
            display_name: self.display_name(&name),
            is_tag: self.config.is_tag_path(&name),
            name: name.clone(),
            created: revision,
            deleted: None,
            is_pure: true,
            origin,
            activity: BTreeSet::new(),
            property_history: BTreeMap::new(),
        };
        tracing::debug!("Created {} in r{}", branch, revision);
        Ok(self.live.entry(name).or_insert(branch))
    }

    fn display_name(&self, path: &str) -> String {
        let short = self.config.short_name(path);
        let mut name = if short == normalize_path(&self.config.mainline) {
            self.config.mainline_display_name.clone()
        } else {
            short.to_string()
        };
        for (re, replacement) in &self.rules {
            name = re.replace_all(&name, replacement.as_str()).into_owned();
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_format::NodeKind;

    fn tracker() -> BranchTracker {
        BranchTracker::new(BranchConfig::default()).unwrap()
    }

    fn record(revision: u64, nodes: Vec<NodeChange>) -> RevisionRecord {
        RevisionRecord {
            revision,
            props: PropertySet::new(),
            nodes,
        }
    }

    fn node(path: &str, kind: NodeKind, action: NodeAction) -> NodeChange {
        NodeChange::new(path, Some(kind), action)
    }

    #[test]
    fn test_config_branch_roots() {
        let config = BranchConfig::default();
        assert!(config.is_branch_root("trunk"));
        assert!(config.is_branch_root("/branches/dev"));
        assert!(config.is_branch_root("tags/1.0"));
        assert!(!config.is_branch_root("branches"));
        assert!(!config.is_branch_root("branches/dev/src"));
        assert!(!config.is_branch_root("trunk/src"));
        assert!(!config.is_branch_root(""));
    }

    #[test]
    fn test_classification_and_display_names() {
        let mut t = tracker();
        assert_eq!(t.create_branch_at("trunk", 1).unwrap().display_name(), "master");
        let tag = t.create_branch_at("tags/1.0", 2).unwrap();
        assert!(tag.is_tag());
        assert_eq!(tag.display_name(), "1.0");
        let dev = t.create_branch_at("/branches/dev/", 3).unwrap();
        assert!(!dev.is_tag());
        assert_eq!(dev.name(), "branches/dev");
        assert_eq!(dev.display_name(), "dev");
    }

    #[test]
    fn test_rewrite_rules_apply_in_order() {
        let config = BranchConfig {
            rewrite_rules: vec![
                RewriteRule {
                    pattern: "^release-".into(),
                    replacement: "v".into(),
                },
                RewriteRule {
                    pattern: r"\.".into(),
                    replacement: "_".into(),
                },
            ],
            ..BranchConfig::default()
        };
        let mut t = BranchTracker::new(config).unwrap();
        assert_eq!(t.create_branch_at("tags/release-1.2", 5).unwrap().display_name(), "v1_2");
    }

    #[test]
    fn test_bad_rewrite_rule_is_config_error() {
        let config = BranchConfig {
            rewrite_rules: vec![RewriteRule {
                pattern: "(".into(),
                replacement: String::new(),
            }],
            ..BranchConfig::default()
        };
        assert!(matches!(BranchTracker::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let mut t = tracker();
        t.create_branch_at("trunk", 1).unwrap();
        assert!(matches!(t.create_branch_at("trunk", 2), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_delete_requires_live_branch() {
        let mut t = tracker();
        assert!(matches!(t.delete_branch_at("branches/x", 3), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_find_prefers_longest_root() {
        let mut t = tracker();
        t.create_branch_at("", 0).unwrap();
        t.create_branch_at("branches/dev", 2).unwrap();
        assert_eq!(t.find("branches/dev/src/a.c", Some(4)).unwrap().name(), "branches/dev");
        assert_eq!(t.find("branches/other/x", Some(4)).unwrap().name(), "");
        assert!(t.find("branches/dev/a", None).is_some());
    }

    #[test]
    fn test_find_respects_creation_and_deletion() {
        let mut t = tracker();
        t.create_branch_at("trunk", 1).unwrap();
        t.create_branch_at("branches/dev", 5).unwrap();
        assert!(t.find("branches/dev", Some(4)).is_none());

        t.delete_branch_at("branches/dev", 8).unwrap();
        let dead = t.find("branches/dev/x", Some(6)).unwrap();
        assert_eq!(dead.deleted(), Some(8));
        assert_eq!(dead.display_name(), "dev@5-8");
        assert!(t.find("branches/dev/x", Some(8)).is_none());
        assert!(t.find("branches/dev/x", None).is_none());
        assert_eq!(t.find("trunk/x", Some(8)).unwrap().name(), "trunk");
    }

    #[test]
    fn test_deleted_branch_falls_back_to_enclosing_branch() {
        let mut t = tracker();
        t.create_branch_at("", 0).unwrap();
        t.create_branch_at("branches/dev", 2).unwrap();
        t.delete_branch_at("branches/dev", 5).unwrap();

        assert_eq!(t.find("branches/dev/x", Some(1)).unwrap().name(), "");
        let dead = t.find("branches/dev/x", Some(3)).unwrap();
        assert_eq!(dead.name(), "branches/dev");
        assert_eq!(dead.deleted(), Some(5));
        assert_eq!(t.find("branches/dev/x", Some(5)).unwrap().name(), "");
        assert_eq!(t.find("branches/dev/x", Some(7)).unwrap().name(), "");
        assert_eq!(t.find("branches/dev/x", None).unwrap().name(), "");
    }

    #[test]
    fn test_recreated_branch_keeps_both_instances() {
        let mut t = tracker();
        t.create_branch_at("branches/dev", 2).unwrap();
        t.delete_branch_at("branches/dev", 4).unwrap();
        t.create_branch_at("branches/dev", 6).unwrap();
        t.delete_branch_at("branches/dev", 9).unwrap();
        t.create_branch_at("branches/dev", 10).unwrap();

        assert_eq!(t.find("branches/dev", Some(3)).unwrap().created(), 2);
        assert_eq!(t.find("branches/dev", Some(7)).unwrap().created(), 6);
        assert!(t.find("branches/dev", Some(5)).is_none());
        assert_eq!(t.find("branches/dev", Some(12)).unwrap().created(), 10);

        let archive: Vec<u64> = t.dead_at("branches/dev").iter().map(Branch::created).collect();
        assert_eq!(archive, vec![6, 2]);
        assert_eq!(t.dead_branches().count(), 2);
        assert_eq!(t.live_branches().count(), 1);
    }

    #[test]
    fn test_purity_tracking() {
        let mut t = tracker();
        let mut copy = node("tags/1.0", NodeKind::Dir, NodeAction::Add);
        copy.copy_from = Some(CopySource {
            path: "trunk".into(),
            revision: 3,
        });
        t.create_branch_for_node(&copy, 4).unwrap();
        t.record_activity("tags/1.0", &record(4, vec![copy.clone()])).unwrap();
        let tag = t.live("tags/1.0").unwrap();
        assert!(tag.is_pure());
        assert_eq!(tag.origin().unwrap().path, "trunk");
        assert!(tag.is_active_at(4));
        assert_eq!(tag.to_string(), "Branch(tags/1.0 -> 1.0) pure-tag");

        // Unrelated paths leave it untouched.
        t.record_activity("tags/1.0", &record(5, vec![node("trunk/x", NodeKind::File, NodeAction::Add)]))
            .unwrap();
        assert!(!t.live("tags/1.0").unwrap().is_active_at(5));

        t.record_activity(
            "tags/1.0",
            &record(6, vec![node("tags/1.0/README", NodeKind::File, NodeAction::Change)]),
        )
        .unwrap();
        let tag = t.live("tags/1.0").unwrap();
        assert!(!tag.is_pure());
        assert_eq!(tag.to_string(), "Branch(tags/1.0 -> 1.0) impure-tag");
        assert_eq!(tag.activity().collect::<Vec<_>>(), vec![4, 6]);
    }

    #[test]
    fn test_deleting_root_keeps_purity_but_replacing_does_not() {
        let mut t = tracker();
        t.create_branch_at("tags/a", 1).unwrap();
        t.record_activity("tags/a", &record(2, vec![NodeChange::new("tags/a", None, NodeAction::Delete)]))
            .unwrap();
        assert!(t.live("tags/a").unwrap().is_pure());

        t.create_branch_at("tags/b", 1).unwrap();
        t.record_activity("tags/b", &record(2, vec![node("tags/b", NodeKind::Dir, NodeAction::Replace)]))
            .unwrap();
        assert!(!t.live("tags/b").unwrap().is_pure());

        t.create_branch_at("tags/c", 1).unwrap();
        t.record_activity("tags/c", &record(2, vec![NodeChange::new("tags/c/f", None, NodeAction::Delete)]))
            .unwrap();
        assert!(!t.live("tags/c").unwrap().is_pure());
    }

    #[test]
    fn test_property_history_carries_forward() {
        let mut t = tracker();
        t.create_branch_at("trunk", 0).unwrap();

        let mut change = node("trunk", NodeKind::Dir, NodeAction::Change);
        change.props = Some([("owner", "alice")].into_iter().collect());
        t.record_activity("trunk", &record(1, vec![change])).unwrap();

        let mut change = node("trunk", NodeKind::Dir, NodeAction::Change);
        change.props = Some([("owner", "bob")].into_iter().collect());
        t.record_activity("trunk", &record(7, vec![change])).unwrap();

        let trunk = t.live("trunk").unwrap();
        assert_eq!(trunk.property_as_of("/trunk", 0, "owner"), None);
        assert_eq!(&trunk.property_as_of("/trunk", 1, "owner").unwrap()[..], b"alice");
        assert_eq!(&trunk.property_as_of("/trunk", 5, "owner").unwrap()[..], b"alice");
        assert_eq!(&trunk.property_as_of("/trunk", 9, "owner").unwrap()[..], b"bob");
        assert_eq!(trunk.property_as_of("/trunk", 9, "missing"), None);
        assert_eq!(trunk.property_as_of("/trunk/other", 9, "owner"), None);
    }

    #[test]
    fn test_relative_path() {
        let mut t = tracker();
        let b = t.create_branch_at("branches/dev", 1).unwrap();
        assert_eq!(b.relative_path("branches/dev/src/a.c").unwrap(), "src/a.c");
        assert_eq!(b.relative_path("/branches/dev").unwrap(), "");
        assert!(b.relative_path("branches/devx/a").is_err());
    }

    #[test]
    fn test_live_within() {
        let mut t = tracker();
        t.create_branch_at("branches/a", 1).unwrap();
        t.create_branch_at("branches/b", 1).unwrap();
        t.create_branch_at("trunk", 1).unwrap();
        assert_eq!(t.live_within("branches"), vec!["branches/a", "branches/b"]);
        assert_eq!(t.live_within("trunk"), vec!["trunk"]);
        assert!(t.live_within("trunk/src").is_empty());
    }

    #[test]
    fn test_config_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = BranchConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(missing, BranchConfig::default());

        let path = dir.path().join("branches.json");
        std::fs::write(&path, r#"{"mainline": "main", "rewrite_rules": [{"pattern": "x", "replacement": "y"}]}"#)
            .unwrap();
        let config = BranchConfig::load(&path).unwrap();
        assert_eq!(config.mainline, "main");
        assert_eq!(config.tags_dir, "tags");
        assert_eq!(config.rewrite_rules.len(), 1);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(BranchConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_from_file_requires_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("typo.json");
        match BranchConfig::from_file(&missing) {
            Err(Error::Config(message)) => assert!(message.contains("typo.json")),
            other => panic!("expected a config error, got {:?}", other),
        }

        std::fs::write(&missing, r#"{"tags_dir": "releases"}"#).unwrap();
        let config = BranchConfig::from_file(&missing).unwrap();
        assert_eq!(config.tags_dir, "releases");
        assert_eq!(config.mainline, "trunk");
    }
}
