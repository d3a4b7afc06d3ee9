//! SVN dump file format structures
//!
//! Records produced by [`DumpReader`](crate::dump_reader::DumpReader). None of
//! them carry file text: payloads are described by offset and length into
//! the dump and fetched on demand.

use crate::object::ContentHash;
use crate::properties::{svn_props, PropertySet};
use serde::{Deserialize, Serialize};

/// The only dump format version understood
pub const SUPPORTED_FORMAT_VERSION: &str = "2";

/// Preamble of a dump file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpPreamble {
    /// Format version (always "2")
    pub format_version: String,

    /// Repository UUID
    pub uuid: String,
}

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(NodeKind::File),
            "dir" => Some(NodeKind::Dir),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }
}

/// Node action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAction {
    Add,
    Delete,
    Replace,
    Change,
}

impl NodeAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(NodeAction::Add),
            "delete" => Some(NodeAction::Delete),
            "replace" => Some(NodeAction::Replace),
            "change" => Some(NodeAction::Change),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeAction::Add => "add",
            NodeAction::Delete => "delete",
            NodeAction::Replace => "replace",
            NodeAction::Change => "change",
        }
    }
}

/// Source of a copy (`Node-copyfrom-path` / `Node-copyfrom-rev`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub path: String,
    pub revision: u64,
}

/// Location and checksums of a node's text inside the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Byte offset of the first payload byte
    pub offset: u64,
    /// Payload length (`Text-content-length`)
    pub length: u64,
    /// `Text-content-md5`, as declared
    pub md5: Option<String>,
    /// `Text-content-sha1`, as declared
    pub sha1: Option<ContentHash>,
}

/// One path-level change inside a revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    /// Repository-relative path, without leading or trailing slashes
    pub path: String,
    /// Node kind; dumps omit it on some deletes
    pub kind: Option<NodeKind>,
    pub action: NodeAction,
    pub copy_from: Option<CopySource>,
    /// Full property set, present only when the node carried a property block
    pub props: Option<PropertySet>,
    pub payload: Option<PayloadDescriptor>,
    /// `Text-copy-source-sha1` hint
    pub copy_source_sha1: Option<ContentHash>,
}

impl NodeChange {
    /// Basic node without copy info, properties or text
    pub fn new(path: impl Into<String>, kind: Option<NodeKind>, action: NodeAction) -> Self {
        Self {
            path: normalize_path(&path.into()),
            kind,
            action,
            copy_from: None,
            props: None,
            payload: None,
            copy_source_sha1: None,
        }
    }

    /// Declared SHA-1 of this node's own text, if any
    pub fn text_sha1(&self) -> Option<ContentHash> {
        self.payload.as_ref().and_then(|p| p.sha1)
    }
}

/// A revision and its node changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub revision: u64,
    pub props: PropertySet,
    pub nodes: Vec<NodeChange>,
}

impl RevisionRecord {
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            props: PropertySet::new(),
            nodes: Vec::new(),
        }
    }

    pub fn author(&self) -> Option<&str> {
        self.props.get_str(svn_props::AUTHOR)
    }

    pub fn log_message(&self) -> Option<&str> {
        self.props.get_str(svn_props::LOG)
    }

    /// `svn:date` parsed as RFC 3339
    pub fn date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.props
            .get_str(svn_props::DATE)
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

/// Strip leading and trailing slashes; the repository root is `""`
pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// True if `path` equals `ancestor` or lies beneath it
pub fn is_path_within(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    match path.strip_prefix(ancestor) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Parent of a normalized path; `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_change_normalizes_path() {
        let node = NodeChange::new("/trunk/a.txt/", Some(NodeKind::File), NodeAction::Add);
        assert_eq!(node.path, "trunk/a.txt");
        assert!(node.text_sha1().is_none());
    }

    #[test]
    fn test_kind_and_action_vocabulary() {
        assert_eq!(NodeKind::parse("dir"), Some(NodeKind::Dir));
        assert_eq!(NodeKind::parse("symlink"), None);
        assert_eq!(NodeAction::parse("replace"), Some(NodeAction::Replace));
        assert_eq!(NodeAction::parse("move"), None);
        assert_eq!(NodeAction::Change.as_str(), "change");
    }

    #[test]
    fn test_is_path_within() {
        assert!(is_path_within("trunk", "trunk"));
        assert!(is_path_within("trunk/a", "trunk"));
        assert!(!is_path_within("trunkx/a", "trunk"));
        assert!(!is_path_within("trunk", "trunk/a"));
        assert!(is_path_within("anything", ""));
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("branches/dev"), Some("branches"));
        assert_eq!(parent_path("trunk"), Some(""));
        assert_eq!(parent_path(""), None);
    }

    #[test]
    fn test_revision_record_accessors() {
        let mut rec = RevisionRecord::new(3);
        rec.props.set(svn_props::AUTHOR, "alice");
        rec.props.set(svn_props::LOG, "fix things");
        rec.props.set(svn_props::DATE, "2010-03-01T12:00:00.000000Z");
        assert_eq!(rec.author(), Some("alice"));
        assert_eq!(rec.log_message(), Some("fix things"));
        assert_eq!(rec.date().unwrap().timestamp(), 1267444800);
    }
}
