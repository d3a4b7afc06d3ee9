//! History replay
//!
//! Drives a [`DumpReader`] revision by revision, applying every node change
//! to a copy-on-write snapshot in the shared [`TreeArena`], indexing payloads
//! by content hash and keeping the [`BranchTracker`] in step.

use crate::blob_index::BlobIndex;
use crate::branch::{Branch, BranchConfig, BranchTracker};
use crate::dump_format::{DumpPreamble, NodeAction, NodeChange, NodeKind, PayloadDescriptor, RevisionRecord};
use crate::dump_reader::{DumpReader, Verification};
use crate::error::{Error, Result};
use crate::object::ContentHash;
use crate::properties::svn_props;
use crate::tree::{EntryKind, NodeId, TreeArena, TreeRoot};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

/// What a path resolves to in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub kind: EntryKind,
    pub executable: bool,
    pub content: Option<ContentHash>,
}

/// Reconstructed history of one dump
#[derive(Debug)]
pub struct Repository<R> {
    reader: DumpReader<R>,
    arena: TreeArena,
    /// Revision -> snapshot
    trees: BTreeMap<u64, TreeRoot>,
    blobs: BlobIndex,
    branches: BranchTracker,
    /// Node changes applied so far
    node_count: u64,
}

impl Repository<File> {
    /// Open a dump file on disk
    pub fn open(path: &Path, config: BranchConfig) -> Result<Self> {
        Self::new(DumpReader::open(path)?, config)
    }
}

impl<R: Read + Seek> Repository<R> {
    pub fn new(reader: DumpReader<R>, config: BranchConfig) -> Result<Self> {
        tracing::info!(
            "Replaying dump {} ({} bytes)",
            reader.preamble().uuid,
            reader.stream_len()
        );
        Ok(Self {
            reader,
            arena: TreeArena::new(),
            trees: BTreeMap::new(),
            blobs: BlobIndex::new(),
            branches: BranchTracker::new(config)?,
            node_count: 0,
        })
    }

    pub fn preamble(&self) -> &DumpPreamble {
        self.reader.preamble()
    }

    /// Replay the next revision of the stream.
    /// Returns its number, or `None` once the stream is exhausted.
    pub fn replay_next(&mut self) -> Result<Option<u64>> {
        let Some(record) = self.reader.advance()? else {
            return Ok(None);
        };
        self.apply(&record)?;
        Ok(Some(record.revision))
    }

    /// Replay everything left in the stream; returns the number of revisions
    pub fn replay_all(&mut self) -> Result<u64> {
        let mut count = 0;
        while self.replay_next()?.is_some() {
            count += 1;
        }
        tracing::info!(
            "Replayed {} revisions, {} nodes, {} blobs",
            count,
            self.node_count,
            self.blobs.len()
        );
        Ok(count)
    }

    /// Latest replayed revision
    pub fn head(&self) -> Option<u64> {
        self.trees.keys().next_back().copied()
    }

    /// Replayed revision numbers, ascending
    pub fn revisions(&self) -> impl Iterator<Item = u64> + '_ {
        self.trees.keys().copied()
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn arena(&self) -> &TreeArena {
        &self.arena
    }

    pub fn blobs(&self) -> &BlobIndex {
        &self.blobs
    }

    pub fn branches(&self) -> &BranchTracker {
        &self.branches
    }

    pub fn find_branch(&self, path: &str, revision: Option<u64>) -> Option<&Branch> {
        self.branches.find(path, revision)
    }

    /// Snapshot as of `revision`: the revision itself, or the nearest
    /// replayed revision below it
    pub fn tree_at(&self, revision: u64) -> Result<TreeRoot> {
        self.trees
            .range(..=revision)
            .next_back()
            .map(|(_, root)| *root)
            .ok_or_else(|| Error::NotFound(format!("no snapshot at or before r{}", revision)))
    }

    pub fn resolve_path(&self, revision: u64, path: &str) -> Result<NodeInfo> {
        let root = self.tree_at(revision)?;
        let id = self.arena.resolve(root, path)?;
        Ok(self.info(id))
    }

    /// Entries of a directory, in name order
    pub fn list_dir(&self, revision: u64, path: &str) -> Result<Vec<(String, NodeInfo)>> {
        let root = self.tree_at(revision)?;
        let id = self.arena.resolve(root, path)?;
        if !self.arena.node(id).kind.is_dir() {
            return Err(Error::NotFound(format!("directory {:?} in r{}", path, revision)));
        }
        Ok(self
            .arena
            .children(id)
            .map(|(name, child)| (name.to_string(), self.info(child)))
            .collect())
    }

    /// Fetch a blob's bytes from the dump
    pub fn read_blob(&mut self, hash: &ContentHash, verification: Verification) -> Result<Bytes> {
        let payload = self.locate(hash)?;
        self.reader.read_payload(&payload, verification)
    }

    /// Copy a blob's bytes into `sink`
    pub fn stream_blob<W: Write + ?Sized>(
        &mut self,
        hash: &ContentHash,
        sink: &mut W,
        verification: Verification,
    ) -> Result<u64> {
        let payload = self.locate(hash)?;
        self.reader.stream_payload(&payload, sink, verification)
    }

    /// Read any revision record without touching replay state
    pub fn revision(&mut self, revision: u64) -> Result<RevisionRecord> {
        self.reader.revision(revision)
    }

    fn locate(&self, hash: &ContentHash) -> Result<PayloadDescriptor> {
        let locator = self.blobs.lookup(hash)?;
        Ok(PayloadDescriptor {
            offset: locator.offset,
            length: locator.length,
            md5: None,
            sha1: Some(*hash),
        })
    }

    fn info(&self, id: NodeId) -> NodeInfo {
        let node = self.arena.node(id);
        NodeInfo {
            kind: node.kind,
            executable: node.is_executable(),
            content: node.content,
        }
    }

    fn apply(&mut self, record: &RevisionRecord) -> Result<()> {
        let revision = record.revision;
        let mut root = match self.trees.last_key_value() {
            Some((&last, _)) if revision <= last => {
                return Err(Error::Format(format!("r{} follows r{}", revision, last)));
            }
            Some((_, &previous)) => self.arena.fork_root(previous, revision),
            None => {
                let empty = self.arena.create_root();
                self.arena.fork_root(empty, revision)
            }
        };

        for node in &record.nodes {
            tracing::debug!(
                "r{}: {} {} {}",
                revision,
                node.action.as_str(),
                node.kind.map_or("-", |k| k.as_str()),
                node.path
            );
            self.apply_node(&mut root, revision, node)
                .map_err(|e| replay_error(revision, &node.path, e))?;
            self.node_count += 1;
        }
        self.trees.insert(revision, root);

        self.update_branches(record)
    }

    fn apply_node(&mut self, root: &mut TreeRoot, revision: u64, node: &NodeChange) -> Result<()> {
        match (node.action, node.kind) {
            (NodeAction::Delete | NodeAction::Change, _) if node.copy_from.is_some() => {
                Err(unhandled(revision, node, "copy source on a node that is not added"))
            }
            (NodeAction::Add | NodeAction::Replace, None) => {
                Err(unhandled(revision, node, "missing node kind"))
            }
            (NodeAction::Add, Some(NodeKind::Dir)) => self.add_directory(root, revision, node),
            (NodeAction::Add, Some(NodeKind::File)) => self.add_file(root, revision, node, None),
            (NodeAction::Delete, _) => {
                let (parent, name) = split(revision, node)?;
                let parent = self.arena.resolve_for_write(root, parent)?;
                self.arena.remove_child(parent, name)?;
                Ok(())
            }
            (NodeAction::Change, _) => self.change(root, revision, node),
            (NodeAction::Replace, Some(NodeKind::Dir)) => {
                let (parent, name) = split(revision, node)?;
                let parent = self.arena.resolve_for_write(root, parent)?;
                self.arena.remove_child(parent, name)?;
                self.add_directory(root, revision, node)
            }
            (NodeAction::Replace, Some(NodeKind::File)) => {
                let (parent, name) = split(revision, node)?;
                let parent = self.arena.resolve_for_write(root, parent)?;
                let previous = self.arena.remove_child(parent, name)?;
                self.add_file(root, revision, node, Some(previous))
            }
        }
    }

    fn add_directory(&mut self, root: &mut TreeRoot, revision: u64, node: &NodeChange) -> Result<()> {
        let (parent, name) = split(revision, node)?;
        let dir = match self.copy_source(revision, node)? {
            Some(source) if self.arena.node(source).kind.is_dir() => {
                let copy = self.arena.clone_subtree(source, revision);
                self.arena.rename(copy, name);
                copy
            }
            Some(_) => return Err(unhandled(revision, node, "directory copied from a file")),
            None => self.arena.new_directory(name, revision),
        };
        let parent = self.arena.resolve_for_write(root, parent)?;
        self.arena.set_child(parent, dir)
    }

    /// Insert a file node. `previous` is the entry a replace removed; its
    /// content and mode carry over when the node brings neither.
    fn add_file(
        &mut self,
        root: &mut TreeRoot,
        revision: u64,
        node: &NodeChange,
        previous: Option<NodeId>,
    ) -> Result<()> {
        let (parent, name) = split(revision, node)?;
        let source = self.copy_source(revision, node)?;
        if source.is_some_and(|id| self.arena.node(id).kind.is_dir()) {
            return Err(unhandled(revision, node, "file copied from a directory"));
        }
        let inherited = source.or(previous.filter(|&id| self.arena.node(id).kind.is_file()));

        let content = match self.resolve_content(node, source)? {
            Some(hash) => Some(hash),
            None => inherited.and_then(|id| self.arena.node(id).content),
        };
        let executable = match &node.props {
            Some(props) => props.contains(svn_props::EXECUTABLE),
            None => inherited.is_some_and(|id| self.arena.node(id).is_executable()),
        };

        let file = self.arena.new_file(name, content, executable, revision);
        let parent = self.arena.resolve_for_write(root, parent)?;
        self.arena.set_child(parent, file)
    }

    fn change(&mut self, root: &mut TreeRoot, revision: u64, node: &NodeChange) -> Result<()> {
        let existing = self.arena.resolve(*root, &node.path)?;
        let is_dir = self.arena.node(existing).kind.is_dir();
        match node.kind {
            Some(NodeKind::File) if is_dir => {
                return Err(unhandled(revision, node, "file change on a directory"));
            }
            Some(NodeKind::Dir) if !is_dir => {
                return Err(unhandled(revision, node, "directory change on a file"));
            }
            _ => {}
        }
        if is_dir {
            // Property changes only; the shape is untouched.
            return Ok(());
        }

        let content = self.resolve_content(node, None)?;
        let id = self.arena.resolve_for_write(root, &node.path)?;
        if let Some(hash) = content {
            self.arena.set_content(id, Some(hash));
        }
        if let Some(props) = &node.props {
            self.arena.set_executable(id, props.contains(svn_props::EXECUTABLE));
        }
        Ok(())
    }

    /// Resolve a node's copy source in its revision's snapshot
    fn copy_source(&self, revision: u64, node: &NodeChange) -> Result<Option<NodeId>> {
        let Some(copy) = &node.copy_from else {
            return Ok(None);
        };
        if copy.revision >= revision {
            return Err(unhandled(revision, node, "copy source is not an earlier revision"));
        }
        let root = self.tree_at(copy.revision)?;
        self.arena.resolve(root, &copy.path).map(Some)
    }

    /// Content hash for a file node.
    ///
    /// Text carried by the node wins: its declared SHA-1, or the SHA-1
    /// computed by streaming it when none is declared. Without text, the
    /// `Text-copy-source-sha1` hint, then the copy source's own hash.
    /// Every hashed payload is recorded in the blob index.
    fn resolve_content(&mut self, node: &NodeChange, source: Option<NodeId>) -> Result<Option<ContentHash>> {
        if let Some(payload) = &node.payload {
            let hash = match payload.sha1 {
                Some(hash) => hash,
                None => {
                    tracing::warn!(
                        "{}: no Text-content-sha1 declared, hashing {} bytes at offset {}",
                        node.path,
                        payload.length,
                        payload.offset
                    );
                    self.reader.hash_payload(payload)?
                }
            };
            self.blobs.record(hash, payload.offset, payload.length);
            return Ok(Some(hash));
        }
        if let Some(hash) = node.copy_source_sha1 {
            return Ok(Some(hash));
        }
        Ok(source.and_then(|id| self.arena.node(id).content))
    }

    /// Branch lifecycle for one revision: activity on branches already
    /// live, then creations and deletions in node order, then activity on
    /// the branches this revision created.
    fn update_branches(&mut self, record: &RevisionRecord) -> Result<()> {
        let revision = record.revision;
        let touched: BTreeSet<String> = record
            .nodes
            .iter()
            .filter_map(|node| self.branches.find(&node.path, None))
            .map(|branch| branch.name().to_string())
            .collect();
        for name in &touched {
            self.branches
                .record_activity(name, record)
                .map_err(|e| replay_error(revision, name, e))?;
        }

        let mut created = Vec::new();
        for node in &record.nodes {
            let wrap = |e: Error| replay_error(revision, &node.path, e);
            if matches!(node.action, NodeAction::Delete | NodeAction::Replace) {
                for name in self.branches.live_within(&node.path) {
                    self.branches.delete_branch_at(&name, revision).map_err(wrap)?;
                }
            }
            let starts_branch = matches!(node.action, NodeAction::Add | NodeAction::Replace)
                && node.kind == Some(NodeKind::Dir)
                && self.branches.config().is_branch_root(&node.path);
            if starts_branch {
                self.branches.create_branch_for_node(node, revision).map_err(wrap)?;
                created.push(node.path.clone());
            }
        }

        for name in created {
            if self.branches.live(&name).is_some_and(|b| b.created() == revision) {
                self.branches
                    .record_activity(&name, record)
                    .map_err(|e| replay_error(revision, &name, e))?;
            }
        }
        Ok(())
    }
}

fn split(revision: u64, node: &NodeChange) -> Result<(&str, &str)> {
    if node.path.is_empty() {
        return Err(unhandled(revision, node, "change to the repository root"));
    }
    Ok(node.path.rsplit_once('/').unwrap_or(("", node.path.as_str())))
}

fn unhandled(revision: u64, node: &NodeChange, detail: &str) -> Error {
    Error::UnhandledCase {
        revision,
        path: node.path.clone(),
        action: node.action.as_str().to_string(),
        kind: node.kind.map_or("(no kind)", |k| k.as_str()).to_string(),
        copy_from: node
            .copy_from
            .as_ref()
            .map(|c| format!(" from {}@{}", c.path, c.revision))
            .unwrap_or_default(),
        detail: detail.to_string(),
    }
}

fn replay_error(revision: u64, path: &str, source: Error) -> Error {
    match source {
        Error::Replay { .. } => source,
        source => {
            tracing::error!("Replay of r{} failed at {}: {}", revision, path, source);
            Error::Replay {
                revision,
                path: path.to_string(),
                source: Box::new(source),
            }
        }
    }
}
