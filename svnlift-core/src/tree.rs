//! Versioned directory trees
//!
//! All nodes of all revisions live in one [`TreeArena`] and refer to their
//! children by [`NodeId`]. A [`TreeRoot`] is just a generation number plus
//! the id of its top directory, so forking a revision is O(1).
//!
//! Copy-on-write rule: a node may be mutated only by a root whose
//! generation equals the node's generation. [`TreeArena::resolve_for_write`]
//! clones every node on the path that belongs to an older generation and
//! relinks it into its (already cloned) parent. Everything off the path stays
//! shared with earlier revisions.

use crate::dump_format::normalize_path;
use crate::error::{Error, Result};
use crate::object::ContentHash;
use serde::Serialize;
use std::collections::BTreeMap;

/// Stable index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Tree entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Root,
    Directory,
    File,
    ExecutableFile,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Root | EntryKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }
}

/// A file or directory as of the generation that last wrote it
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub kind: EntryKind,
    pub name: String,
    /// Content hash (files only; `None` for files without known text)
    pub content: Option<ContentHash>,
    /// Revision that last wrote this node
    pub generation: u64,
    children: BTreeMap<String, NodeId>,
}

impl TreeNode {
    pub fn is_executable(&self) -> bool {
        self.kind == EntryKind::ExecutableFile
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }
}

/// Handle on one revision's tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot {
    generation: u64,
    top: NodeId,
}

impl TreeRoot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Top directory of this tree
    pub fn top(&self) -> NodeId {
        self.top
    }
}

/// Owner of every tree node across all revisions
#[derive(Debug, Default)]
pub struct TreeArena {
    nodes: Vec<TreeNode>,
}

impl TreeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes allocated so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    /// Empty tree at generation 0
    pub fn create_root(&mut self) -> TreeRoot {
        let top = self.alloc(TreeNode {
            kind: EntryKind::Root,
            name: String::new(),
            content: None,
            generation: 0,
            children: BTreeMap::new(),
        });
        TreeRoot { generation: 0, top }
    }

    /// New root at `generation` sharing every node with `root`
    pub fn fork_root(&self, root: TreeRoot, generation: u64) -> TreeRoot {
        debug_assert!(generation >= root.generation, "generations never decrease");
        TreeRoot {
            generation,
            top: root.top,
        }
    }

    /// Find the node at `path`; `""` is the top directory
    pub fn resolve(&self, root: TreeRoot, path: &str) -> Result<NodeId> {
        let path = normalize_path(path);
        let mut current = root.top;
        for segment in segments(&path) {
            current = self
                .node(current)
                .child(segment)
                .ok_or_else(|| not_found(&path, root.generation))?;
        }
        Ok(current)
    }

    /// Find the node at `path`, cloning it and its ancestors into the root's
    /// generation first where needed. The returned node is writable.
    pub fn resolve_for_write(&mut self, root: &mut TreeRoot, path: &str) -> Result<NodeId> {
        let path = normalize_path(path);
        let generation = root.generation;
        root.top = self.writable(root.top, generation);

        let mut current = root.top;
        for segment in segments(&path) {
            let child = self
                .node(current)
                .child(segment)
                .ok_or_else(|| not_found(&path, generation))?;
            let writable = self.writable(child, generation);
            if writable != child {
                self.nodes[current.0]
                    .children
                    .insert(segment.to_string(), writable);
            }
            current = writable;
        }
        Ok(current)
    }

    /// Attach `child` to `parent` under the child's own name, replacing any
    /// existing entry of that name
    pub fn set_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.expect_dir(parent)?;
        debug_assert!(
            self.node(child).generation >= self.node(parent).generation,
            "child older than its writable parent"
        );
        let name = self.node(child).name.clone();
        self.nodes[parent.0].children.insert(name, child);
        Ok(())
    }

    /// Detach the entry `name` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.expect_dir(parent)?;
        self.nodes[parent.0]
            .children
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("no entry {:?} in directory {:?}", name, self.node(parent).name)))
    }

    /// Children of a directory, ordered by name
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.node(node)
            .children
            .iter()
            .map(|(name, &id)| (name.as_str(), id))
    }

    pub fn new_directory(&mut self, name: impl Into<String>, generation: u64) -> NodeId {
        self.alloc(TreeNode {
            kind: EntryKind::Directory,
            name: name.into(),
            content: None,
            generation,
            children: BTreeMap::new(),
        })
    }

    pub fn new_file(
        &mut self,
        name: impl Into<String>,
        content: Option<ContentHash>,
        executable: bool,
        generation: u64,
    ) -> NodeId {
        self.alloc(TreeNode {
            kind: if executable {
                EntryKind::ExecutableFile
            } else {
                EntryKind::File
            },
            name: name.into(),
            content,
            generation,
            children: BTreeMap::new(),
        })
    }

    /// Deep copy of `node` and everything below it, tagged `generation`.
    /// A copied root becomes a plain directory.
    pub fn clone_subtree(&mut self, node: NodeId, generation: u64) -> NodeId {
        let source = self.node(node).clone();
        let children: Vec<(String, NodeId)> = source
            .children
            .iter()
            .map(|(name, &id)| (name.clone(), id))
            .collect();

        let mut copied = BTreeMap::new();
        for (name, id) in children {
            copied.insert(name, self.clone_subtree(id, generation));
        }

        self.alloc(TreeNode {
            kind: match source.kind {
                EntryKind::Root => EntryKind::Directory,
                other => other,
            },
            name: source.name,
            content: source.content,
            generation,
            children: copied,
        })
    }

    pub fn rename(&mut self, node: NodeId, name: impl Into<String>) {
        self.nodes[node.0].name = name.into();
    }

    pub fn set_content(&mut self, node: NodeId, content: Option<ContentHash>) {
        self.nodes[node.0].content = content;
    }

    pub fn set_executable(&mut self, node: NodeId, executable: bool) {
        let entry = &mut self.nodes[node.0];
        if entry.kind.is_file() {
            entry.kind = if executable {
                EntryKind::ExecutableFile
            } else {
                EntryKind::File
            };
        }
    }

    /// Every path below `node` (depth first, children in name order),
    /// relative to `node`
    pub fn walk(&self, node: NodeId) -> Vec<(String, NodeId)> {
        let mut out = Vec::new();
        let mut stack: Vec<(String, NodeId)> = self
            .children(node)
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        stack.reverse();
        while let Some((path, id)) = stack.pop() {
            let mut below: Vec<(String, NodeId)> = self
                .children(id)
                .map(|(name, child)| (format!("{}/{}", path, name), child))
                .collect();
            below.reverse();
            out.push((path, id));
            stack.extend(below);
        }
        out
    }

    fn alloc(&mut self, node: TreeNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// `id` itself if it already belongs to `generation`, else a shallow clone
    fn writable(&mut self, id: NodeId, generation: u64) -> NodeId {
        let node = self.node(id);
        if node.generation == generation {
            return id;
        }
        debug_assert!(node.generation < generation, "generations never decrease");
        let mut copy = node.clone();
        copy.generation = generation;
        self.alloc(copy)
    }

    fn expect_dir(&self, id: NodeId) -> Result<()> {
        let node = self.node(id);
        if node.kind.is_dir() {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{:?} is not a directory", node.name)))
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn not_found(path: &str, generation: u64) -> Error {
    Error::NotFound(format!("path {:?} in r{}", path, generation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkdir(arena: &mut TreeArena, root: &mut TreeRoot, parent: &str, name: &str) {
        let p = arena.resolve_for_write(root, parent).unwrap();
        let d = arena.new_directory(name, root.generation());
        arena.set_child(p, d).unwrap();
    }

    fn add_file(arena: &mut TreeArena, root: &mut TreeRoot, parent: &str, name: &str, data: &[u8]) {
        let p = arena.resolve_for_write(root, parent).unwrap();
        let f = arena.new_file(name, Some(ContentHash::from_data(data)), false, root.generation());
        arena.set_child(p, f).unwrap();
    }

    #[test]
    fn test_empty_root() {
        let mut arena = TreeArena::new();
        let root = arena.create_root();
        assert_eq!(root.generation(), 0);
        assert_eq!(arena.resolve(root, "").unwrap(), root.top());
        assert_eq!(arena.node(root.top()).kind, EntryKind::Root);
        assert!(matches!(arena.resolve(root, "trunk"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_fork_is_constant_time_and_shares() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        let before = arena.len();
        let r1 = arena.fork_root(r0, 1);
        assert_eq!(arena.len(), before);
        assert_eq!(arena.resolve(r1, "trunk").unwrap(), arena.resolve(r0, "trunk").unwrap());
    }

    #[test]
    fn test_copy_on_write_isolation() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        mkdir(&mut arena, &mut r0, "", "branches");
        add_file(&mut arena, &mut r0, "trunk", "a.txt", b"v1");

        let mut r1 = arena.fork_root(r0, 1);
        let a = arena.resolve_for_write(&mut r1, "trunk/a.txt").unwrap();
        arena.set_content(a, Some(ContentHash::from_data(b"v2")));

        let old = arena.resolve(r0, "trunk/a.txt").unwrap();
        assert_eq!(arena.node(old).content, Some(ContentHash::from_data(b"v1")));
        assert_eq!(arena.node(old).generation, 0);
        assert_eq!(arena.node(a).content, Some(ContentHash::from_data(b"v2")));
        assert_eq!(arena.node(a).generation, 1);

        // Off-path subtrees stay shared.
        assert_eq!(arena.resolve(r0, "branches").unwrap(), arena.resolve(r1, "branches").unwrap());
        assert_ne!(arena.resolve(r0, "trunk").unwrap(), arena.resolve(r1, "trunk").unwrap());
        assert_ne!(r0.top(), r1.top());
    }

    #[test]
    fn test_write_in_same_generation_mutates_in_place() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        let first = arena.resolve_for_write(&mut r0, "trunk").unwrap();
        let again = arena.resolve_for_write(&mut r0, "trunk").unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_remove_child() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        let mut r1 = arena.fork_root(r0, 1);
        let top = arena.resolve_for_write(&mut r1, "").unwrap();
        arena.remove_child(top, "trunk").unwrap();
        assert!(arena.resolve(r1, "trunk").is_err());
        assert!(arena.resolve(r0, "trunk").is_ok());
        assert!(matches!(arena.remove_child(top, "trunk"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_child_under_file_fails() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        add_file(&mut arena, &mut r0, "", "f", b"x");
        let f = arena.resolve_for_write(&mut r0, "f").unwrap();
        let d = arena.new_directory("d", 0);
        assert!(arena.set_child(f, d).is_err());
    }

    #[test]
    fn test_clone_subtree_is_deep() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        mkdir(&mut arena, &mut r0, "trunk", "src");
        add_file(&mut arena, &mut r0, "trunk/src", "main.c", b"int main;");

        let src = arena.resolve(r0, "trunk").unwrap();
        let copy = arena.clone_subtree(src, 3);
        arena.rename(copy, "dev");

        let mut r3 = arena.fork_root(r0, 3);
        let top = arena.resolve_for_write(&mut r3, "").unwrap();
        arena.set_child(top, copy).unwrap();

        let copied_file = arena.resolve(r3, "dev/src/main.c").unwrap();
        let orig_file = arena.resolve(r3, "trunk/src/main.c").unwrap();
        assert_ne!(copied_file, orig_file);
        assert_eq!(arena.node(copied_file).content, arena.node(orig_file).content);
        assert_eq!(arena.node(copied_file).generation, 3);
    }

    #[test]
    fn test_clone_of_root_becomes_directory() {
        let mut arena = TreeArena::new();
        let root = arena.create_root();
        let copy = arena.clone_subtree(root.top(), 1);
        assert_eq!(arena.node(copy).kind, EntryKind::Directory);
    }

    #[test]
    fn test_walk_lists_paths_in_order() {
        let mut arena = TreeArena::new();
        let mut r0 = arena.create_root();
        mkdir(&mut arena, &mut r0, "", "trunk");
        mkdir(&mut arena, &mut r0, "", "branches");
        add_file(&mut arena, &mut r0, "trunk", "b.txt", b"b");
        add_file(&mut arena, &mut r0, "trunk", "a.txt", b"a");
        let paths: Vec<String> = arena.walk(r0.top()).into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["branches", "trunk", "trunk/a.txt", "trunk/b.txt"]);
    }

    #[test]
    fn test_executable_toggle_ignores_directories() {
        let mut arena = TreeArena::new();
        let d = arena.new_directory("d", 0);
        arena.set_executable(d, true);
        assert_eq!(arena.node(d).kind, EntryKind::Directory);
        let f = arena.new_file("f", None, false, 0);
        arena.set_executable(f, true);
        assert!(arena.node(f).is_executable());
    }
}
