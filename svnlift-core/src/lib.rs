//! svnlift core library
//!
//! Reconstructs the history recorded in a Subversion dump file:
//! - Streaming dump reader with lazy, offset-addressed payloads
//! - Copy-on-write directory snapshots for every revision
//! - Content-addressed blob index into the dump
//! - Branch and tag lifecycle tracking
//! - Replay orchestration tying the above together

pub mod blob_index;
pub mod branch;
pub mod dump_format;
pub mod dump_reader;
pub mod dump_writer;
pub mod error;
pub mod object;
pub mod properties;
pub mod repository;
pub mod tree;

pub use blob_index::{BlobIndex, BlobLocator};
pub use branch::{Branch, BranchConfig, BranchTracker, RewriteRule};
pub use dump_format::{
    CopySource, DumpPreamble, NodeAction, NodeChange, NodeKind, PayloadDescriptor, RevisionRecord,
};
pub use dump_reader::{DumpReader, Verification};
pub use dump_writer::{DumpWriter, NodeRecord};
pub use error::{Error, Result};
pub use object::ContentHash;
pub use properties::{svn_props, PropertySet, PropertyValue};
pub use repository::{NodeInfo, Repository};
pub use tree::{EntryKind, NodeId, TreeArena, TreeNode, TreeRoot};
