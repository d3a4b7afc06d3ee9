//! Version 2 dump emitter
//!
//! Writes revisions and nodes in the layout `svnadmin dump` produces:
//! header block, property block, text, then the blank-line separators.
//! Content lengths and `Text-content-sha1` are computed here.

use crate::dump_format::{CopySource, NodeAction, NodeKind, SUPPORTED_FORMAT_VERSION};
use crate::object::ContentHash;
use crate::properties::PropertySet;
use bytes::Bytes;
use std::io::{self, Write};

/// A node as it should appear in the output dump
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub path: String,
    pub kind: Option<NodeKind>,
    pub action: NodeAction,
    pub copy_from: Option<CopySource>,
    pub props: Option<PropertySet>,
    pub text: Option<Bytes>,
    pub text_copy_source_sha1: Option<ContentHash>,
}

impl NodeRecord {
    pub fn new(path: impl Into<String>, kind: Option<NodeKind>, action: NodeAction) -> Self {
        Self {
            path: path.into(),
            kind,
            action,
            copy_from: None,
            props: None,
            text: None,
            text_copy_source_sha1: None,
        }
    }

    pub fn dir(path: impl Into<String>, action: NodeAction) -> Self {
        Self::new(path, Some(NodeKind::Dir), action)
    }

    pub fn file(path: impl Into<String>, action: NodeAction) -> Self {
        Self::new(path, Some(NodeKind::File), action)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(path, None, NodeAction::Delete)
    }

    pub fn with_copy_from(mut self, path: impl Into<String>, revision: u64) -> Self {
        self.copy_from = Some(CopySource {
            path: path.into(),
            revision,
        });
        self
    }

    pub fn with_props(mut self, props: PropertySet) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_text(mut self, text: impl Into<Bytes>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_copy_source_sha1(mut self, hash: ContentHash) -> Self {
        self.text_copy_source_sha1 = Some(hash);
        self
    }
}

/// Streams a version 2 dump to `out`
pub struct DumpWriter<W: Write> {
    out: W,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_preamble(&mut self, uuid: &str) -> io::Result<()> {
        writeln!(self.out, "SVN-fs-dump-format-version: {}", SUPPORTED_FORMAT_VERSION)?;
        writeln!(self.out)?;
        writeln!(self.out, "UUID: {}", uuid)?;
        writeln!(self.out)
    }

    pub fn write_revision(&mut self, revision: u64, props: &PropertySet) -> io::Result<()> {
        let block = props.encode();
        writeln!(self.out, "Revision-number: {}", revision)?;
        writeln!(self.out, "Prop-content-length: {}", block.len())?;
        writeln!(self.out, "Content-length: {}", block.len())?;
        writeln!(self.out)?;
        self.out.write_all(&block)?;
        writeln!(self.out)
    }

    pub fn write_node(&mut self, node: &NodeRecord) -> io::Result<()> {
        let props = node.props.as_ref().map(PropertySet::encode);

        writeln!(self.out, "Node-path: {}", node.path)?;
        if let Some(kind) = node.kind {
            writeln!(self.out, "Node-kind: {}", kind.as_str())?;
        }
        writeln!(self.out, "Node-action: {}", node.action.as_str())?;
        if let Some(copy) = &node.copy_from {
            writeln!(self.out, "Node-copyfrom-rev: {}", copy.revision)?;
            writeln!(self.out, "Node-copyfrom-path: {}", copy.path)?;
        }
        if let Some(hash) = node.text_copy_source_sha1 {
            writeln!(self.out, "Text-copy-source-sha1: {}", hash)?;
        }
        if let Some(block) = &props {
            writeln!(self.out, "Prop-content-length: {}", block.len())?;
        }
        if let Some(text) = &node.text {
            writeln!(self.out, "Text-content-length: {}", text.len())?;
            writeln!(self.out, "Text-content-sha1: {}", ContentHash::from_data(text))?;
        }
        let content_len = props.as_ref().map_or(0, Vec::len) + node.text.as_ref().map_or(0, Bytes::len);
        if props.is_some() || node.text.is_some() {
            writeln!(self.out, "Content-length: {}", content_len)?;
        }
        writeln!(self.out)?;

        if let Some(block) = &props {
            self.out.write_all(block)?;
        }
        if let Some(text) = &node.text {
            self.out.write_all(text)?;
        }
        writeln!(self.out)?;
        writeln!(self.out)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::svn_props;

    #[test]
    fn test_revision_layout() {
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_preamble("test-uuid-1234").unwrap();
        let props: PropertySet = [(svn_props::LOG, "test"), (svn_props::AUTHOR, "user")]
            .into_iter()
            .collect();
        writer.write_revision(1, &props).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();

        assert!(text.starts_with("SVN-fs-dump-format-version: 2\n\nUUID: test-uuid-1234\n\n"));
        assert!(text.contains("Revision-number: 1\nProp-content-length: 56\nContent-length: 56\n\n"));
        assert!(text.ends_with("PROPS-END\n\n"));
    }

    #[test]
    fn test_file_node_lengths() {
        let mut writer = DumpWriter::new(Vec::new());
        writer
            .write_node(
                &NodeRecord::file("hello.txt", NodeAction::Add)
                    .with_props(PropertySet::new())
                    .with_text(&b"hello"[..]),
            )
            .unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();

        assert!(text.contains("Prop-content-length: 10\n"));
        assert!(text.contains("Text-content-length: 5\n"));
        assert!(text.contains("Text-content-sha1: aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d\n"));
        assert!(text.contains("Content-length: 15\n\nPROPS-END\nhello\n\n"));
    }

    #[test]
    fn test_delete_node_has_no_lengths() {
        let mut writer = DumpWriter::new(Vec::new());
        writer.write_node(&NodeRecord::delete("trunk/old")).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "Node-path: trunk/old\nNode-action: delete\n\n\n\n");
    }
}
