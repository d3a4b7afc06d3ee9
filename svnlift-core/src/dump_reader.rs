//! SVN dump file reader
//!
//! Walks a version 2 dump revision by revision. Node text is never loaded
//! while scanning; each node records where its payload lives so it can be
//! read (or streamed) later with [`DumpReader::read_payload`].
//!
//! The reader owns a single cursor over the stream. Every operation seeks
//! to the position it needs before touching the stream, and payload reads
//! put the cursor back where they found it, so scanning and payload
//! retrieval can be interleaved freely.

use crate::dump_format::{
    normalize_path, CopySource, DumpPreamble, NodeAction, NodeChange, NodeKind,
    PayloadDescriptor, RevisionRecord, SUPPORTED_FORMAT_VERSION,
};
use crate::error::{Error, Result};
use crate::object::{ContentHash, ContentHasher};
use crate::properties::PropertySet;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Chunk size used when copying payloads
const COPY_CHUNK: usize = 8192;

/// Whether a payload read checks the declared SHA-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Hash while reading and fail with [`Error::Integrity`] on mismatch
    Verify,
    /// Copy bytes without hashing
    Trust,
}

/// One `key: value` header block; keys are lower-cased
#[derive(Debug, Default)]
struct HeaderBlock {
    start: u64,
    fields: HashMap<String, String>,
}

impl HeaderBlock {
    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::parse(self.start, format!("missing {} header", key)))
    }

    fn number(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    Error::parse(self.start, format!("{} is not a number: {:?}", key, v))
                })
            })
            .transpose()
    }

    fn require_number(&self, key: &str) -> Result<u64> {
        self.number(key)?
            .ok_or_else(|| Error::parse(self.start, format!("missing {} header", key)))
    }

    fn hash(&self, key: &str) -> Result<Option<ContentHash>> {
        self.get(key)
            .map(|v| {
                ContentHash::from_hex(v).map_err(|_| {
                    Error::parse(self.start, format!("{} is not a SHA1: {:?}", key, v))
                })
            })
            .transpose()
    }
}

/// Streaming reader over a dump file
#[derive(Debug)]
pub struct DumpReader<R> {
    stream: BufReader<R>,
    /// Position of `stream`, kept in step with every read and seek
    pos: u64,
    /// Total stream length
    end: u64,
    preamble: DumpPreamble,
    /// Offset of the first revision record
    first_record: u64,
    /// Where `advance` resumes
    next_offset: u64,
    /// Revision -> offset of its header, filled as revisions are visited
    revision_offsets: BTreeMap<u64, u64>,
}

impl DumpReader<File> {
    /// Open a dump file on disk
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<R: Read + Seek> DumpReader<R> {
    /// Wrap a stream and read its preamble.
    ///
    /// Fails with [`Error::Format`] unless the stream starts with a
    /// version 2 header followed by a UUID header.
    pub fn new(mut inner: R) -> Result<Self> {
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        let mut reader = Self {
            stream: BufReader::new(inner),
            pos: 0,
            end,
            preamble: DumpPreamble {
                format_version: String::new(),
                uuid: String::new(),
            },
            first_record: 0,
            next_offset: 0,
            revision_offsets: BTreeMap::new(),
        };
        reader.preamble = reader.read_preamble()?;
        reader.first_record = reader.pos;
        reader.next_offset = reader.pos;

        tracing::info!(
            "Opened dump: format {}, uuid {}, {} bytes",
            reader.preamble.format_version,
            reader.preamble.uuid,
            end
        );
        Ok(reader)
    }

    fn read_preamble(&mut self) -> Result<DumpPreamble> {
        let block = self.read_header_block().map_err(into_format_error)?;
        let format_version = block
            .get("svn-fs-dump-format-version")
            .ok_or_else(|| Error::Format("expected SVN-fs-dump-format-version header".into()))?
            .to_string();
        if format_version != SUPPORTED_FORMAT_VERSION {
            return Err(Error::Format(format!(
                "only version {} is supported, got {}",
                SUPPORTED_FORMAT_VERSION, format_version
            )));
        }

        let block = self.read_header_block().map_err(into_format_error)?;
        let uuid = block
            .get("uuid")
            .ok_or_else(|| Error::Format("expected UUID header".into()))?
            .to_string();

        Ok(DumpPreamble {
            format_version,
            uuid,
        })
    }

    pub fn preamble(&self) -> &DumpPreamble {
        &self.preamble
    }

    /// Length of the underlying stream in bytes
    pub fn stream_len(&self) -> u64 {
        self.end
    }

    /// Offset of a revision header, if that revision has been visited
    pub fn revision_offset(&self, revision: u64) -> Option<u64> {
        self.revision_offsets.get(&revision).copied()
    }

    /// Read the next revision, or `None` at end of stream
    pub fn advance(&mut self) -> Result<Option<RevisionRecord>> {
        self.seek_to(self.next_offset)?;
        if !self.skip_blank_lines()? {
            return Ok(None);
        }

        let record_start = self.pos;
        let header = self.read_header_block()?;
        if header.is_empty() {
            self.next_offset = self.pos;
            return Ok(None);
        }
        if !header.contains("revision-number") {
            return Err(Error::parse(record_start, "expected Revision-number header"));
        }
        let revision = header.require_number("revision-number")?;
        self.revision_offsets.entry(revision).or_insert(record_start);

        let prop_len = header.require_number("prop-content-length")?;
        if let Some(content_len) = header.number("content-length")? {
            if content_len != prop_len {
                return Err(Error::framing(
                    record_start,
                    format!(
                        "r{}: Content-length {} does not equal Prop-content-length {}",
                        revision, content_len, prop_len
                    ),
                ));
            }
        }
        let props = self.read_props(prop_len)?;

        let mut line = Vec::new();
        let line_start = self.pos;
        if self.read_line(&mut line)? > 0 && !is_blank(&line) {
            return Err(Error::parse(
                line_start,
                format!("expected a blank line after r{} properties", revision),
            ));
        }

        let mut record = RevisionRecord {
            revision,
            props,
            nodes: Vec::new(),
        };

        // One header block of lookahead: a new revision ends this one.
        while self.skip_blank_lines()? {
            let lookahead = self.pos;
            let header = self.read_header_block()?;
            if header.is_empty() {
                break;
            }
            if header.contains("revision-number") {
                self.seek_to(lookahead)?;
                break;
            }
            let node = self.read_node(&header)?;
            record.nodes.push(node);
        }

        self.next_offset = self.pos;
        tracing::debug!("Read r{} with {} nodes", revision, record.nodes.len());
        Ok(Some(record))
    }

    /// Re-enter the stream at `revision` and return its record.
    ///
    /// A visited revision is reached directly through its cached offset;
    /// otherwise the stream is scanned forward from the nearest visited
    /// revision below it. `advance` continues after `revision`.
    pub fn seek_to_revision(&mut self, revision: u64) -> Result<RevisionRecord> {
        if let Some(offset) = self.revision_offset(revision) {
            self.next_offset = offset;
            return self
                .advance()?
                .ok_or_else(|| Error::NotFound(format!("revision {}", revision)));
        }

        self.next_offset = self
            .revision_offsets
            .range(..revision)
            .next_back()
            .map(|(_, &offset)| offset)
            .unwrap_or(self.first_record);
        while let Some(record) = self.advance()? {
            if record.revision == revision {
                return Ok(record);
            }
            if record.revision > revision {
                break;
            }
        }
        Err(Error::NotFound(format!("revision {}", revision)))
    }

    /// Read a revision without moving the forward scan position
    pub fn revision(&mut self, revision: u64) -> Result<RevisionRecord> {
        let saved = self.next_offset;
        let result = self.seek_to_revision(revision);
        self.next_offset = saved;
        result
    }

    /// Start the forward scan again from the first revision
    pub fn rewind(&mut self) {
        self.next_offset = self.first_record;
    }

    /// Iterate over the remaining revisions
    pub fn revisions(&mut self) -> Revisions<'_, R> {
        Revisions { reader: self }
    }

    /// Read a payload into memory
    pub fn read_payload(
        &mut self,
        payload: &PayloadDescriptor,
        verification: Verification,
    ) -> Result<Bytes> {
        self.check_available(payload.offset, payload.length)?;
        let mut buf = Vec::with_capacity((payload.length as usize).min(COPY_CHUNK));
        self.stream_payload(payload, &mut buf, verification)?;
        Ok(Bytes::from(buf))
    }

    /// Copy a payload into `sink`, returning the number of bytes written.
    ///
    /// With [`Verification::Verify`] the bytes are hashed as they pass; on a
    /// mismatch the sink has already received the data and
    /// [`Error::Integrity`] is returned.
    pub fn stream_payload<W: Write + ?Sized>(
        &mut self,
        payload: &PayloadDescriptor,
        sink: &mut W,
        verification: Verification,
    ) -> Result<u64> {
        let hash = verification == Verification::Verify;
        let actual = self.copy_payload_restoring(payload, sink, hash)?;

        if let Some(actual) = actual {
            match payload.sha1 {
                Some(expected) if expected != actual => {
                    return Err(Error::Integrity {
                        offset: payload.offset,
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
                None => tracing::warn!(
                    "Payload at offset {} declares no SHA1; verification skipped",
                    payload.offset
                ),
            }
        }
        Ok(payload.length)
    }

    /// Compute the SHA-1 of a payload without buffering it
    pub fn hash_payload(&mut self, payload: &PayloadDescriptor) -> Result<ContentHash> {
        let hash = self.copy_payload_restoring(payload, &mut io::sink(), true)?;
        hash.ok_or_else(|| Error::NotFound(format!("hash of payload at {}", payload.offset)))
    }

    fn copy_payload_restoring<W: Write + ?Sized>(
        &mut self,
        payload: &PayloadDescriptor,
        sink: &mut W,
        hash: bool,
    ) -> Result<Option<ContentHash>> {
        let saved = self.pos;
        let result = self.copy_payload(payload, sink, hash);
        let restored = self.seek_to(saved);
        let hash = result?;
        restored?;
        Ok(hash)
    }

    fn copy_payload<W: Write + ?Sized>(
        &mut self,
        payload: &PayloadDescriptor,
        sink: &mut W,
        hash: bool,
    ) -> Result<Option<ContentHash>> {
        self.check_available(payload.offset, payload.length)?;
        self.seek_to(payload.offset)?;

        let mut hasher = hash.then(ContentHasher::new);
        let mut chunk = vec![0u8; COPY_CHUNK.min(payload.length as usize)];
        let mut remaining = payload.length;
        while remaining > 0 {
            let want = (remaining as usize).min(COPY_CHUNK);
            let n = self.stream.read(&mut chunk[..want])?;
            if n == 0 {
                return Err(Error::TruncatedStream {
                    offset: payload.offset,
                    length: payload.length,
                    end: self.pos,
                });
            }
            self.pos += n as u64;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk[..n]);
            }
            sink.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        Ok(hasher.map(ContentHasher::finish))
    }

    fn read_node(&mut self, header: &HeaderBlock) -> Result<NodeChange> {
        let at = header.start;
        if header.get("text-delta") == Some("true") || header.get("prop-delta") == Some("true") {
            return Err(Error::Format(format!(
                "delta-encoded node at byte {} (format 3 feature)",
                at
            )));
        }

        let path = normalize_path(header.require("node-path")?);
        let kind = header
            .get("node-kind")
            .map(|v| {
                NodeKind::parse(v)
                    .ok_or_else(|| Error::parse(at, format!("unknown Node-kind {:?}", v)))
            })
            .transpose()?;
        let action_str = header.require("node-action")?;
        let action = NodeAction::parse(action_str)
            .ok_or_else(|| Error::parse(at, format!("unknown Node-action {:?}", action_str)))?;

        let copy_from = match (header.number("node-copyfrom-rev")?, header.get("node-copyfrom-path")) {
            (Some(revision), Some(from)) => Some(CopySource {
                path: normalize_path(from),
                revision,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::parse(
                    at,
                    format!("{}: Node-copyfrom-rev and Node-copyfrom-path must appear together", path),
                ));
            }
        };

        let prop_len = header.number("prop-content-length")?;
        let text_len = header.number("text-content-length")?;
        if let Some(content_len) = header.number("content-length")? {
            let expected = prop_len.unwrap_or(0) + text_len.unwrap_or(0);
            if content_len != expected {
                return Err(Error::framing(
                    at,
                    format!(
                        "{}: Content-length {} does not equal property length {} plus text length {}",
                        path,
                        content_len,
                        prop_len.unwrap_or(0),
                        text_len.unwrap_or(0)
                    ),
                ));
            }
        }

        let props = prop_len.map(|len| self.read_props(len)).transpose()?;
        let payload = match text_len {
            Some(length) => {
                let offset = self.pos;
                self.skip(length)?;
                Some(PayloadDescriptor {
                    offset,
                    length,
                    md5: header.get("text-content-md5").map(str::to_string),
                    sha1: header.hash("text-content-sha1")?,
                })
            }
            None => None,
        };

        Ok(NodeChange {
            path,
            kind,
            action,
            copy_from,
            props,
            payload,
            copy_source_sha1: header.hash("text-copy-source-sha1")?,
        })
    }

    fn read_props(&mut self, len: u64) -> Result<PropertySet> {
        let start = self.pos;
        let data = self.read_bytes(len)?;
        PropertySet::parse(&data, start)
    }

    /// Read header lines up to (and including) the terminating blank line.
    /// End of stream also terminates the block.
    fn read_header_block(&mut self) -> Result<HeaderBlock> {
        let mut block = HeaderBlock {
            start: self.pos,
            fields: HashMap::new(),
        };
        let mut line = Vec::new();
        loop {
            let line_start = self.pos;
            if self.read_line(&mut line)? == 0 {
                break;
            }
            let text = std::str::from_utf8(&line)
                .map_err(|_| Error::parse(line_start, "header line is not UTF-8"))?
                .trim_end();
            if text.is_empty() {
                break;
            }
            let (key, value) = parse_header_line(text).ok_or_else(|| {
                Error::parse(line_start, format!("unexpected header line {:?}", text))
            })?;
            block.fields.insert(key.to_ascii_lowercase(), value.to_string());
        }
        Ok(block)
    }

    /// Skip blank lines, leaving the cursor on the next non-blank line.
    /// Returns false if the stream ended first.
    fn skip_blank_lines(&mut self) -> Result<bool> {
        let mut line = Vec::new();
        loop {
            let start = self.pos;
            if self.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            if !is_blank(&line) {
                self.seek_to(start)?;
                return Ok(true);
            }
        }
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        buf.clear();
        let n = self.stream.read_until(b'\n', buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        self.check_available(self.pos, len)?;
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf)?;
        self.pos += len;
        Ok(buf)
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        self.check_available(self.pos, len)?;
        self.seek_to(self.pos + len)
    }

    fn check_available(&self, offset: u64, length: u64) -> Result<()> {
        match offset.checked_add(length) {
            Some(stop) if stop <= self.end => Ok(()),
            _ => Err(Error::TruncatedStream {
                offset,
                length,
                end: self.end,
            }),
        }
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.pos {
            // Relative seeks keep the buffer when the target is inside it.
            let delta = offset as i64 - self.pos as i64;
            self.stream.seek_relative(delta)?;
            self.pos = offset;
        }
        Ok(())
    }
}

/// Iterator over the remaining revisions of a [`DumpReader`]
pub struct Revisions<'a, R> {
    reader: &'a mut DumpReader<R>,
}

impl<R: Read + Seek> Iterator for Revisions<'_, R> {
    type Item = Result<RevisionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.advance().transpose()
    }
}

fn into_format_error(err: Error) -> Error {
    match err {
        Error::Parse { offset, message } => {
            Error::Format(format!("bad preamble at byte {}: {}", offset, message))
        }
        other => other,
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Split `Key: value`. Keys contain no whitespace.
fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}
