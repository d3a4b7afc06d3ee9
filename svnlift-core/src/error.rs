//! Error taxonomy for dump reading and history replay
//!
//! Every error is fatal for the run. The variants only exist so callers can
//! tell "the file is incomplete" apart from "the file is corrupt" apart from
//! "the model could not make sense of a node".

use crate::object::ContentHash;

/// Result type for svnlift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading a dump or replaying it
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported dump format: {0}")]
    Format(String),

    #[error("Parse error at byte {offset}: {message}")]
    Parse { offset: u64, message: String },

    #[error("Framing error at byte {offset}: {message}")]
    Framing { offset: u64, message: String },

    #[error("Truncated stream: {length} bytes declared at offset {offset}, stream ends at {end}")]
    TruncatedStream { offset: u64, length: u64, end: u64 },

    #[error("SHA1 mismatch for payload at offset {offset}: expected {expected}, got {actual}")]
    Integrity {
        offset: u64,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown blob: {0}")]
    UnknownBlob(ContentHash),

    #[error("Branch already exists: {0}")]
    AlreadyExists(String),

    #[error("Unhandled node change in r{revision}: {action} {kind} {path}{copy_from}: {detail}")]
    UnhandledCase {
        revision: u64,
        path: String,
        action: String,
        kind: String,
        copy_from: String,
        detail: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Replay of r{revision} failed at {path}: {source}")]
    Replay {
        revision: u64,
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(offset: u64, message: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn framing(offset: u64, message: impl Into<String>) -> Self {
        Error::Framing {
            offset,
            message: message.into(),
        }
    }

    /// True for errors caused by the dump ending early rather than by bad data
    pub fn is_truncation(&self) -> bool {
        match self {
            Error::TruncatedStream { .. } => true,
            Error::Replay { source, .. } => source.is_truncation(),
            _ => false,
        }
    }
}
