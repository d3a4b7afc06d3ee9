//! Content-addressed directory into the dump
//!
//! Maps a payload's SHA-1 to where its bytes live in the dump. Nothing is
//! stored but the location; the first location recorded for a hash wins.

use crate::error::{Error, Result};
use crate::object::ContentHash;
use serde::Serialize;
use std::collections::HashMap;

/// Where a blob's bytes live in the dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobLocator {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Default)]
pub struct BlobIndex {
    locators: HashMap<ContentHash, BlobLocator>,
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a location unless the hash is already known.
    /// Returns true if the entry was inserted.
    pub fn record(&mut self, hash: ContentHash, offset: u64, length: u64) -> bool {
        match self.locators.entry(hash) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(BlobLocator { offset, length });
                true
            }
        }
    }

    pub fn lookup(&self, hash: &ContentHash) -> Result<BlobLocator> {
        self.locators
            .get(hash)
            .copied()
            .ok_or(Error::UnknownBlob(*hash))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.locators.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}
