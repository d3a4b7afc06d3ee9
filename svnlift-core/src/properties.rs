//! SVN Properties
//!
//! Property sets for revisions and nodes, plus the binary-safe `K`/`V`
//! property block codec used inside dump files.

use crate::error::{Error, Result};
use bytes::Bytes;

/// Property value. Values are arbitrary bytes; most are UTF-8.
pub type PropertyValue = Bytes;

/// Terminator line of a property block
pub const PROPS_END: &[u8] = b"PROPS-END";

/// Ordered property set, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertySet {
    /// Create a new empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Get a property value if it is valid UTF-8
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Set a property value, keeping the position of an existing key
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// List all property names
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Check if property exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a property block.
    ///
    /// `base` is the stream offset of `data[0]`, used only for error
    /// positions. Values are sliced by their declared length, never by
    /// line, so they may contain newlines or arbitrary bytes.
    pub fn parse(data: &[u8], base: u64) -> Result<Self> {
        let mut props = PropertySet::new();
        if data.is_empty() {
            return Ok(props);
        }

        let mut pending_key: Option<String> = None;
        let mut i = 0usize;
        loop {
            let at = base + i as u64;
            let eol = match data[i..].iter().position(|&b| b == b'\n') {
                Some(rel) => i + rel,
                None => return Err(Error::framing(at, "property block missing PROPS-END")),
            };
            let line = &data[i..eol];
            if line == PROPS_END {
                if pending_key.is_some() {
                    return Err(Error::parse(at, "property key without value"));
                }
                return Ok(props);
            }

            let (tag, len) = parse_length_line(line).ok_or_else(|| {
                Error::parse(
                    at,
                    format!("unexpected property line {:?}", String::from_utf8_lossy(line)),
                )
            })?;

            let start = eol + 1;
            let end = start
                .checked_add(len)
                .filter(|&end| end < data.len())
                .ok_or_else(|| {
                    Error::framing(at, format!("property {} length {} overruns block", tag as char, len))
                })?;
            if data[end] != b'\n' {
                return Err(Error::parse(
                    base + end as u64,
                    "property data not followed by newline",
                ));
            }
            let payload = &data[start..end];

            match (tag, pending_key.take()) {
                (b'K', None) => {
                    let key = std::str::from_utf8(payload)
                        .map_err(|_| Error::parse(at, "property name is not UTF-8"))?;
                    pending_key = Some(key.to_string());
                }
                (b'V', Some(key)) => props.set(key, Bytes::copy_from_slice(payload)),
                (b'K', Some(_)) => return Err(Error::parse(at, "two property keys in a row")),
                _ => return Err(Error::parse(at, "property value without key")),
            }

            i = end + 1;
        }
    }

    /// Encode as a property block, including the `PROPS-END` line
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in &self.entries {
            out.extend_from_slice(format!("K {}\n", k.len()).as_bytes());
            out.extend_from_slice(k.as_bytes());
            out.push(b'\n');
            out.extend_from_slice(format!("V {}\n", v.len()).as_bytes());
            out.extend_from_slice(v);
            out.push(b'\n');
        }
        out.extend_from_slice(PROPS_END);
        out.push(b'\n');
        out
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = PropertySet::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Parse `K <len>` / `V <len>` (trailing whitespace tolerated)
fn parse_length_line(line: &[u8]) -> Option<(u8, usize)> {
    let (&tag, rest) = line.split_first()?;
    if tag != b'K' && tag != b'V' {
        return None;
    }
    let rest = std::str::from_utf8(rest).ok()?;
    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    let len = rest.trim().parse().ok()?;
    Some((tag, len))
}

/// SVN standard properties
pub mod svn_props {
    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// Revision author
    pub const AUTHOR: &str = "svn:author";

    /// Revision date (RFC 3339)
    pub const DATE: &str = "svn:date";

    /// Revision log message
    pub const LOG: &str = "svn:log";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_set_basic_operations() {
        let mut prop_set = PropertySet::new();

        assert!(prop_set.get("test").is_none());
        assert!(!prop_set.contains("test"));

        prop_set.set("test", "value");
        assert_eq!(prop_set.get_str("test"), Some("value"));
        assert!(prop_set.contains("test"));

        let removed = prop_set.remove("test");
        assert_eq!(removed, Some(Bytes::from("value")));
        assert!(!prop_set.contains("test"));
    }

    #[test]
    fn test_property_overwrite_keeps_order() {
        let mut props = PropertySet::new();
        props.set("b", "1");
        props.set("a", "2");
        props.set("b", "3");
        assert_eq!(props.list(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(props.get_str("b"), Some("3"));
    }

    #[test]
    fn test_parse_revision_props() {
        let block = b"K 7\nsvn:log\nV 4\ntest\nK 10\nsvn:author\nV 4\nuser\nPROPS-END\n";
        let props = PropertySet::parse(block, 0).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get_str(svn_props::LOG), Some("test"));
        assert_eq!(props.get_str(svn_props::AUTHOR), Some("user"));
    }

    #[test]
    fn test_parse_value_with_newlines_and_binary() {
        let mut props = PropertySet::new();
        props.set("svn:log", "line one\nline two\n\nPROPS-END\n");
        props.set("blob", Bytes::from_static(&[0u8, 10, 255, 10]));
        let encoded = props.encode();
        let parsed = PropertySet::parse(&encoded, 0).unwrap();
        assert_eq!(parsed, props);
    }

    #[test]
    fn test_parse_empty_block() {
        assert!(PropertySet::parse(b"", 0).unwrap().is_empty());
        assert!(PropertySet::parse(b"PROPS-END\n", 0).unwrap().is_empty());
    }

    #[test]
    fn test_parse_missing_terminator() {
        let err = PropertySet::parse(b"K 1\na\nV 1\nb\n", 100).unwrap_err();
        assert!(matches!(err, Error::Framing { .. }));
    }

    #[test]
    fn test_parse_length_overrun() {
        let err = PropertySet::parse(b"K 50\nabc\nPROPS-END\n", 0).unwrap_err();
        assert!(matches!(err, Error::Framing { .. }));
    }

    #[test]
    fn test_parse_garbage_line() {
        let err = PropertySet::parse(b"X 1\na\nPROPS-END\n", 7).unwrap_err();
        match err {
            Error::Parse { offset, .. } => assert_eq!(offset, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_value_without_key() {
        let err = PropertySet::parse(b"V 1\na\nPROPS-END\n", 0).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_empty_property_value() {
        let mut prop_set = PropertySet::new();
        prop_set.set("empty", "");
        assert_eq!(prop_set.get_str("empty"), Some(""));
        let parsed = PropertySet::parse(&prop_set.encode(), 0).unwrap();
        assert_eq!(parsed.get_str("empty"), Some(""));
    }
}
