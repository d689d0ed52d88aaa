//! RFC 6901 structural pointers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One pointer segment: an object property or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn escaped(&self) -> String {
        match self {
            Segment::Key(k) => k.replace('~', "~0").replace('/', "~1"),
            Segment::Index(i) => i.to_string(),
        }
    }

    fn unescape(raw: &str) -> Segment {
        // All-digit segments are array indices; `~1`/`~0` are decoded in
        // that order per RFC 6901.
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = raw.parse::<usize>() {
                return Segment::Index(i);
            }
        }
        Segment::Key(raw.replace("~1", "/").replace("~0", "~"))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.escaped())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PointerParseError {
    #[error("structural pointer must start with '/': {0}")]
    MissingLeadingSlash(String),
}

/// A canonical structural pointer into the raw document tree.
///
/// Displays in RFC 6901 form (`/entry/0/resource/gender`). The empty pointer
/// (`""`) addresses the document root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StructuralPointer {
    segments: Vec<Segment>,
}

impl StructuralPointer {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn parse(raw: &str) -> Result<Self, PointerParseError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PointerParseError::MissingLeadingSlash(raw.to_string()));
        };
        let segments = rest.split('/').map(Segment::unescape).collect();
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Pointer to the parent node, or `None` for the root.
    pub fn parent(&self) -> Option<StructuralPointer> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Entry index if this pointer addresses something under `/entry/{i}`.
    pub fn entry_index(&self) -> Option<usize> {
        match self.segments.as_slice() {
            [Segment::Key(k), Segment::Index(i), ..] if k == "entry" => Some(*i),
            _ => None,
        }
    }

    /// Resolve this pointer against a document, returning the addressed node.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Key(k) => current.as_object()?.get(k)?,
                Segment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }
}

impl fmt::Display for StructuralPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment.escaped())?;
        }
        Ok(())
    }
}

impl Serialize for StructuralPointer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StructuralPointer {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StructuralPointer::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_roundtrip() {
        let ptr = StructuralPointer::root()
            .key("entry")
            .index(0)
            .key("resource")
            .key("gender");
        assert_eq!(ptr.to_string(), "/entry/0/resource/gender");
        assert_eq!(StructuralPointer::parse("/entry/0/resource/gender"), Ok(ptr));
    }

    #[test]
    fn test_escaping() {
        let ptr = StructuralPointer::root().key("a/b").key("c~d");
        assert_eq!(ptr.to_string(), "/a~1b/c~0d");
        let parsed = StructuralPointer::parse("/a~1b/c~0d").unwrap();
        assert_eq!(parsed, ptr);
    }

    #[test]
    fn test_parse_rejects_missing_slash() {
        assert!(matches!(
            StructuralPointer::parse("entry/0"),
            Err(PointerParseError::MissingLeadingSlash(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let doc = json!({"entry": [{"resource": {"gender": "male"}}]});
        let ptr = StructuralPointer::parse("/entry/0/resource/gender").unwrap();
        assert_eq!(ptr.resolve(&doc), Some(&json!("male")));
        assert_eq!(StructuralPointer::root().resolve(&doc), Some(&doc));
        let missing = StructuralPointer::parse("/entry/1").unwrap();
        assert_eq!(missing.resolve(&doc), None);
    }

    #[test]
    fn test_entry_index() {
        let ptr = StructuralPointer::parse("/entry/3/resource/status").unwrap();
        assert_eq!(ptr.entry_index(), Some(3));
        assert_eq!(StructuralPointer::parse("/type").unwrap().entry_index(), None);
    }

    #[test]
    fn test_parent() {
        let ptr = StructuralPointer::parse("/entry/0/resource").unwrap();
        assert_eq!(
            ptr.parent(),
            Some(StructuralPointer::parse("/entry/0").unwrap())
        );
        assert_eq!(StructuralPointer::root().parent(), None);
    }
}
