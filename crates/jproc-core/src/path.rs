//! Dot-path addressing over JSON documents.
//!
//! A [`DotPath`] is the split form of a string such as `chats.messages.from`.
//! Two readers are provided:
//!
//! - [`resolve_containers`] fans out over arrays: every object element of an
//!   array that carries the next segment is descended into, so one path can
//!   address many locations.
//! - [`resolve_value`] is a plain property chain used for `source` lookups
//!   relative to a single mutation site. It never fans out.
//!
//! Absence is never an error here; a branch that does not match simply
//! contributes nothing.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// A parsed dot-notation path. Always holds at least one segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DotPath(Vec<String>);

impl DotPath {
    /// Split `raw` on `.`. An empty string yields the single empty segment.
    pub fn parse(raw: &str) -> Self {
        Self(raw.split('.').map(str::to_owned).collect())
    }

    /// All segments, terminal key included.
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Segments used for traversal (everything but the terminal key).
    #[inline]
    pub fn container(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    /// The last segment, naming the key a step acts on.
    #[inline]
    pub fn terminal(&self) -> &str {
        &self.0[self.0.len() - 1]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for DotPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for DotPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl Serialize for DotPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DotPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Collect every node reached by walking `segments` from `root`, fanning out
/// over arrays.
///
/// With no segments left the current node itself is the result. Array
/// elements that are not objects, or that lack the next key, are skipped.
pub fn resolve_containers<'a, S: AsRef<str>>(
    root: &'a mut Value,
    segments: &[S],
) -> Vec<&'a mut Value> {
    let mut out = Vec::new();
    collect_containers(root, segments, &mut out);
    out
}

fn collect_containers<'a, S: AsRef<str>>(
    node: &'a mut Value,
    segments: &[S],
    out: &mut Vec<&'a mut Value>,
) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(node);
        return;
    };
    let key = head.as_ref();
    match node {
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Some(child) = item.as_object_mut().and_then(|obj| obj.get_mut(key)) {
                    collect_containers(child, rest, out);
                }
            }
        }
        Value::Object(obj) => {
            if let Some(child) = obj.get_mut(key) {
                collect_containers(child, rest, out);
            }
        }
        _ => {}
    }
}

/// Chain property access from a single object. Any missing key or
/// non-object intermediate yields `None`.
pub fn resolve_value<'a, S: AsRef<str>>(
    site: &'a Map<String, Value>,
    segments: &[S],
) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = site.get(first.as_ref())?;
    for seg in rest {
        current = current.as_object()?.get(seg.as_ref())?;
    }
    Some(current)
}

/// [`resolve_value`] over a raw dot-path string.
pub fn resolve_value_str<'a>(site: &'a Map<String, Value>, raw: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = raw.split('.').collect();
    resolve_value(site, &segments)
}
