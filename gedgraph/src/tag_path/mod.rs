// Tag paths - parsing, display and pattern matching of `INDI:BIRT:DATE` style paths

use crate::error::{GedcomError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Segment that matches any single tag inside a pattern.
pub const WILDCARD: &str = "*";

/// An ordered sequence of tags, starting with the record tag.
///
/// Both `:` and `/` are accepted as separators when parsing; paths always
/// display with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagPath {
    segments: Vec<String>,
}

impl TagPath {
    /// Parse a path like `FAM:HUSB` or `INDI/BIRT/DATE`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GedcomError::Structure("Tag path is empty".into()));
        }

        let mut segments = Vec::new();
        for segment in raw.split(|c| c == ':' || c == '/') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(GedcomError::Structure(format!(
                    "Tag path '{raw}' contains an empty segment"
                )));
            }
            if segment.chars().any(char::is_whitespace) {
                return Err(GedcomError::Structure(format!(
                    "Tag path '{raw}' contains whitespace in segment '{segment}'"
                )));
            }
            segments.push(segment.to_string());
        }

        Ok(TagPath { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagPath {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The record tag this path starts at.
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    /// A new path with `tag` appended.
    pub fn child(&self, tag: &str) -> TagPath {
        let mut segments = self.segments.clone();
        segments.push(tag.to_string());
        TagPath { segments }
    }

    pub fn parent(&self) -> Option<TagPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(TagPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether this concrete path is matched by `pattern`.
    ///
    /// A single-tag pattern matches that tag anywhere below a record
    /// (`NOTE` matches `INDI:NOTE` and `INDI:BIRT:NOTE` but not the `NOTE`
    /// record itself). Longer patterns must match segment for segment,
    /// with `*` standing for any one tag.
    pub fn matches(&self, pattern: &TagPath) -> bool {
        if pattern.segments.len() == 1 && pattern.segments[0] != WILDCARD {
            return self.segments.len() >= 2 && self.last() == pattern.first();
        }

        self.segments.len() == pattern.segments.len()
            && self
                .segments
                .iter()
                .zip(&pattern.segments)
                .all(|(tag, pat)| pat == WILDCARD || tag == pat)
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(":"))
    }
}

impl FromStr for TagPath {
    type Err = GedcomError;

    fn from_str(s: &str) -> Result<Self> {
        TagPath::parse(s)
    }
}

impl TryFrom<String> for TagPath {
    type Error = GedcomError;

    fn try_from(value: String) -> Result<Self> {
        TagPath::parse(&value)
    }
}

impl From<TagPath> for String {
    fn from(path: TagPath) -> Self {
        path.to_string()
    }
}
