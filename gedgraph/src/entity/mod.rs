// Records - keys, id allocation and read-only views

use crate::error::{GedcomError, Result};
use crate::gedcom::Gedcom;
use crate::grammar::AutoIdStrategy;
use crate::property::{PropertyKey, PropertyRef};
use crate::relations::{Fam, Indi};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Handle to a record inside one document. Like property keys, record keys
/// are not reused once committed, and a key never resolves in a document
/// other than the one that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub(crate) doc: u64,
    pub(crate) slot: usize,
}

impl EntityKey {
    pub(crate) fn new(doc: u64, slot: usize) -> Self {
        EntityKey { doc, slot }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityRecord {
    pub tag: String,
    pub id: String,
    pub root: PropertyKey,
}

/// A record addressed by tag and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityLocation {
    pub tag: String,
    pub id: String,
}

impl EntityLocation {
    pub fn new(tag: &str, id: &str) -> Self {
        EntityLocation {
            tag: tag.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for EntityLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}@", self.tag, self.id)
    }
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+$").expect("id pattern compiles"))
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("tag pattern compiles"))
}

/// Record ids are opaque but must not contain `@` or whitespace.
pub fn validate_id(id: &str) -> Result<()> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(GedcomError::Structure(format!("Invalid record id '{id}'")))
    }
}

/// Tags are letters, digits and underscores.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag_pattern().is_match(tag) {
        Ok(())
    } else {
        Err(GedcomError::Structure(format!("Invalid tag '{tag}'")))
    }
}

/// Produce an id for a new record that `is_taken` does not report as used.
pub(crate) fn generate_id(
    strategy: AutoIdStrategy,
    prefix: &str,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    match strategy {
        AutoIdStrategy::Sequential => (1u64..)
            .map(|n| format!("{prefix}{n}"))
            .find(|candidate| !is_taken(candidate))
            .unwrap_or_default(),
        AutoIdStrategy::Ulid | AutoIdStrategy::Uuid | AutoIdStrategy::Nanoid => loop {
            let raw = match strategy {
                AutoIdStrategy::Ulid => ulid::Ulid::new().to_string(),
                AutoIdStrategy::Uuid => uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
                _ => nanoid::nanoid!(),
            };
            let candidate = format!("{prefix}{raw}");
            if !is_taken(&candidate) {
                break candidate;
            }
        },
    }
}

/// Read-only view of a record inside a document.
#[derive(Clone, Copy)]
pub struct EntityRef<'a> {
    gedcom: &'a Gedcom,
    key: EntityKey,
    record: &'a EntityRecord,
}

impl<'a> EntityRef<'a> {
    pub(crate) fn new(gedcom: &'a Gedcom, key: EntityKey, record: &'a EntityRecord) -> Self {
        EntityRef {
            gedcom,
            key,
            record,
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn tag(&self) -> &'a str {
        &self.record.tag
    }

    pub fn id(&self) -> &'a str {
        &self.record.id
    }

    pub fn gedcom(&self) -> &'a Gedcom {
        self.gedcom
    }

    pub fn location(&self) -> EntityLocation {
        EntityLocation::new(&self.record.tag, &self.record.id)
    }

    pub fn root_key(&self) -> PropertyKey {
        self.record.root
    }

    pub fn root(&self) -> PropertyRef<'a> {
        self.gedcom
            .property(self.record.root)
            .expect("record root is always present")
    }

    /// The value on the record line itself (e.g. inline NOTE text).
    pub fn value(&self) -> &'a str {
        self.root().value()
    }

    pub fn properties(&self) -> impl Iterator<Item = PropertyRef<'a>> + 'a {
        self.root().children()
    }

    pub fn property(&self, tag: &str) -> Option<PropertyRef<'a>> {
        self.root().property(tag)
    }

    /// First property matching a full tag path such as `INDI:BIRT:DATE`.
    pub fn find(&self, path: &str) -> Option<PropertyRef<'a>> {
        self.root().find(path)
    }

    /// Cross-references currently resolved to this record.
    pub fn references(&self) -> impl Iterator<Item = PropertyRef<'a>> + 'a {
        let gedcom = self.gedcom;
        gedcom
            .references_to(self.key)
            .iter()
            .filter_map(move |key| gedcom.property(*key))
    }

    pub fn as_indi(&self) -> Option<Indi<'a>> {
        self.gedcom.indi(self.key)
    }

    pub fn as_fam(&self) -> Option<Fam<'a>> {
        self.gedcom.fam(self.key)
    }
}

impl PartialEq for EntityRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.gedcom, other.gedcom) && self.key == other.key
    }
}

impl Eq for EntityRef<'_> {}

impl fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("key", &self.key)
            .field("tag", &self.record.tag)
            .field("id", &self.record.id)
            .finish()
    }
}

impl fmt::Display for EntityRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}@", self.record.tag, self.record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("I1").is_ok());
        assert!(validate_id("F_12-x").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("@I1@").is_err());
        assert!(validate_id("I 1").is_err());
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("INDI").is_ok());
        assert!(validate_tag("_UID").is_ok());
        assert!(validate_tag("BI RT").is_err());
        assert!(validate_tag("").is_err());
    }

    #[test]
    fn test_sequential_picks_smallest_unused() {
        let taken: HashSet<&str> = ["I1", "I2", "I4"].into_iter().collect();
        let id = generate_id(AutoIdStrategy::Sequential, "I", |c| taken.contains(c));
        assert_eq!(id, "I3");
        let id = generate_id(AutoIdStrategy::Sequential, "F", |_| false);
        assert_eq!(id, "F1");
    }

    #[test]
    fn test_random_strategies_are_prefixed_and_valid() {
        for strategy in [AutoIdStrategy::Ulid, AutoIdStrategy::Uuid, AutoIdStrategy::Nanoid] {
            let id = generate_id(strategy, "I", |_| false);
            assert!(id.starts_with('I'));
            assert!(id.len() > 10);
            assert!(validate_id(&id).is_ok(), "{id} should be a valid id");
        }
    }
}
