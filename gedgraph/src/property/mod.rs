// Property tree nodes - arena keys, detached snapshots and read-only views

use crate::entity::{EntityKey, EntityLocation, EntityRef};
use crate::error::{GedcomError, Result};
use crate::gedcom::Gedcom;
use crate::grammar::XRefRole;
use crate::tag_path::TagPath;
use serde::{Deserialize, Serialize};

/// Handle to a property node inside one document.
///
/// Keys stay valid until the property is removed and are not reused for
/// another committed property of the same document. Keys handed out inside
/// a unit of work that rolls back are invalid afterwards. Keys of another
/// document are never found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey {
    pub(crate) doc: u64,
    pub(crate) slot: usize,
}

impl PropertyKey {
    pub(crate) fn new(doc: u64, slot: usize) -> Self {
        PropertyKey { doc, slot }
    }
}

/// Resolution state of a cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub target: EntityKey,
    /// Reciprocal property on the target for paired roles.
    pub peer: Option<PropertyKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropertyNode {
    pub tag: String,
    pub value: String,
    pub xref: bool,
    pub parent: Option<PropertyKey>,
    pub children: Vec<PropertyKey>,
    pub link: Option<Link>,
    /// Set on record roots only.
    pub entity: Option<EntityKey>,
}

impl PropertyNode {
    pub fn new(tag: &str, value: &str, xref: bool) -> Self {
        PropertyNode {
            tag: tag.to_string(),
            value: value.to_string(),
            xref,
            parent: None,
            children: Vec::new(),
            link: None,
            entity: None,
        }
    }
}

/// A detached, owned copy of a property and its descendants.
///
/// Used for clipboard and preview content, for the snapshots carried by
/// change events, and for pasting subtrees back into a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTree {
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub xref: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PropertyTree>,
}

impl PropertyTree {
    pub fn new(tag: &str, value: &str) -> Self {
        PropertyTree {
            tag: tag.to_string(),
            value: value.to_string(),
            xref: false,
            children: Vec::new(),
        }
    }

    /// A cross-reference pointing at the record with id `target`.
    pub fn xref(tag: &str, target: &str) -> Self {
        PropertyTree {
            xref: true,
            ..PropertyTree::new(tag, target)
        }
    }

    pub fn with_child(mut self, child: PropertyTree) -> Self {
        self.children.push(child);
        self
    }

    /// Number of properties in this tree, root included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(PropertyTree::count).sum::<usize>()
    }

    pub fn child(&self, tag: &str) -> Option<&PropertyTree> {
        self.children.iter().find(|c| c.tag == tag)
    }
}

/// Address of a property that survives re-creation of nodes: the owning
/// record plus the child index at every level below the record root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyLocation {
    pub entity: EntityLocation,
    pub path: Vec<usize>,
}

impl PropertyLocation {
    pub fn root(entity: EntityLocation) -> Self {
        PropertyLocation {
            entity,
            path: Vec::new(),
        }
    }

    /// Index among the parent's children, `None` for a record root.
    pub fn position(&self) -> Option<usize> {
        self.path.last().copied()
    }

    pub fn parent(&self) -> Option<PropertyLocation> {
        if self.path.is_empty() {
            return None;
        }
        Some(PropertyLocation {
            entity: self.entity.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, position: usize) -> PropertyLocation {
        let mut path = self.path.clone();
        path.push(position);
        PropertyLocation {
            entity: self.entity.clone(),
            path,
        }
    }
}

/// Read-only view of a property inside a document.
#[derive(Clone, Copy)]
pub struct PropertyRef<'a> {
    gedcom: &'a Gedcom,
    key: PropertyKey,
    node: &'a PropertyNode,
}

impl<'a> PropertyRef<'a> {
    pub(crate) fn new(gedcom: &'a Gedcom, key: PropertyKey, node: &'a PropertyNode) -> Self {
        PropertyRef { gedcom, key, node }
    }

    pub fn key(&self) -> PropertyKey {
        self.key
    }

    pub fn tag(&self) -> &'a str {
        &self.node.tag
    }

    pub fn value(&self) -> &'a str {
        &self.node.value
    }

    pub fn is_cross_reference(&self) -> bool {
        self.node.xref
    }

    pub fn is_linked(&self) -> bool {
        self.node.link.is_some()
    }

    pub fn is_entity_root(&self) -> bool {
        self.node.entity.is_some()
    }

    /// The record type this cross-reference points at, per the grammar.
    pub fn target_type(&self) -> Option<&'a str> {
        if !self.node.xref {
            return None;
        }
        let path = self.path();
        self.gedcom
            .grammar()
            .reference_rule(&path)
            .map(|rule| rule.target.as_str())
    }

    pub fn role(&self) -> Option<XRefRole> {
        if !self.node.xref {
            return None;
        }
        self.gedcom
            .grammar()
            .reference_rule(&self.path())
            .map(|rule| rule.role)
    }

    /// The record this cross-reference currently resolves to.
    pub fn target(&self) -> Option<EntityRef<'a>> {
        self.node
            .link
            .and_then(|link| self.gedcom.entity(link.target))
    }

    /// The reciprocal property of a paired cross-reference.
    pub fn peer(&self) -> Option<PropertyRef<'a>> {
        self.node
            .link
            .and_then(|link| link.peer)
            .and_then(|peer| self.gedcom.property(peer))
    }

    pub fn parent(&self) -> Option<PropertyRef<'a>> {
        self.node.parent.and_then(|p| self.gedcom.property(p))
    }

    /// The record owning this property, `None` while detached.
    pub fn entity(&self) -> Option<EntityRef<'a>> {
        self.gedcom
            .entity_of(self.key)
            .and_then(|e| self.gedcom.entity(e))
    }

    pub fn child_keys(&self) -> &'a [PropertyKey] {
        &self.node.children
    }

    pub fn child_count(&self) -> usize {
        self.node.children.len()
    }

    pub fn child(&self, index: usize) -> Result<PropertyRef<'a>> {
        let key = self
            .node
            .children
            .get(index)
            .copied()
            .ok_or(GedcomError::Index {
                index,
                len: self.node.children.len(),
            })?;
        self.gedcom
            .property(key)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))
    }

    pub fn children(&self) -> impl Iterator<Item = PropertyRef<'a>> + 'a {
        let gedcom = self.gedcom;
        self.node
            .children
            .iter()
            .filter_map(move |key| gedcom.property(*key))
    }

    /// First direct child with the given tag.
    pub fn property(&self, tag: &str) -> Option<PropertyRef<'a>> {
        self.children().find(|c| c.tag() == tag)
    }

    pub fn properties(&self, tag: &'a str) -> impl Iterator<Item = PropertyRef<'a>> + 'a {
        self.children().filter(move |c| c.tag() == tag)
    }

    /// First property below this one matching `path`, which starts with
    /// this property's own tag.
    pub fn find(&self, path: &str) -> Option<PropertyRef<'a>> {
        let path = TagPath::parse(path).ok()?;
        self.gedcom
            .find_by_path(self.key, &path)
            .and_then(|k| self.gedcom.property(k))
    }

    pub fn path(&self) -> TagPath {
        self.gedcom
            .tag_path(self.key)
            .unwrap_or_else(|| TagPath::from_segments([self.node.tag.clone()]))
    }

    pub fn location(&self) -> Option<PropertyLocation> {
        self.gedcom.location(self.key)
    }

    pub fn snapshot(&self) -> PropertyTree {
        self.gedcom.snapshot_node(self.key, self.node)
    }
}

impl std::fmt::Debug for PropertyRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRef")
            .field("key", &self.key)
            .field("tag", &self.node.tag)
            .field("value", &self.node.value)
            .field("xref", &self.node.xref)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_builder_and_count() {
        let tree = PropertyTree::new("BIRT", "")
            .with_child(PropertyTree::new("DATE", "1 JAN 1900"))
            .with_child(PropertyTree::new("PLAC", "Berlin").with_child(PropertyTree::new("NOTE", "old town")));
        assert_eq!(tree.count(), 4);
        assert_eq!(tree.child("PLAC").unwrap().value, "Berlin");
        assert!(tree.child("SOUR").is_none());
    }

    #[test]
    fn test_location_navigation() {
        let root = PropertyLocation::root(EntityLocation::new("INDI", "I1"));
        let date = root.child(2).child(0);
        assert_eq!(date.position(), Some(0));
        assert_eq!(date.parent(), Some(root.child(2)));
        assert_eq!(root.position(), None);
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_tree_serializes_compactly() {
        let tree = PropertyTree::new("NAME", "John /Doe/").with_child(PropertyTree::xref("SOUR", "S1"));
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tag": "NAME",
                "value": "John /Doe/",
                "children": [{ "tag": "SOUR", "value": "S1", "xref": true }]
            })
        );
    }
}
