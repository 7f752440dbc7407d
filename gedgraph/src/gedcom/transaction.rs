// Units of work - journaled mutation primitives, commit and rollback

use super::Gedcom;
use crate::entity::{generate_id, validate_id, validate_tag, EntityKey, EntityLocation, EntityRecord};
use crate::error::{GedcomError, Result};
use crate::events::GedcomEvent;
use crate::property::{Link, PropertyKey, PropertyLocation, PropertyNode, PropertyTree};
use std::collections::BTreeSet;
use std::ops::Deref;

/// One primitive state change, kept so it can be reverted.
#[derive(Debug)]
enum Change {
    NodeValue { node: PropertyKey, old: String },
    NodeLink { node: PropertyKey, old: Option<Link> },
    NodeParent { node: PropertyKey, old: Option<PropertyKey> },
    ChildInserted { parent: PropertyKey, position: usize },
    ChildRemoved { parent: PropertyKey, position: usize, child: PropertyKey },
    NodeFreed { node: PropertyKey, data: PropertyNode },
    EntityFreed { entity: EntityKey, record: EntityRecord },
    TagOrderInserted { tag: String, position: usize },
    TagOrderRemoved { tag: String, position: usize, entity: EntityKey },
    IdInserted { tag: String, id: String },
    IdRemoved { tag: String, id: String, entity: EntityKey },
    BackrefInserted { target: EntityKey, position: usize },
    BackrefRemoved { target: EntityKey, position: usize, property: PropertyKey },
}

/// The mutating side of a document, alive for the duration of one unit
/// of work.
///
/// Reads go through `Deref<Target = Gedcom>`. Every mutation is journaled;
/// if the unit of work fails, or the transaction is dropped without
/// committing (a panic inside the work closure), the journal is replayed
/// in reverse and the document is restored exactly.
pub struct Transaction<'a> {
    pub(super) doc: &'a mut Gedcom,
    muted: bool,
    journal: Vec<Change>,
    events: Vec<GedcomEvent>,
    base_nodes: usize,
    base_entities: usize,
    /// Attached cross-references that still need a link before commit.
    pub(super) unresolved: BTreeSet<PropertyKey>,
    /// Nodes created or detached here; released at commit if still detached.
    floating: BTreeSet<PropertyKey>,
    /// Unlinked reciprocals kept for their sub-properties; removed at
    /// commit unless linked again.
    pub(super) orphaned: BTreeSet<PropertyKey>,
    finished: bool,
}

impl Deref for Transaction<'_> {
    type Target = Gedcom;

    fn deref(&self) -> &Gedcom {
        self.doc
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "Unit of work abandoned, rolling back {} changes",
                self.journal.len()
            );
            self.revert();
        }
    }
}

impl<'a> Transaction<'a> {
    pub(super) fn begin(doc: &'a mut Gedcom, muted: bool) -> Self {
        let base_nodes = doc.state.nodes.len();
        let base_entities = doc.state.entities.len();
        Transaction {
            doc,
            muted,
            journal: Vec::new(),
            events: Vec::new(),
            base_nodes,
            base_entities,
            unresolved: BTreeSet::new(),
            floating: BTreeSet::new(),
            orphaned: BTreeSet::new(),
            finished: false,
        }
    }

    /// Run nested work inside this transaction. There is no inner rollback
    /// boundary: an error propagated out of the outermost unit of work
    /// reverts the nested changes too.
    pub fn do_unit_of_work<T, E, F>(&mut self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        work(self)
    }

    pub(super) fn commit(mut self) -> Result<Vec<GedcomEvent>> {
        if let Err(err) = self.drop_orphaned() {
            self.rollback();
            return Err(err);
        }
        let pending = std::mem::take(&mut self.unresolved);
        for key in pending {
            let Some(node) = self.doc.node(key) else {
                continue;
            };
            if !node.xref || node.link.is_some() || self.doc.entity_of(key).is_none() {
                continue;
            }
            let target = self
                .doc
                .tag_path(key)
                .and_then(|path| self.doc.grammar.reference_rule(&path).map(|r| r.target.clone()))
                .unwrap_or_else(|| "record".to_string());
            let err = GedcomError::UnresolvedReference {
                tag: node.tag.clone(),
                id: node.value.clone(),
                target,
            };
            log::debug!("Commit rejected: {err}");
            self.rollback();
            return Err(err);
        }

        let released = self.release_floating();
        self.finished = true;
        log::debug!(
            "Committed unit of work: {} changes, {} events, {} detached nodes released",
            self.journal.len(),
            self.events.len(),
            released
        );
        Ok(std::mem::take(&mut self.events))
    }

    pub(super) fn rollback(mut self) {
        log::debug!("Rolling back {} changes", self.journal.len());
        self.revert();
    }

    fn revert(&mut self) {
        let state = &mut self.doc.state;
        while let Some(change) = self.journal.pop() {
            match change {
                Change::NodeValue { node, old } => {
                    if let Some(n) = state.nodes.get_mut(node.slot).and_then(Option::as_mut) {
                        n.value = old;
                    }
                }
                Change::NodeLink { node, old } => {
                    if let Some(n) = state.nodes.get_mut(node.slot).and_then(Option::as_mut) {
                        n.link = old;
                    }
                }
                Change::NodeParent { node, old } => {
                    if let Some(n) = state.nodes.get_mut(node.slot).and_then(Option::as_mut) {
                        n.parent = old;
                    }
                }
                Change::ChildInserted { parent, position } => {
                    if let Some(n) = state.nodes.get_mut(parent.slot).and_then(Option::as_mut) {
                        n.children.remove(position);
                    }
                }
                Change::ChildRemoved {
                    parent,
                    position,
                    child,
                } => {
                    if let Some(n) = state.nodes.get_mut(parent.slot).and_then(Option::as_mut) {
                        n.children.insert(position, child);
                    }
                }
                Change::NodeFreed { node, data } => {
                    state.nodes[node.slot] = Some(data);
                }
                Change::EntityFreed { entity, record } => {
                    state.entities[entity.slot] = Some(record);
                }
                Change::TagOrderInserted { tag, position } => {
                    if let Some(keys) = state.by_tag.get_mut(&tag) {
                        keys.remove(position);
                        if keys.is_empty() {
                            state.by_tag.remove(&tag);
                        }
                    }
                }
                Change::TagOrderRemoved {
                    tag,
                    position,
                    entity,
                } => {
                    state.by_tag.entry(tag).or_default().insert(position, entity);
                }
                Change::IdInserted { tag, id } => {
                    if let Some(ids) = state.by_id.get_mut(&tag) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            state.by_id.remove(&tag);
                        }
                    }
                }
                Change::IdRemoved { tag, id, entity } => {
                    state.by_id.entry(tag).or_default().insert(id, entity);
                }
                Change::BackrefInserted { target, position } => {
                    if let Some(refs) = state.backrefs.get_mut(&target) {
                        refs.remove(position);
                        if refs.is_empty() {
                            state.backrefs.remove(&target);
                        }
                    }
                }
                Change::BackrefRemoved {
                    target,
                    position,
                    property,
                } => {
                    state.backrefs.entry(target).or_default().insert(position, property);
                }
            }
        }
        state.nodes.truncate(self.base_nodes);
        state.entities.truncate(self.base_entities);
        self.events.clear();
        self.unresolved.clear();
        self.floating.clear();
        self.orphaned.clear();
        self.finished = true;
    }

    /// Remove kept reciprocals that are still attached and unlinked.
    fn drop_orphaned(&mut self) -> Result<usize> {
        let mut dropped = 0;
        for key in std::mem::take(&mut self.orphaned) {
            let Some(parent) = self.doc.node(key).filter(|n| n.link.is_none()).and_then(|n| n.parent) else {
                continue;
            };
            if self.doc.entity_of(key).is_none() {
                continue;
            }
            self.remove_child(parent, key)?;
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Free every node that ended the unit of work detached.
    fn release_floating(&mut self) -> usize {
        let mut released = 0;
        let floating = std::mem::take(&mut self.floating);
        for key in floating {
            let detached = self
                .doc
                .node(key)
                .is_some_and(|n| n.parent.is_none() && n.entity.is_none());
            if !detached {
                continue;
            }
            let mut stack = vec![key];
            while let Some(current) = stack.pop() {
                if let Some(node) = self.doc.state.nodes[current.slot].take() {
                    stack.extend(node.children);
                    released += 1;
                }
            }
        }
        released
    }

    // ── Journaled Primitives ─────────────────────────────────────────

    pub(super) fn emitting(&self) -> bool {
        !self.muted
    }

    pub(super) fn emit(&mut self, event: GedcomEvent) {
        if !self.muted {
            self.events.push(event);
        }
    }

    fn alloc_node(&mut self, node: PropertyNode) -> PropertyKey {
        let key = PropertyKey::new(self.doc.document, self.doc.state.nodes.len());
        let floating = node.entity.is_none() && node.parent.is_none();
        self.doc.state.nodes.push(Some(node));
        if floating {
            self.floating.insert(key);
        }
        key
    }

    fn node_mut(&mut self, key: PropertyKey) -> Result<&mut PropertyNode> {
        let document = self.doc.document;
        self.doc
            .state
            .nodes
            .get_mut(key.slot)
            .filter(|_| key.doc == document)
            .and_then(Option::as_mut)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))
    }

    fn require_node(&self, key: PropertyKey) -> Result<&PropertyNode> {
        self.doc
            .node(key)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))
    }

    pub(super) fn write_value(&mut self, key: PropertyKey, value: &str) -> Result<String> {
        let node = self.node_mut(key)?;
        let old = std::mem::replace(&mut node.value, value.to_string());
        self.journal.push(Change::NodeValue {
            node: key,
            old: old.clone(),
        });
        Ok(old)
    }

    pub(super) fn write_link(&mut self, key: PropertyKey, link: Option<Link>) -> Result<()> {
        let node = self.node_mut(key)?;
        let old = std::mem::replace(&mut node.link, link);
        self.journal.push(Change::NodeLink { node: key, old });
        Ok(())
    }

    fn insert_child_raw(&mut self, parent: PropertyKey, child: PropertyKey, position: usize) -> Result<()> {
        self.node_mut(parent)?.children.insert(position, child);
        self.journal.push(Change::ChildInserted { parent, position });
        let old = self.node_mut(child)?.parent.replace(parent);
        self.journal.push(Change::NodeParent { node: child, old });
        Ok(())
    }

    fn remove_child_raw(&mut self, parent: PropertyKey, position: usize) -> Result<PropertyKey> {
        let child = self.node_mut(parent)?.children.remove(position);
        self.journal.push(Change::ChildRemoved {
            parent,
            position,
            child,
        });
        let old = self.node_mut(child)?.parent.take();
        self.journal.push(Change::NodeParent { node: child, old });
        self.floating.insert(child);
        Ok(child)
    }

    fn free_subtree(&mut self, key: PropertyKey) {
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if let Some(data) = self.doc.state.nodes[current.slot].take() {
                stack.extend(data.children.iter().copied());
                self.journal.push(Change::NodeFreed {
                    node: current,
                    data,
                });
            }
        }
    }

    pub(super) fn push_backref(&mut self, target: EntityKey, property: PropertyKey) {
        let refs = self.doc.state.backrefs.entry(target).or_default();
        refs.push(property);
        let position = refs.len() - 1;
        self.journal.push(Change::BackrefInserted { target, position });
    }

    pub(super) fn remove_backref(&mut self, target: EntityKey, property: PropertyKey) {
        let backrefs = &mut self.doc.state.backrefs;
        let Some(refs) = backrefs.get_mut(&target) else {
            return;
        };
        let Some(position) = refs.iter().position(|k| *k == property) else {
            return;
        };
        refs.remove(position);
        if refs.is_empty() {
            backrefs.remove(&target);
        }
        self.journal.push(Change::BackrefRemoved {
            target,
            position,
            property,
        });
    }

    fn insert_record(&mut self, tag: &str, id: &str, value: &str, position: usize) -> (EntityKey, PropertyKey) {
        let key = EntityKey::new(self.doc.document, self.doc.state.entities.len());
        let mut root = PropertyNode::new(tag, value, false);
        root.entity = Some(key);
        let root = self.alloc_node(root);
        self.doc.state.entities.push(Some(EntityRecord {
            tag: tag.to_string(),
            id: id.to_string(),
            root,
        }));

        self.doc
            .state
            .by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(position, key);
        self.journal.push(Change::TagOrderInserted {
            tag: tag.to_string(),
            position,
        });
        self.doc
            .state
            .by_id
            .entry(tag.to_string())
            .or_default()
            .insert(id.to_string(), key);
        self.journal.push(Change::IdInserted {
            tag: tag.to_string(),
            id: id.to_string(),
        });
        (key, root)
    }

    fn position_of(&self, key: EntityKey, tag: &str) -> Option<usize> {
        self.doc.state.by_tag.get(tag)?.iter().position(|k| *k == key)
    }

    /// Build detached nodes mirroring `tree`.
    fn build_tree(&mut self, tree: &PropertyTree) -> Result<PropertyKey> {
        validate_tag(&tree.tag)?;
        let root = self.alloc_node(PropertyNode::new(&tree.tag, &tree.value, tree.xref));
        for child in &tree.children {
            let key = self.build_tree(child)?;
            let position = self.require_node(root)?.children.len();
            self.insert_child_raw(root, key, position)?;
            self.floating.remove(&key);
        }
        Ok(root)
    }

    // ── Records ──────────────────────────────────────────────────────

    /// Create a record. Without an id, one is allocated with the
    /// grammar's strategy for `tag` (`I1`, `I2`, ... by default).
    pub fn create_entity(&mut self, tag: &str, id: Option<&str>) -> Result<EntityKey> {
        validate_tag(tag)?;
        let id = match id {
            Some(id) => {
                validate_id(id)?;
                if self.doc.get_entity(tag, id).is_some() {
                    return Err(GedcomError::DuplicateId {
                        tag: tag.to_string(),
                        id: id.to_string(),
                    });
                }
                id.to_string()
            }
            None => {
                let grammar = &self.doc.grammar;
                let taken = self.doc.state.by_id.get(tag);
                generate_id(grammar.id_strategy(tag), &grammar.prefix_for(tag), |candidate| {
                    taken.is_some_and(|ids| ids.contains_key(candidate))
                })
            }
        };

        let position = self.doc.entity_count(tag);
        let (key, _) = self.insert_record(tag, &id, "", position);
        self.emit(GedcomEvent::EntityAdded {
            entity: key,
            location: EntityLocation::new(tag, &id),
            position,
        });
        Ok(key)
    }

    /// Put a record back at `position` in its tag order, rebuilding its
    /// tree from a snapshot. Cross-references inside stay unresolved
    /// until linked.
    pub(crate) fn restore_entity(
        &mut self,
        location: &EntityLocation,
        position: usize,
        tree: &PropertyTree,
    ) -> Result<EntityKey> {
        validate_tag(&location.tag)?;
        validate_id(&location.id)?;
        if self.doc.get_entity(&location.tag, &location.id).is_some() {
            return Err(GedcomError::DuplicateId {
                tag: location.tag.clone(),
                id: location.id.clone(),
            });
        }
        let len = self.doc.entity_count(&location.tag);
        if position > len {
            return Err(GedcomError::Index { index: position, len });
        }

        let (key, root) = self.insert_record(&location.tag, &location.id, &tree.value, position);
        for child in &tree.children {
            let built = self.build_tree(child)?;
            let at = self.require_node(root)?.children.len();
            self.insert_child_raw(root, built, at)?;
            self.floating.remove(&built);
        }
        for xref in self.doc.xrefs_in(root) {
            self.unresolved.insert(xref);
        }
        self.emit(GedcomEvent::EntityAdded {
            entity: key,
            location: location.clone(),
            position,
        });
        Ok(key)
    }

    /// Delete a record: its outgoing cross-references are unlinked (which
    /// removes their reciprocal properties elsewhere), properties in other
    /// records pointing at it are unlinked and removed, then the record
    /// leaves the document.
    pub fn delete_entity(&mut self, key: EntityKey) -> Result<()> {
        let record = self
            .doc
            .record(key)
            .cloned()
            .ok_or_else(|| GedcomError::NotFound(format!("record {key:?}")))?;

        for xref in self.doc.xrefs_in(record.root) {
            self.unlink(xref)?;
        }
        for incoming in self.doc.references_to(key).to_vec() {
            self.unlink(incoming)?;
            if let Some(parent) = self.doc.parent_of(incoming) {
                self.remove_child(parent, incoming)?;
            }
        }

        let position = self
            .position_of(key, &record.tag)
            .ok_or_else(|| GedcomError::NotFound(format!("{} @{}@", record.tag, record.id)))?;
        let snapshot = if self.emitting() {
            self.doc.snapshot(record.root)
        } else {
            None
        };

        if let Some(keys) = self.doc.state.by_tag.get_mut(&record.tag) {
            keys.remove(position);
            if keys.is_empty() {
                self.doc.state.by_tag.remove(&record.tag);
            }
        }
        self.journal.push(Change::TagOrderRemoved {
            tag: record.tag.clone(),
            position,
            entity: key,
        });
        if let Some(ids) = self.doc.state.by_id.get_mut(&record.tag) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.doc.state.by_id.remove(&record.tag);
            }
        }
        self.journal.push(Change::IdRemoved {
            tag: record.tag.clone(),
            id: record.id.clone(),
            entity: key,
        });
        self.free_subtree(record.root);
        if let Some(freed) = self.doc.state.entities[key.slot].take() {
            self.journal.push(Change::EntityFreed {
                entity: key,
                record: freed,
            });
        }

        if let Some(snapshot) = snapshot {
            self.emit(GedcomEvent::EntityDeleted {
                entity: key,
                location: EntityLocation::new(&record.tag, &record.id),
                position,
                snapshot,
            });
        }
        Ok(())
    }

    // ── Properties ───────────────────────────────────────────────────

    /// A new detached property.
    pub fn create_property(&mut self, tag: &str, value: &str) -> Result<PropertyKey> {
        validate_tag(tag)?;
        Ok(self.alloc_node(PropertyNode::new(tag, value, false)))
    }

    /// A new detached, unresolved cross-reference to the record `target_id`.
    pub fn create_xref(&mut self, tag: &str, target_id: &str) -> Result<PropertyKey> {
        validate_tag(tag)?;
        validate_id(target_id)?;
        Ok(self.alloc_node(PropertyNode::new(tag, target_id, true)))
    }

    /// Create a property and append it to `parent`.
    pub fn add_property(&mut self, parent: PropertyKey, tag: &str, value: &str) -> Result<PropertyKey> {
        let key = self.create_property(tag, value)?;
        self.add_child(parent, key, None)?;
        Ok(key)
    }

    pub fn insert_property(
        &mut self,
        parent: PropertyKey,
        position: usize,
        tag: &str,
        value: &str,
    ) -> Result<PropertyKey> {
        let key = self.create_property(tag, value)?;
        self.add_child(parent, key, Some(position))?;
        Ok(key)
    }

    /// Create a cross-reference, append it to `parent` and link it.
    pub fn add_xref(&mut self, parent: PropertyKey, tag: &str, target_id: &str) -> Result<PropertyKey> {
        let key = self.create_xref(tag, target_id)?;
        self.add_child(parent, key, None)?;
        self.link(key)?;
        Ok(key)
    }

    /// Paste a detached tree below `parent`. Cross-references in the tree
    /// are left unresolved; see [`Transaction::link_subtree`].
    pub fn insert_tree(
        &mut self,
        parent: PropertyKey,
        position: Option<usize>,
        tree: &PropertyTree,
    ) -> Result<PropertyKey> {
        let key = self.build_tree(tree)?;
        self.add_child(parent, key, position)?;
        Ok(key)
    }

    /// Attach a detached property below `parent`, appending when no
    /// position is given.
    pub fn add_child(&mut self, parent: PropertyKey, child: PropertyKey, position: Option<usize>) -> Result<()> {
        let node = self.require_node(child)?;
        if node.entity.is_some() {
            return Err(GedcomError::Structure(format!(
                "Record root {} cannot become a child",
                node.tag
            )));
        }
        if node.parent.is_some() {
            return Err(GedcomError::Structure(format!(
                "Property {} already has a parent",
                node.tag
            )));
        }

        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(GedcomError::Structure(
                    "A property cannot be added below itself".into(),
                ));
            }
            ancestor = self.require_node(current)?.parent;
        }

        let len = self.require_node(parent)?.children.len();
        let position = position.unwrap_or(len);
        if position > len {
            return Err(GedcomError::Index { index: position, len });
        }

        self.insert_child_raw(parent, child, position)?;
        self.floating.remove(&child);

        if self.doc.entity_of(parent).is_none() {
            return Ok(());
        }
        for xref in self.doc.xrefs_in(child) {
            if self.doc.node(xref).is_some_and(|n| n.link.is_none()) {
                self.unresolved.insert(xref);
            }
        }
        if self.emitting() {
            if let (Some(location), Some(snapshot)) = (self.doc.location(child), self.doc.snapshot(child)) {
                self.emit(GedcomEvent::PropertyAdded {
                    parent,
                    property: child,
                    location,
                    snapshot,
                });
            }
        }
        Ok(())
    }

    /// Detach a direct child of `parent`. Every cross-reference in the
    /// child's subtree is unlinked first.
    pub fn remove_child(&mut self, parent: PropertyKey, child: PropertyKey) -> Result<()> {
        let child_position = |tx: &Self| {
            tx.doc
                .node(parent)
                .and_then(|n| n.children.iter().position(|k| *k == child))
                .ok_or_else(|| GedcomError::NotFound(format!("property {child:?} is not a child of {parent:?}")))
        };
        child_position(self)?;

        for xref in self.doc.xrefs_in(child) {
            self.unlink(xref)?;
        }

        let position = child_position(self)?;
        let before = if self.emitting() {
            self.doc.location(child).zip(self.doc.snapshot(child))
        } else {
            None
        };

        self.remove_child_raw(parent, position)?;
        for xref in self.doc.xrefs_in(child) {
            self.unresolved.remove(&xref);
        }

        if let Some((location, snapshot)) = before {
            self.emit(GedcomEvent::PropertyDeleted {
                parent,
                location,
                snapshot,
            });
        }
        Ok(())
    }

    /// Remove a property from its parent. The node is released at commit.
    pub fn remove_property(&mut self, key: PropertyKey) -> Result<()> {
        let parent = self.require_node(key)?.parent.ok_or_else(|| {
            GedcomError::Structure("Record roots and detached properties have no parent to leave".into())
        })?;
        self.remove_child(parent, key)
    }

    /// Replace a property's value. A linked cross-reference is unlinked,
    /// changed and linked again, so it moves to the new target.
    pub fn set_value(&mut self, key: PropertyKey, value: &str) -> Result<()> {
        let node = self.require_node(key)?;
        if node.value == value {
            return Ok(());
        }
        let xref = node.xref;
        let relink = node.link.is_some();
        if xref {
            validate_id(value)?;
        }
        if relink {
            self.unlink(key)?;
        }

        let old = self.write_value(key, value)?;
        if self.emitting() {
            if let Some(location) = self.doc.location(key) {
                self.emit(GedcomEvent::PropertyChanged {
                    property: key,
                    location,
                    old_value: old,
                    new_value: value.to_string(),
                });
            }
        }

        if relink {
            self.link(key)?;
        }
        Ok(())
    }

    // ── Location Addressed Operations ────────────────────────────────

    pub(crate) fn resolve(&self, location: &PropertyLocation) -> Result<PropertyKey> {
        self.doc
            .resolve_location(location)
            .ok_or_else(|| GedcomError::NotFound(format!("property at {location:?}")))
    }

    /// Re-insert a snapshot at the exact location it was removed from.
    pub(crate) fn restore_property(&mut self, location: &PropertyLocation, tree: &PropertyTree) -> Result<PropertyKey> {
        let parent = location
            .parent()
            .ok_or_else(|| GedcomError::Structure("Cannot restore a record root as a property".into()))?;
        let parent = self.resolve(&parent)?;
        self.insert_tree(parent, location.position(), tree)
    }

    pub(crate) fn remove_property_at(&mut self, location: &PropertyLocation) -> Result<()> {
        let key = self.resolve(location)?;
        self.remove_property(key)
    }

    /// Overwrite a value without relinking.
    pub(crate) fn set_value_at(&mut self, location: &PropertyLocation, value: &str) -> Result<()> {
        let key = self.resolve(location)?;
        if self.require_node(key)?.link.is_some() {
            return Err(GedcomError::Structure(format!(
                "Cannot overwrite the value of linked reference at {location:?}"
            )));
        }
        let old = self.write_value(key, value)?;
        if self.doc.node(key).is_some_and(|n| n.xref) {
            self.unresolved.insert(key);
        }
        self.emit(GedcomEvent::PropertyChanged {
            property: key,
            location: location.clone(),
            old_value: old,
            new_value: value.to_string(),
        });
        Ok(())
    }
}
