mod family;
mod linker;
mod transaction;

pub use transaction::Transaction;

use crate::entity::{EntityKey, EntityLocation, EntityRecord, EntityRef};
use crate::error::{GedcomError, Result};
use crate::events::{GedcomEvent, GedcomListener, ListenerId, ListenerRegistry};
use crate::grammar::Grammar;
use crate::property::{PropertyKey, PropertyLocation, PropertyNode, PropertyRef, PropertyTree};
use crate::relations::{Fam, Indi};
use crate::tag_path::TagPath;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_DOCUMENT: AtomicU64 = AtomicU64::new(1);

/// Everything a unit of work can change. Listeners and grammar live
/// outside so rollback and state comparison only see document content.
///
/// Freed slots in `nodes` and `entities` stay empty for the life of the
/// document so a stale key can never alias a newer property or record.
/// The arenas only grow while editing; loading a saved file starts them
/// compact again.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DocumentState {
    pub nodes: Vec<Option<PropertyNode>>,
    pub entities: Vec<Option<EntityRecord>>,
    /// Records per tag in document order.
    pub by_tag: HashMap<String, Vec<EntityKey>>,
    /// tag -> id -> record
    pub by_id: HashMap<String, HashMap<String, EntityKey>>,
    /// Cross-references currently resolved to each record.
    pub backrefs: HashMap<EntityKey, Vec<PropertyKey>>,
}

/// An in-memory GEDCOM document: the records, their property trees and
/// the cross-reference graph between them.
///
/// All mutation happens inside [`Gedcom::do_unit_of_work`]; the closure
/// receives a [`Transaction`] carrying the mutating operations.
pub struct Gedcom {
    /// Stamped into every key this document hands out.
    document: u64,
    grammar: Arc<Grammar>,
    state: DocumentState,
    listeners: ListenerRegistry,
}

impl Default for Gedcom {
    fn default() -> Self {
        Gedcom::new()
    }
}

impl std::fmt::Debug for Gedcom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gedcom")
            .field("entities", &self.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Gedcom {
    /// An empty document using the standard GEDCOM 5.5 grammar.
    pub fn new() -> Self {
        Gedcom::with_grammar(Grammar::standard().clone())
    }

    pub fn with_grammar(grammar: Grammar) -> Self {
        Gedcom {
            document: NEXT_DOCUMENT.fetch_add(1, Ordering::Relaxed),
            grammar: Arc::new(grammar),
            state: DocumentState::default(),
            listeners: ListenerRegistry::default(),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    // ── Units of Work ────────────────────────────────────────────────

    /// Run `work` as one atomic unit.
    ///
    /// On success the events recorded during `work` are delivered to the
    /// listeners as one ordered batch. If `work` (or the commit check for
    /// unresolved cross-references) fails, every mutation is rolled back,
    /// no event is delivered and the original error is returned.
    pub fn do_unit_of_work<T, E, F>(&mut self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E>,
        E: From<GedcomError>,
    {
        self.run_unit_of_work(false, work)
    }

    /// Like [`Gedcom::do_unit_of_work`] but the committed events are
    /// discarded instead of delivered. Meant for bulk loads and other
    /// non-interactive operations.
    pub fn do_muted_unit_of_work<T, E, F>(&mut self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E>,
        E: From<GedcomError>,
    {
        self.run_unit_of_work(true, work)
    }

    fn run_unit_of_work<T, E, F>(&mut self, muted: bool, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E>,
        E: From<GedcomError>,
    {
        let mut tx = Transaction::begin(self, muted);
        let value = match work(&mut tx) {
            Ok(value) => value,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };
        let events = tx.commit()?;

        if !muted {
            self.dispatch(&events);
        }
        Ok(value)
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_listener<L>(&mut self, listener: L) -> ListenerId
    where
        L: GedcomListener + 'static,
    {
        self.listeners.add(Box::new(listener))
    }

    /// Returns false if the listener was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn dispatch(&mut self, events: &[GedcomEvent]) {
        let mut listeners = std::mem::take(&mut self.listeners);
        listeners.dispatch(self, events);
        self.listeners = listeners;
    }

    // ── Records ──────────────────────────────────────────────────────

    /// O(1) lookup of a record by tag and id.
    pub fn get_entity(&self, tag: &str, id: &str) -> Option<EntityKey> {
        self.state.by_id.get(tag)?.get(id).copied()
    }

    pub fn entity(&self, key: EntityKey) -> Option<EntityRef<'_>> {
        let record = self.record(key)?;
        Some(EntityRef::new(self, key, record))
    }

    pub fn entity_by_id(&self, tag: &str, id: &str) -> Option<EntityRef<'_>> {
        self.get_entity(tag, id).and_then(|key| self.entity(key))
    }

    pub fn entity_at(&self, location: &EntityLocation) -> Option<EntityRef<'_>> {
        self.entity_by_id(&location.tag, &location.id)
    }

    /// Records of one tag in document order.
    pub fn entities<'a>(&'a self, tag: &str) -> impl Iterator<Item = EntityRef<'a>> + 'a {
        self.state
            .by_tag
            .get(tag)
            .map(|keys| keys.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |key| self.entity(*key))
    }

    pub fn entity_count(&self, tag: &str) -> usize {
        self.state.by_tag.get(tag).map_or(0, Vec::len)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.state.by_tag.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record tags present in the document: grammar order first, then any
    /// undeclared tags alphabetically.
    pub fn entity_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .grammar
            .entities
            .iter()
            .map(|e| e.tag.as_str())
            .filter(|tag| self.entity_count(tag) > 0)
            .collect();
        let mut custom: Vec<&str> = self
            .state
            .by_tag
            .keys()
            .map(String::as_str)
            .filter(|tag| !self.grammar.is_entity_tag(tag))
            .collect();
        custom.sort_unstable();
        tags.extend(custom);
        tags
    }

    /// Cross-references currently resolved to `entity`.
    pub fn references_to(&self, entity: EntityKey) -> &[PropertyKey] {
        self.state
            .backrefs
            .get(&entity)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    pub fn indi(&self, key: EntityKey) -> Option<Indi<'_>> {
        let entity = self.entity(key)?;
        (entity.tag() == self.grammar.individual_tag()).then(|| Indi::new(entity))
    }

    pub fn fam(&self, key: EntityKey) -> Option<Fam<'_>> {
        let entity = self.entity(key)?;
        (entity.tag() == self.grammar.family_tag()).then(|| Fam::new(entity))
    }

    pub fn indi_by_id(&self, id: &str) -> Option<Indi<'_>> {
        self.get_entity(self.grammar.individual_tag(), id)
            .and_then(|key| self.indi(key))
    }

    pub fn fam_by_id(&self, id: &str) -> Option<Fam<'_>> {
        self.get_entity(self.grammar.family_tag(), id)
            .and_then(|key| self.fam(key))
    }

    // ── Properties ───────────────────────────────────────────────────

    pub(crate) fn node(&self, key: PropertyKey) -> Option<&PropertyNode> {
        if key.doc != self.document {
            return None;
        }
        self.state.nodes.get(key.slot)?.as_ref()
    }

    pub(crate) fn record(&self, key: EntityKey) -> Option<&EntityRecord> {
        if key.doc != self.document {
            return None;
        }
        self.state.entities.get(key.slot)?.as_ref()
    }

    /// Raw node access bypassing the journal, for corrupting documents in tests.
    #[cfg(test)]
    pub(crate) fn raw_node_mut(&mut self, key: PropertyKey) -> Option<&mut PropertyNode> {
        self.state.nodes.get_mut(key.slot)?.as_mut()
    }

    pub fn property(&self, key: PropertyKey) -> Option<PropertyRef<'_>> {
        self.node(key).map(|node| PropertyRef::new(self, key, node))
    }

    pub fn get_children(&self, key: PropertyKey) -> Result<&[PropertyKey]> {
        self.node(key)
            .map(|node| node.children.as_slice())
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))
    }

    pub fn get_child(&self, key: PropertyKey, index: usize) -> Result<PropertyKey> {
        let children = self.get_children(key)?;
        children.get(index).copied().ok_or(GedcomError::Index {
            index,
            len: children.len(),
        })
    }

    pub fn parent_of(&self, key: PropertyKey) -> Option<PropertyKey> {
        self.node(key)?.parent
    }

    /// The record owning a property, found by walking to the tree root.
    pub fn entity_of(&self, key: PropertyKey) -> Option<EntityKey> {
        let mut current = key;
        loop {
            let node = self.node(current)?;
            match node.parent {
                Some(parent) => current = parent,
                None => return node.entity,
            }
        }
    }

    /// Tags from the tree root down to `key`.
    pub fn tag_path(&self, key: PropertyKey) -> Option<TagPath> {
        let mut tags = Vec::new();
        let mut current = Some(key);
        while let Some(k) = current {
            let node = self.node(k)?;
            tags.push(node.tag.clone());
            current = node.parent;
        }
        tags.reverse();
        Some(TagPath::from_segments(tags))
    }

    /// Location of an attached property, `None` while detached.
    pub fn location(&self, key: PropertyKey) -> Option<PropertyLocation> {
        let mut path = Vec::new();
        let mut current = key;
        loop {
            let node = self.node(current)?;
            match node.parent {
                Some(parent) => {
                    let siblings = &self.node(parent)?.children;
                    path.push(siblings.iter().position(|k| *k == current)?);
                    current = parent;
                }
                None => {
                    let record = self.record(node.entity?)?;
                    path.reverse();
                    return Some(PropertyLocation {
                        entity: EntityLocation::new(&record.tag, &record.id),
                        path,
                    });
                }
            }
        }
    }

    pub fn resolve_location(&self, location: &PropertyLocation) -> Option<PropertyKey> {
        let entity = self.get_entity(&location.entity.tag, &location.entity.id)?;
        let mut current = self.record(entity)?.root;
        for index in &location.path {
            current = *self.node(current)?.children.get(*index)?;
        }
        Some(current)
    }

    /// First property below `root` matching `path` in document order.
    /// The first path segment must name `root`'s own tag.
    pub fn find_by_path(&self, root: PropertyKey, path: &TagPath) -> Option<PropertyKey> {
        self.find_all_by_path(root, path).next()
    }

    /// Lazily yields every property below `root` matching `path`.
    ///
    /// The iterator borrows the document, so it cannot be held across a
    /// mutation.
    pub fn find_all_by_path<'a>(&'a self, root: PropertyKey, path: &'a TagPath) -> PathMatches<'a> {
        let mut stack = Vec::new();
        if let (Some(node), Some(first)) = (self.node(root), path.first()) {
            if node.tag == first {
                stack.push((root, 0));
            }
        }
        PathMatches {
            gedcom: self,
            path,
            stack,
        }
    }

    pub fn snapshot(&self, key: PropertyKey) -> Option<PropertyTree> {
        self.node(key).map(|node| self.snapshot_node(key, node))
    }

    pub(crate) fn snapshot_node(&self, _key: PropertyKey, node: &PropertyNode) -> PropertyTree {
        PropertyTree {
            tag: node.tag.clone(),
            value: node.value.clone(),
            xref: node.xref,
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        }
    }

    /// Every cross-reference below `key` (inclusive) in document order.
    pub(crate) fn xrefs_in(&self, key: PropertyKey) -> Vec<PropertyKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node(current) {
                if node.xref {
                    out.push(current);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}

/// Depth-first, document-order matches of a tag path.
pub struct PathMatches<'a> {
    gedcom: &'a Gedcom,
    path: &'a TagPath,
    stack: Vec<(PropertyKey, usize)>,
}

impl Iterator for PathMatches<'_> {
    type Item = PropertyKey;

    fn next(&mut self) -> Option<PropertyKey> {
        while let Some((key, depth)) = self.stack.pop() {
            if depth + 1 == self.path.len() {
                return Some(key);
            }
            let Some(next_tag) = self.path.get(depth + 1) else {
                continue;
            };
            if let Some(node) = self.gedcom.node(key) {
                for child in node.children.iter().rev() {
                    if self.gedcom.node(*child).is_some_and(|c| c.tag == next_tag) {
                        self.stack.push((*child, depth + 1));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ListenerResult;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn root_of(gedcom: &Gedcom, key: EntityKey) -> PropertyKey {
        gedcom.entity(key).unwrap().root_key()
    }

    /// I1 and I2 are husband and wife of F1.
    fn couple() -> (Gedcom, EntityKey, EntityKey, EntityKey) {
        let mut gedcom = Gedcom::new();
        let (i1, i2, f1) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let i1 = tx.create_entity("INDI", None)?;
                let i2 = tx.create_entity("INDI", None)?;
                let f1 = tx.create_entity("FAM", None)?;
                tx.set_spouse(f1, i1)?;
                tx.set_spouse(f1, i2)?;
                Ok((i1, i2, f1))
            })
            .unwrap();
        (gedcom, i1, i2, f1)
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl GedcomListener for Recorder {
        fn on_event(&mut self, _gedcom: &Gedcom, event: &GedcomEvent) -> ListenerResult {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, event.kind()));
            Ok(())
        }

        fn on_batch_committed(&mut self, _gedcom: &Gedcom, _events: &[GedcomEvent]) -> ListenerResult {
            self.log.lock().unwrap().push(format!("{}:batch", self.name));
            Ok(())
        }
    }

    struct Panicking;

    impl GedcomListener for Panicking {
        fn on_event(&mut self, _gedcom: &Gedcom, _event: &GedcomEvent) -> ListenerResult {
            panic!("listener failure");
        }
    }

    struct Failing;

    impl GedcomListener for Failing {
        fn on_event(&mut self, _gedcom: &Gedcom, _event: &GedcomEvent) -> ListenerResult {
            Err("listener refused the event".into())
        }
    }

    fn recording(gedcom: &mut Gedcom) -> Arc<Mutex<Vec<GedcomEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        gedcom.add_listener(move |_: &Gedcom, event: &GedcomEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    #[test]
    fn test_husband_and_wife_are_linked_both_ways() {
        let (gedcom, i1, i2, f1) = couple();
        assert_eq!(gedcom.entity(i1).unwrap().id(), "I1");
        assert_eq!(gedcom.entity(i2).unwrap().id(), "I2");
        assert_eq!(gedcom.entity(f1).unwrap().id(), "F1");

        let fam = gedcom.fam(f1).unwrap();
        assert_eq!(fam.husband().unwrap().key(), i1);
        assert_eq!(fam.wife().unwrap().key(), i2);

        let fams = gedcom.entity(i1).unwrap().property("FAMS").unwrap();
        assert_eq!(fams.value(), "F1");
        assert_eq!(fams.target().unwrap().key(), f1);
        assert_eq!(fams.peer().unwrap().tag(), "HUSB");
        assert_eq!(fams.role(), Some(crate::grammar::XRefRole::SpouseInFamily));
        // taking a slot records no SEX
        assert!(gedcom.entity(i1).unwrap().property("SEX").is_none());
        assert!(gedcom.entity(i2).unwrap().property("SEX").is_none());

        assert_eq!(gedcom.references_to(f1).len(), 2);
        assert_eq!(gedcom.references_to(i1).len(), 1);
        assert_eq!(gedcom.len(), 3);
        assert_eq!(gedcom.entity_tags(), vec!["INDI", "FAM"]);
    }

    #[test]
    fn test_failed_unit_of_work_leaves_no_trace() {
        let (mut gedcom, i1, _, _) = couple();
        let events = recording(&mut gedcom);
        let before = gedcom.state.clone();

        let err = gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let root = root_of(tx, i1);
                tx.add_property(root, "NAME", "John /Doe/")?;
                tx.add_property(root, "OCCU", "Miller")?;
                tx.add_property(root, "NOTE", "third")?;
                tx.create_entity("INDI", Some("I1"))?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, GedcomError::DuplicateId { .. }));
        assert_eq!(gedcom.state, before);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(gedcom.entity(i1).unwrap().root().child_count(), 1);
    }

    #[test]
    fn test_rollback_after_deletes_and_links() {
        let (mut gedcom, i1, i2, f1) = couple();
        let before = gedcom.state.clone();

        let err = gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                tx.swap_spouses(f1)?;
                tx.delete_entity(i1)?;
                let child = tx.create_entity("INDI", None)?;
                tx.add_family_child(f1, child)?;
                tx.remove_spouse(f1, i2)?;
                tx.delete_entity(f1)?;
                Err(GedcomError::Other("abort".into()))
            })
            .unwrap_err();

        assert!(matches!(err, GedcomError::Other(_)));
        assert_eq!(gedcom.state, before);
        assert_eq!(gedcom.fam(f1).unwrap().husband().unwrap().key(), i1);
    }

    #[test]
    fn test_panic_in_work_rolls_back() {
        let (mut gedcom, i1, _, _) = couple();
        let before = gedcom.state.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gedcom.do_unit_of_work(|tx| -> Result<()> {
                let root = root_of(tx, i1);
                tx.add_property(root, "NAME", "Half /Done/")?;
                panic!("work failed halfway");
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(gedcom.state, before);
    }

    #[test]
    fn test_generated_ids_are_unique_per_tag() {
        let mut gedcom = Gedcom::new();
        let keys = gedcom
            .do_unit_of_work(|tx| -> Result<Vec<EntityKey>> {
                let mut keys = Vec::new();
                for _ in 0..3 {
                    keys.push(tx.create_entity("INDI", None)?);
                }
                keys.push(tx.create_entity("FAM", None)?);
                Ok(keys)
            })
            .unwrap();
        let ids: Vec<&str> = keys.iter().map(|k| gedcom.entity(*k).unwrap().id()).collect();
        assert_eq!(ids, vec!["I1", "I2", "I3", "F1"]);

        let dup = gedcom.do_unit_of_work(|tx| tx.create_entity("INDI", Some("I2")));
        assert!(matches!(dup, Err(GedcomError::DuplicateId { .. })));
        let bad = gedcom.do_unit_of_work(|tx| tx.create_entity("INDI", Some("I 9")));
        assert!(matches!(bad, Err(GedcomError::Structure(_))));

        let next = gedcom.do_unit_of_work(|tx| tx.create_entity("INDI", None)).unwrap();
        assert_eq!(gedcom.entity(next).unwrap().id(), "I4");

        gedcom.do_unit_of_work(|tx| tx.delete_entity(keys[1])).unwrap();
        assert!(gedcom.get_entity("INDI", "I2").is_none());
        let reused = gedcom.do_unit_of_work(|tx| tx.create_entity("INDI", None)).unwrap();
        assert_eq!(gedcom.entity(reused).unwrap().id(), "I2");
        assert_ne!(reused, keys[1]);
    }

    #[test]
    fn test_delete_entity_unlinks_every_reference() {
        let mut gedcom = Gedcom::new();
        let (note, people) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let note = tx.create_entity("NOTE", Some("N1"))?;
                let mut people = Vec::new();
                for _ in 0..3 {
                    let indi = tx.create_entity("INDI", None)?;
                    let root = root_of(tx, indi);
                    tx.add_xref(root, "NOTE", "N1")?;
                    people.push(indi);
                }
                Ok((note, people))
            })
            .unwrap();
        assert_eq!(gedcom.references_to(note).len(), 3);

        gedcom.do_unit_of_work(|tx| tx.delete_entity(note)).unwrap();
        assert!(gedcom.get_entity("NOTE", "N1").is_none());
        assert!(gedcom.references_to(note).is_empty());
        for indi in people {
            assert!(gedcom.entity(indi).unwrap().property("NOTE").is_none());
        }

        let missing = gedcom.do_unit_of_work(|tx| tx.delete_entity(note));
        assert!(matches!(missing, Err(GedcomError::NotFound(_))));
    }

    #[test]
    fn test_delete_spouse_clears_family_slot() {
        let (mut gedcom, i1, i2, f1) = couple();
        gedcom.do_unit_of_work(|tx| tx.delete_entity(i1)).unwrap();

        let fam = gedcom.fam(f1).unwrap();
        assert!(fam.husband().is_none());
        assert_eq!(fam.wife().unwrap().key(), i2);
        assert!(gedcom.entity(f1).unwrap().property("HUSB").is_none());
        assert_eq!(gedcom.references_to(f1).len(), 1);
    }

    #[test]
    fn test_swap_spouses() {
        let (mut gedcom, i1, i2, f1) = couple();
        gedcom.do_unit_of_work(|tx| tx.swap_spouses(f1)).unwrap();

        let fam = gedcom.fam(f1).unwrap();
        assert_eq!(fam.husband().unwrap().key(), i2);
        assert_eq!(fam.wife().unwrap().key(), i1);

        let i1_ref = gedcom.entity(i1).unwrap();
        assert_eq!(i1_ref.properties().filter(|p| p.tag() == "FAMS").count(), 1);
        assert_eq!(i1_ref.property("FAMS").unwrap().peer().unwrap().tag(), "WIFE");
        let tags: Vec<&str> = gedcom.entity(f1).unwrap().properties().map(|p| p.tag()).collect();
        assert_eq!(tags, vec!["HUSB", "WIFE"]);
    }

    #[test]
    fn test_swap_without_spouses_is_noop() {
        let mut gedcom = Gedcom::new();
        let fam = gedcom.do_unit_of_work(|tx| tx.create_entity("FAM", None)).unwrap();
        let events = recording(&mut gedcom);
        gedcom.do_unit_of_work(|tx| tx.swap_spouses(fam)).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unlink_then_link_restores_reciprocal() {
        let (mut gedcom, i1, _, f1) = couple();
        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let husb = tx.entity(f1).unwrap().property("HUSB").unwrap().key();
                tx.unlink(husb)?;
                assert!(tx.entity(i1).unwrap().property("FAMS").is_none());
                tx.unlink(husb)?;
                tx.link(husb)?;
                tx.link(husb)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(gedcom.fam(f1).unwrap().husband().unwrap().key(), i1);
        let fams = gedcom.entity(i1).unwrap().property("FAMS").unwrap();
        assert_eq!(fams.target().unwrap().key(), f1);
        assert_eq!(gedcom.references_to(i1).len(), 1);
    }

    #[test]
    fn test_unlink_then_link_keeps_reciprocal_content() {
        let mut gedcom =
            crate::persist::read_str("0 @I1@ INDI\n1 FAMC @F1@\n2 PEDI adopted\n0 @F1@ FAM\n1 CHIL @I1@\n")
                .unwrap();
        let i1 = gedcom.get_entity("INDI", "I1").unwrap();
        let f1 = gedcom.get_entity("FAM", "F1").unwrap();
        let before = gedcom.entity(i1).unwrap().root().snapshot();

        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let chil = tx.entity(f1).unwrap().property("CHIL").unwrap().key();
                tx.unlink(chil)?;
                let famc = tx.entity(i1).unwrap().property("FAMC").unwrap();
                assert!(!famc.is_linked());
                assert_eq!(famc.property("PEDI").unwrap().value(), "adopted");
                tx.link(chil)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(gedcom.entity(i1).unwrap().root().snapshot(), before);
        let famc = gedcom.entity(i1).unwrap().property("FAMC").unwrap();
        assert_eq!(famc.target().unwrap().key(), f1);
        assert_eq!(famc.peer().unwrap().tag(), "CHIL");
        assert_eq!(gedcom.references_to(i1).len(), 1);

        // left unlinked, the reciprocal goes at commit along with its content
        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let chil = tx.entity(f1).unwrap().property("CHIL").unwrap().key();
                tx.remove_property(chil)
            })
            .unwrap();
        assert!(gedcom.entity(i1).unwrap().property("FAMC").is_none());
        assert!(gedcom.references_to(f1).is_empty());
        assert!(gedcom.references_to(i1).is_empty());
    }

    #[test]
    fn test_delete_family_drops_reciprocal_with_content() {
        let mut gedcom =
            crate::persist::read_str("0 @I1@ INDI\n1 FAMC @F1@\n2 PEDI birth\n0 @F1@ FAM\n1 CHIL @I1@\n")
                .unwrap();
        let i1 = gedcom.get_entity("INDI", "I1").unwrap();
        let f1 = gedcom.get_entity("FAM", "F1").unwrap();

        gedcom.do_unit_of_work(|tx| tx.delete_entity(f1)).unwrap();
        assert!(gedcom.entity(f1).is_none());
        assert_eq!(gedcom.entity(i1).unwrap().root().child_count(), 0);
    }

    #[test]
    fn test_keys_of_another_document_are_not_found() {
        let (mut other, other_i1, _, other_f1) = couple();
        let (mut gedcom, i1, _, f1) = couple();
        let before = gedcom.state.clone();

        assert!(gedcom.entity(other_i1).is_none());
        assert!(gedcom.property(root_of(&other, other_i1)).is_none());
        assert!(gedcom.fam(other_f1).is_none());

        let err = gedcom.do_unit_of_work(|tx| tx.delete_entity(other_i1)).unwrap_err();
        assert!(matches!(err, GedcomError::NotFound(_)));
        let err = gedcom.do_unit_of_work(|tx| tx.add_family_child(other_f1, i1)).unwrap_err();
        assert!(matches!(err, GedcomError::NotFound(_)));
        let foreign_root = root_of(&other, other_i1);
        let err = gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let note = tx.create_property("NOTE", "text")?;
                tx.add_child(foreign_root, note, None)
            })
            .unwrap_err();
        assert!(matches!(err, GedcomError::NotFound(_)));
        assert_eq!(gedcom.state, before);

        // the same keys still work in their own document
        other.do_unit_of_work(|tx| tx.delete_entity(other_i1)).unwrap();
        assert_eq!(other.len(), 2);
        assert_eq!(gedcom.len(), 3);
        assert_eq!(gedcom.fam(f1).unwrap().husband().unwrap().key(), i1);
    }

    #[test]
    fn test_removed_keys_are_never_reused() {
        let (mut gedcom, i1, _, _) = couple();
        let note = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let root = root_of(tx, i1);
                tx.add_property(root, "NOTE", "first")
            })
            .unwrap();
        let slots = gedcom.state.nodes.len();

        let replacement = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                tx.remove_property(note)?;
                let root = root_of(tx, i1);
                tx.add_property(root, "NOTE", "second")
            })
            .unwrap();
        assert_ne!(replacement, note);
        assert!(gedcom.property(note).is_none());
        assert_eq!(gedcom.property(replacement).unwrap().value(), "second");
        assert_eq!(gedcom.state.nodes.len(), slots + 1);

        let saved = crate::persist::write_string(&gedcom).unwrap();
        let reloaded = crate::persist::read_str(&saved).unwrap();
        assert!(reloaded.state.nodes.iter().all(Option::is_some));
    }

    #[test]
    fn test_unresolved_reference_fails_commit() {
        let (mut gedcom, i1, _, f1) = couple();
        let before = gedcom.state.clone();

        let err = gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let root = root_of(tx, i1);
                tx.insert_tree(root, None, &PropertyTree::xref("NOTE", "N9"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            GedcomError::UnresolvedReference { ref id, ref target, .. } if id == "N9" && target == "NOTE"
        ));
        assert_eq!(gedcom.state, before);

        let err = gedcom
            .do_unit_of_work(|tx| {
                let husb = tx.entity(f1).unwrap().property("HUSB").unwrap().key();
                tx.unlink(husb)
            })
            .unwrap_err();
        assert!(matches!(err, GedcomError::UnresolvedReference { .. }));
        assert_eq!(gedcom.state, before);

        let err = gedcom
            .do_unit_of_work(|tx| {
                let root = root_of(tx, i1);
                tx.add_xref(root, "NOTE", "N9")
            })
            .unwrap_err();
        assert!(matches!(err, GedcomError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_pasted_tree_links_once_target_exists() {
        let (mut gedcom, i1, _, _) = couple();
        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let root = root_of(tx, i1);
                let tree = PropertyTree::new("BIRT", "")
                    .with_child(PropertyTree::new("DATE", "1 JAN 1900"))
                    .with_child(PropertyTree::xref("SOUR", "S1"));
                let birt = tx.insert_tree(root, Some(0), &tree)?;
                tx.create_entity("SOUR", Some("S1"))?;
                tx.link_subtree(birt)
            })
            .unwrap();

        let source = gedcom.get_entity("SOUR", "S1").unwrap();
        let sour = gedcom.entity(i1).unwrap().find("INDI:BIRT:SOUR").unwrap();
        assert_eq!(sour.target().unwrap().key(), source);
        assert_eq!(gedcom.references_to(source), &[sour.key()]);
        assert_eq!(sour.location().unwrap().path, vec![0, 1]);
    }

    #[test]
    fn test_spouse_capacity_and_displacement() {
        let mut gedcom = Gedcom::new();
        let (a, b, c, fam) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let mut indi = |sex: &str| -> Result<EntityKey> {
                    let key = tx.create_entity("INDI", None)?;
                    let root = root_of(tx, key);
                    tx.add_property(root, "SEX", sex)?;
                    Ok(key)
                };
                let a = indi("M")?;
                let b = indi("M")?;
                let c = indi("U")?;
                let fam = tx.create_entity("FAM", None)?;
                tx.set_spouse(fam, a)?;
                Ok((a, b, c, fam))
            })
            .unwrap();

        let err = gedcom.do_unit_of_work(|tx| tx.set_spouse(fam, b)).unwrap_err();
        assert!(matches!(err, GedcomError::Capacity(_)));
        let err = gedcom.do_unit_of_work(|tx| tx.set_spouse(fam, a)).unwrap_err();
        assert!(matches!(err, GedcomError::Structure(_)));

        gedcom.do_unit_of_work(|tx| tx.set_spouse(fam, c)).unwrap();
        assert_eq!(gedcom.fam(fam).unwrap().wife().unwrap().key(), c);
        let err = gedcom.do_unit_of_work(|tx| tx.set_spouse(fam, b)).unwrap_err();
        assert!(matches!(err, GedcomError::Capacity(_)));

        // an unknown-sex husband makes room for a known male
        let (second, unknown) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let second = tx.create_entity("FAM", None)?;
                let unknown = tx.create_entity("INDI", None)?;
                tx.set_spouse(second, unknown)?;
                tx.set_spouse(second, b)?;
                Ok((second, unknown))
            })
            .unwrap();
        let family = gedcom.fam(second).unwrap();
        assert_eq!(family.husband().unwrap().key(), b);
        assert_eq!(family.wife().unwrap().key(), unknown);
        let fams = gedcom.entity(unknown).unwrap().property("FAMS").unwrap();
        assert_eq!(fams.peer().unwrap().tag(), "WIFE");
        let tags: Vec<&str> = family.entity().properties().map(|p| p.tag()).collect();
        assert_eq!(tags, vec!["HUSB", "WIFE"]);
    }

    #[test]
    fn test_raw_husband_reference_respects_capacity() {
        let (mut gedcom, _, _, f1) = couple();
        let err = gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                tx.create_entity("INDI", Some("I9"))?;
                let root = root_of(tx, f1);
                tx.add_xref(root, "HUSB", "I9")?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GedcomError::Capacity(_)));
    }

    #[test]
    fn test_genealogical_cycles_are_rejected() {
        let mut gedcom = Gedcom::new();
        let (a, c, f1, f2) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let a = tx.create_entity("INDI", None)?;
                let c = tx.create_entity("INDI", None)?;
                let f1 = tx.create_entity("FAM", None)?;
                let f2 = tx.create_entity("FAM", None)?;
                tx.set_spouse(f1, a)?;
                tx.add_family_child(f1, c)?;
                tx.set_spouse(f2, c)?;
                Ok((a, c, f1, f2))
            })
            .unwrap();

        let err = gedcom.do_unit_of_work(|tx| tx.add_family_child(f2, a)).unwrap_err();
        assert!(matches!(err, GedcomError::Structure(_)));
        let err = gedcom.do_unit_of_work(|tx| tx.set_spouse(f1, c)).unwrap_err();
        assert!(matches!(err, GedcomError::Structure(_)));
        let err = gedcom.do_unit_of_work(|tx| tx.add_family_child(f1, c)).unwrap_err();
        assert!(matches!(err, GedcomError::Structure(_)));
        let err = gedcom.do_unit_of_work(|tx| tx.add_family_child(f2, c)).unwrap_err();
        assert!(matches!(err, GedcomError::Structure(_)));

        gedcom.do_unit_of_work(|tx| tx.remove_family_child(f1, c)).unwrap();
        assert!(gedcom.indi(c).unwrap().family_as_child().is_none());
        assert_eq!(gedcom.fam(f1).unwrap().child_count(), 0);
    }

    #[test]
    fn test_add_child_structure_errors() {
        let (mut gedcom, i1, i2, _) = couple();
        let (outer, inner) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let root = root_of(tx, i1);
                let other_root = root_of(tx, i2);
                let note = tx.add_property(root, "NOTE", "text")?;
                assert!(matches!(tx.add_child(other_root, note, None), Err(GedcomError::Structure(_))));
                assert!(matches!(tx.add_child(root, other_root, None), Err(GedcomError::Structure(_))));

                let outer = tx.create_property("EVEN", "")?;
                let inner = tx.create_property("TYPE", "x")?;
                tx.add_child(outer, inner, None)?;
                assert!(matches!(tx.add_child(inner, outer, None), Err(GedcomError::Structure(_))));
                assert!(matches!(
                    tx.add_child(root, outer, Some(99)),
                    Err(GedcomError::Index { index: 99, .. })
                ));
                assert!(matches!(tx.remove_child(root, inner), Err(GedcomError::NotFound(_))));
                assert!(matches!(tx.get_child(root, 50), Err(GedcomError::Index { index: 50, .. })));
                Ok((outer, inner))
            })
            .unwrap();

        // detached nodes do not survive the commit
        assert!(gedcom.property(outer).is_none());
        assert!(gedcom.property(inner).is_none());
        assert_eq!(gedcom.entity(i1).unwrap().root().child_count(), 2);
    }

    #[test]
    fn test_find_by_path_backtracks() {
        let mut gedcom = Gedcom::new();
        let indi = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let indi = tx.create_entity("INDI", None)?;
                let root = root_of(tx, indi);
                tx.insert_tree(root, None, &PropertyTree::new("BIRT", "").with_child(PropertyTree::new("PLAC", "Here")))?;
                tx.insert_tree(root, None, &PropertyTree::new("BIRT", "").with_child(PropertyTree::new("DATE", "1900")))?;
                tx.insert_tree(root, None, &PropertyTree::new("BIRT", "").with_child(PropertyTree::new("DATE", "1901")))?;
                Ok(indi)
            })
            .unwrap();

        let root = root_of(&gedcom, indi);
        let date = gedcom.find_by_path(root, &TagPath::parse("INDI:BIRT:DATE").unwrap()).unwrap();
        assert_eq!(gedcom.property(date).unwrap().value(), "1900");

        let path = TagPath::parse("INDI/BIRT/DATE").unwrap();
        let dates: Vec<&str> = gedcom
            .find_all_by_path(root, &path)
            .map(|k| gedcom.property(k).unwrap().value())
            .collect();
        assert_eq!(dates, vec!["1900", "1901"]);

        assert!(gedcom.find_by_path(root, &TagPath::parse("FAM:BIRT").unwrap()).is_none());
        assert_eq!(gedcom.find_by_path(root, &TagPath::parse("INDI").unwrap()), Some(root));
        assert_eq!(gedcom.tag_path(date).unwrap().to_string(), "INDI:BIRT:DATE");
        let location = gedcom.location(date).unwrap();
        assert_eq!(location.path, vec![1, 0]);
        assert_eq!(gedcom.resolve_location(&location), Some(date));
    }

    #[test]
    fn test_nested_unit_of_work_shares_rollback() {
        let mut gedcom = Gedcom::new();
        let result = gedcom.do_unit_of_work(|tx| -> Result<()> {
            tx.create_entity("INDI", Some("X"))?;
            tx.do_unit_of_work(|tx| -> Result<()> {
                tx.create_entity("INDI", Some("Y"))?;
                Err(GedcomError::Other("inner failure".into()))
            })?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(gedcom.is_empty());

        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                tx.create_entity("INDI", Some("X"))?;
                tx.do_unit_of_work(|tx| tx.create_entity("INDI", Some("Y")))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(gedcom.entity_count("INDI"), 2);
    }

    #[test]
    fn test_events_carry_locations_and_snapshots() {
        let mut gedcom = Gedcom::new();
        let events = recording(&mut gedcom);
        let indi = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let indi = tx.create_entity("INDI", None)?;
                let root = root_of(tx, indi);
                let name = tx.add_property(root, "NAME", "Jon /Doe/")?;
                tx.set_value(name, "John /Doe/")?;
                tx.set_value(name, "John /Doe/")?;
                Ok(indi)
            })
            .unwrap();

        let events = events.lock().unwrap();
        let kinds: Vec<&str> = events.iter().map(GedcomEvent::kind).collect();
        assert_eq!(kinds, vec!["entity_added", "property_added", "property_changed"]);
        match &events[1] {
            GedcomEvent::PropertyAdded { location, snapshot, .. } => {
                assert_eq!(location.entity, EntityLocation::new("INDI", "I1"));
                assert_eq!(location.path, vec![0]);
                assert_eq!(snapshot, &PropertyTree::new("NAME", "Jon /Doe/"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[2] {
            GedcomEvent::PropertyChanged { old_value, new_value, .. } => {
                assert_eq!(old_value, "Jon /Doe/");
                assert_eq!(new_value, "John /Doe/");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(gedcom.indi(indi).unwrap().name(), Some("John /Doe/"));
    }

    #[test]
    fn test_changing_xref_value_moves_link() {
        let mut gedcom = Gedcom::new();
        let (n1, n2, note) = gedcom
            .do_unit_of_work(|tx| -> Result<_> {
                let n1 = tx.create_entity("NOTE", None)?;
                let n2 = tx.create_entity("NOTE", None)?;
                let indi = tx.create_entity("INDI", None)?;
                let root = root_of(tx, indi);
                let note = tx.add_xref(root, "NOTE", "N1")?;
                Ok((n1, n2, note))
            })
            .unwrap();

        gedcom.do_unit_of_work(|tx| tx.set_value(note, "N2")).unwrap();
        assert!(gedcom.references_to(n1).is_empty());
        assert_eq!(gedcom.references_to(n2), &[note]);
        assert_eq!(gedcom.property(note).unwrap().target().unwrap().key(), n2);
    }

    #[test]
    fn test_listeners_are_isolated_and_ordered() {
        let mut gedcom = Gedcom::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        gedcom.add_listener(Recorder {
            name: "a",
            log: Arc::clone(&log),
        });
        gedcom.add_listener(Panicking);
        gedcom.add_listener(Failing);
        let b = gedcom.add_listener(Recorder {
            name: "b",
            log: Arc::clone(&log),
        });
        assert_eq!(gedcom.listener_count(), 4);

        gedcom
            .do_unit_of_work(|tx| -> Result<()> {
                let indi = tx.create_entity("INDI", None)?;
                let root = root_of(tx, indi);
                tx.add_property(root, "NAME", "Ada /Lovelace/")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:entity_added",
                "a:property_added",
                "a:batch",
                "b:entity_added",
                "b:property_added",
                "b:batch",
            ]
        );
        assert_eq!(gedcom.entity_count("INDI"), 1);

        log.lock().unwrap().clear();
        assert!(gedcom.remove_listener(b));
        gedcom.do_muted_unit_of_work(|tx| tx.create_entity("INDI", None)).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(gedcom.entity_count("INDI"), 2);
    }
}
