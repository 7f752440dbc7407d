// Cross-reference linking - target resolution, reciprocal properties and the reverse index

use super::Transaction;
use crate::entity::{EntityKey, EntityLocation};
use crate::error::{GedcomError, Result};
use crate::events::GedcomEvent;
use crate::grammar::{ReferenceRule, XRefRole};
use crate::property::{Link, PropertyKey, PropertyLocation};
use std::sync::Arc;

impl Transaction<'_> {
    /// Resolve a cross-reference against the record its grammar rule
    /// targets and register the reciprocal side.
    ///
    /// Paired references reuse an unlinked reciprocal property on the
    /// target carrying the right id, or create one. Linking an already
    /// linked reference does nothing.
    pub fn link(&mut self, key: PropertyKey) -> Result<()> {
        let node = self
            .node(key)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))?;
        if !node.xref {
            return Err(GedcomError::Structure(format!(
                "{} is not a cross-reference",
                node.tag
            )));
        }
        if node.link.is_some() {
            return Ok(());
        }
        let tag = node.tag.clone();
        let value = node.value.clone();

        let owner = self.entity_of(key).ok_or_else(|| {
            GedcomError::Structure(format!("Cannot link {tag} @{value}@ before it is attached to a record"))
        })?;
        let rule = self.rule_for(key)?;
        let target = self.get_entity(&rule.target, &value).ok_or_else(|| {
            GedcomError::UnresolvedReference {
                tag: tag.clone(),
                id: value.clone(),
                target: rule.target.clone(),
            }
        })?;

        match rule.role {
            XRefRole::Plain => self.attach(key, owner, target, None),
            XRefRole::Husband | XRefRole::Wife => {
                self.check_slot_free(owner, &tag, key)?;
                self.check_not_spouse(owner, target)?;
                self.check_spouse_acyclic(owner, target)?;
                let peer = self.reciprocal(target, XRefRole::SpouseInFamily, owner)?;
                self.attach(key, owner, target, Some(peer))
            }
            XRefRole::Child => {
                self.check_not_child(owner, target, key)?;
                self.check_child_acyclic(owner, target)?;
                let peer = self.reciprocal(target, XRefRole::ChildInFamily, owner)?;
                self.attach(key, owner, target, Some(peer))
            }
            XRefRole::SpouseInFamily => {
                self.check_not_spouse(target, owner)?;
                self.check_spouse_acyclic(target, owner)?;
                if let Some(slot) = self.unlinked_spouse_slot(target, owner) {
                    let slot_tag = self.node(slot).map(|n| n.tag.clone()).unwrap_or_default();
                    self.check_slot_free(target, &slot_tag, slot)?;
                    return self.attach(key, owner, target, Some(slot));
                }
                self.assign_spouse(target, owner)?;
                if self.node(key).is_some_and(|n| n.link.is_none()) {
                    return Err(GedcomError::Structure(format!(
                        "{tag} @{value}@ duplicates an existing family reference"
                    )));
                }
                Ok(())
            }
            XRefRole::ChildInFamily => {
                self.check_not_child(target, owner, key)?;
                self.check_child_acyclic(target, owner)?;
                let peer = self.reciprocal(target, XRefRole::Child, owner)?;
                self.attach(key, owner, target, Some(peer))
            }
        }
    }

    /// Drop a cross-reference's link. Unlinking an unlinked reference does
    /// nothing.
    ///
    /// A bare reciprocal property of a paired reference only mirrors its
    /// partner and is removed with it. A reciprocal carrying sub-properties
    /// (`FAMC` with `PEDI`, say) stays in place unlinked, so linking the
    /// reference again in the same unit of work picks it up with its
    /// content; if nothing links it by commit, it is removed then.
    pub fn unlink(&mut self, key: PropertyKey) -> Result<()> {
        let Some(link) = self.detach(key)? else {
            return Ok(());
        };
        let Some(peer) = link.peer else {
            return Ok(());
        };
        let Some((parent, has_content)) = self.node(peer).map(|n| (n.parent, !n.children.is_empty())) else {
            return Ok(());
        };
        match parent {
            Some(_) if has_content => {
                self.orphaned.insert(peer);
            }
            Some(parent) => self.remove_child(parent, peer)?,
            None => {}
        }
        Ok(())
    }

    /// Link every unresolved cross-reference below `root` in document order.
    pub fn link_subtree(&mut self, root: PropertyKey) -> Result<()> {
        for xref in self.xrefs_in(root) {
            if self.node(xref).is_some_and(|n| n.link.is_none()) {
                self.link(xref)?;
            }
        }
        Ok(())
    }

    /// Link the reference at `location` to `target`, pairing it with the
    /// property at `peer` as is, without any policy checks.
    pub(crate) fn link_raw(
        &mut self,
        location: &PropertyLocation,
        target: &EntityLocation,
        peer: Option<&PropertyLocation>,
    ) -> Result<()> {
        let key = self.resolve(location)?;
        if self.node(key).is_some_and(|n| n.link.is_some()) {
            return Err(GedcomError::Structure(format!("Reference at {location:?} is already linked")));
        }
        let owner = self
            .entity_of(key)
            .ok_or_else(|| GedcomError::Structure(format!("Reference at {location:?} is detached")))?;
        let target_key = self.get_entity(&target.tag, &target.id).ok_or_else(|| {
            GedcomError::NotFound(format!("record {target}"))
        })?;
        let peer = match peer {
            Some(peer_location) => {
                let peer = self.resolve(peer_location)?;
                if self.entity_of(peer) != Some(target_key) || self.node(peer).is_some_and(|n| n.link.is_some()) {
                    return Err(GedcomError::Structure(format!(
                        "Property at {peer_location:?} cannot pair with {location:?}"
                    )));
                }
                Some(peer)
            }
            None => None,
        };
        self.attach(key, owner, target_key, peer)
    }

    /// Clear the link at `location` on both sides, leaving any reciprocal
    /// property in place.
    pub(crate) fn unlink_raw(&mut self, location: &PropertyLocation) -> Result<()> {
        let key = self.resolve(location)?;
        self.detach(key).map(|_| ())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn rule_for(&self, key: PropertyKey) -> Result<ReferenceRule> {
        let path = self
            .tag_path(key)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))?;
        self.grammar()
            .reference_rule(&path)
            .cloned()
            .ok_or_else(|| GedcomError::Structure(format!("No reference rule covers {path}")))
    }

    fn attach(&mut self, key: PropertyKey, owner: EntityKey, target: EntityKey, peer: Option<PropertyKey>) -> Result<()> {
        self.write_link(key, Some(Link { target, peer }))?;
        self.push_backref(target, key);
        self.unresolved.remove(&key);
        if let Some(peer) = peer {
            self.write_link(
                peer,
                Some(Link {
                    target: owner,
                    peer: Some(key),
                }),
            )?;
            self.push_backref(owner, peer);
            self.unresolved.remove(&peer);
        }

        if self.emitting() {
            let event = match (self.location(key), self.entity(target)) {
                (Some(location), Some(target)) => Some(GedcomEvent::PropertyLinked {
                    property: key,
                    location,
                    target: target.location(),
                    peer: peer.and_then(|p| self.location(p)),
                }),
                _ => None,
            };
            if let Some(event) = event {
                self.emit(event);
            }
        }
        Ok(())
    }

    /// Clear both sides of a link and their reverse index entries.
    pub(super) fn detach(&mut self, key: PropertyKey) -> Result<Option<Link>> {
        let node = self
            .node(key)
            .ok_or_else(|| GedcomError::NotFound(format!("property {key:?}")))?;
        let Some(link) = node.link else {
            return Ok(None);
        };

        if self.emitting() {
            let event = match (self.location(key), self.entity(link.target)) {
                (Some(location), Some(target)) => Some(GedcomEvent::PropertyUnlinked {
                    property: key,
                    location,
                    target: target.location(),
                    peer: link.peer.and_then(|p| self.location(p)),
                }),
                _ => None,
            };
            if let Some(event) = event {
                self.emit(event);
            }
        }

        self.write_link(key, None)?;
        self.remove_backref(link.target, key);
        if self.entity_of(key).is_some() {
            self.unresolved.insert(key);
        }
        if let Some(peer) = link.peer {
            if let Some(peer_link) = self.node(peer).and_then(|n| n.link) {
                self.write_link(peer, None)?;
                self.remove_backref(peer_link.target, peer);
                self.unresolved.insert(peer);
            }
        }
        Ok(Some(link))
    }

    /// Find or create the reciprocal property of `role` on `target`
    /// pointing back at `owner`.
    fn reciprocal(&mut self, target: EntityKey, role: XRefRole, owner: EntityKey) -> Result<PropertyKey> {
        let grammar = Arc::clone(&self.doc.grammar);
        let tag = grammar
            .role_tag(role)
            .ok_or_else(|| GedcomError::Grammar(format!("No reference declared for role {role:?}")))?;
        let owner_id = self
            .entity(owner)
            .map(|e| e.id().to_string())
            .ok_or_else(|| GedcomError::NotFound(format!("record {owner:?}")))?;
        let root = self
            .entity(target)
            .map(|e| e.root_key())
            .ok_or_else(|| GedcomError::NotFound(format!("record {target:?}")))?;

        let existing = self.get_children(root)?.iter().copied().find(|child| {
            self.node(*child)
                .is_some_and(|n| n.xref && n.link.is_none() && n.tag == tag && n.value == owner_id)
        });
        match existing {
            Some(peer) => Ok(peer),
            None => {
                let peer = self.create_xref(tag, &owner_id)?;
                let position = match role {
                    XRefRole::Husband | XRefRole::Wife | XRefRole::Child => Some(self.slot_position(target, role)?),
                    _ => None,
                };
                self.add_child(root, peer, position)?;
                Ok(peer)
            }
        }
    }

    /// Linked properties directly below a record root with the given role.
    pub(super) fn linked_with_role(&self, entity: EntityKey, role: XRefRole) -> Vec<(PropertyKey, EntityKey)> {
        let Some(tag) = self.grammar().role_tag(role) else {
            return Vec::new();
        };
        let Some(root) = self.entity(entity).map(|e| e.root_key()) else {
            return Vec::new();
        };
        self.get_children(root)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| {
                        let node = self.node(*child)?;
                        let link = node.link?;
                        (node.tag == tag).then_some((*child, link.target))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_slot_free(&self, fam: EntityKey, slot_tag: &str, except: PropertyKey) -> Result<()> {
        let root = self
            .entity(fam)
            .map(|e| e.root_key())
            .ok_or_else(|| GedcomError::NotFound(format!("record {fam:?}")))?;
        let taken = self.get_children(root)?.iter().any(|child| {
            *child != except && self.node(*child).is_some_and(|n| n.tag == slot_tag && n.link.is_some())
        });
        if taken {
            let id = self.entity(fam).map(|e| e.id().to_string()).unwrap_or_default();
            return Err(GedcomError::Capacity(format!("Family @{id}@ already has a {slot_tag}")));
        }
        Ok(())
    }

    fn check_not_spouse(&self, fam: EntityKey, indi: EntityKey) -> Result<()> {
        let already = [XRefRole::Husband, XRefRole::Wife]
            .into_iter()
            .flat_map(|role| self.linked_with_role(fam, role))
            .any(|(_, target)| target == indi);
        if already {
            return Err(GedcomError::Structure(format!(
                "{} is already a spouse in {}",
                self.describe(indi),
                self.describe(fam)
            )));
        }
        Ok(())
    }

    fn check_not_child(&self, fam: EntityKey, indi: EntityKey, except: PropertyKey) -> Result<()> {
        let already = self
            .linked_with_role(fam, XRefRole::Child)
            .into_iter()
            .any(|(key, target)| key != except && target == indi);
        if already {
            return Err(GedcomError::Structure(format!(
                "{} is already a child in {}",
                self.describe(indi),
                self.describe(fam)
            )));
        }
        Ok(())
    }

    /// A spouse cannot be a descendant of their own family.
    fn check_spouse_acyclic(&self, fam: EntityKey, indi: EntityKey) -> Result<()> {
        let cyclic = self
            .fam(fam)
            .is_some_and(|f| f.descendants().iter().any(|d| d.key() == indi));
        if cyclic {
            return Err(GedcomError::Structure(format!(
                "{} is a descendant of {} and cannot be a spouse in it",
                self.describe(indi),
                self.describe(fam)
            )));
        }
        Ok(())
    }

    /// A child cannot be one of the family's spouses or their ancestors.
    fn check_child_acyclic(&self, fam: EntityKey, indi: EntityKey) -> Result<()> {
        let cyclic = self
            .fam(fam)
            .is_some_and(|f| f.ancestors().iter().any(|a| a.key() == indi));
        if cyclic {
            return Err(GedcomError::Structure(format!(
                "{} is an ancestor in {} and cannot be its child",
                self.describe(indi),
                self.describe(fam)
            )));
        }
        Ok(())
    }

    /// An unlinked HUSB/WIFE in `fam` naming `indi`.
    fn unlinked_spouse_slot(&self, fam: EntityKey, indi: EntityKey) -> Option<PropertyKey> {
        let grammar = self.grammar();
        let tags = [
            grammar.role_tag(XRefRole::Husband)?,
            grammar.role_tag(XRefRole::Wife)?,
        ];
        let id = self.entity(indi)?.id();
        let root = self.entity(fam)?.root_key();
        self.get_children(root).ok()?.iter().copied().find(|child| {
            self.node(*child)
                .is_some_and(|n| n.xref && n.link.is_none() && tags.contains(&n.tag.as_str()) && n.value == id)
        })
    }

    pub(super) fn describe(&self, entity: EntityKey) -> String {
        self.entity(entity)
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("{entity:?}"))
    }
}
