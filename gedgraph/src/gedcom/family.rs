// Family membership - spouse slots, children and the displacement policy

use super::Transaction;
use crate::entity::EntityKey;
use crate::error::{GedcomError, Result};
use crate::grammar::XRefRole;
use crate::property::PropertyKey;
use crate::relations::Sex;
use std::sync::Arc;

impl Transaction<'_> {
    /// Make `indi` a spouse of `fam`, choosing the slot from the
    /// individual's sex:
    ///
    /// - unknown sex takes the husband slot if it is empty, else the wife slot
    /// - a known sex takes the matching slot; an occupant there moves to the
    ///   other slot unless their own sex rules it out
    ///
    /// A family with two spouses accepts no further spouse. The slot never
    /// writes back: an individual without a recorded `SEX` gets none from
    /// becoming husband or wife, and an existing `SEX` is left as it is.
    pub fn set_spouse(&mut self, fam: EntityKey, indi: EntityKey) -> Result<PropertyKey> {
        self.require_family(fam)?;
        self.require_individual(indi)?;
        self.assign_spouse(fam, indi)
    }

    /// Exchange husband and wife. Does nothing for a family without spouses.
    pub fn swap_spouses(&mut self, fam: EntityKey) -> Result<()> {
        self.require_family(fam)?;
        let husband = self.linked_with_role(fam, XRefRole::Husband).first().copied();
        let wife = self.linked_with_role(fam, XRefRole::Wife).first().copied();
        if husband.is_none() && wife.is_none() {
            return Ok(());
        }

        let root = self.family_root(fam)?;
        let slots: Vec<PropertyKey> = husband.iter().chain(wife.iter()).map(|(slot, _)| *slot).collect();
        let first = self
            .get_children(root)?
            .iter()
            .position(|child| slots.contains(child))
            .unwrap_or(0);

        // keep the reciprocal FAMS in place so the new slots reuse them
        for slot in &slots {
            self.detach(*slot)?;
        }
        for slot in &slots {
            self.remove_property(*slot)?;
        }

        let mut position = first;
        if let Some((_, former_wife)) = wife {
            self.add_spouse_slot(fam, XRefRole::Husband, former_wife, Some(position))?;
            position += 1;
        }
        if let Some((_, former_husband)) = husband {
            self.add_spouse_slot(fam, XRefRole::Wife, former_husband, Some(position))?;
        }
        Ok(())
    }

    /// Append `indi` as a child of `fam`.
    pub fn add_family_child(&mut self, fam: EntityKey, indi: EntityKey) -> Result<PropertyKey> {
        self.require_family(fam)?;
        let id = self.require_individual(indi)?;
        let tag = self.role_tag(XRefRole::Child)?;
        let root = self.family_root(fam)?;
        let key = self.create_xref(&tag, &id)?;
        self.add_child(root, key, None)?;
        self.link(key)?;
        Ok(key)
    }

    pub fn remove_spouse(&mut self, fam: EntityKey, indi: EntityKey) -> Result<()> {
        self.require_family(fam)?;
        let slot = [XRefRole::Husband, XRefRole::Wife]
            .into_iter()
            .flat_map(|role| self.linked_with_role(fam, role))
            .find(|(_, target)| *target == indi)
            .map(|(slot, _)| slot)
            .ok_or_else(|| {
                GedcomError::NotFound(format!("{} is not a spouse in {}", self.describe(indi), self.describe(fam)))
            })?;
        self.remove_property(slot)
    }

    pub fn remove_family_child(&mut self, fam: EntityKey, indi: EntityKey) -> Result<()> {
        self.require_family(fam)?;
        let slot = self
            .linked_with_role(fam, XRefRole::Child)
            .into_iter()
            .find(|(_, target)| *target == indi)
            .map(|(slot, _)| slot)
            .ok_or_else(|| {
                GedcomError::NotFound(format!("{} is not a child in {}", self.describe(indi), self.describe(fam)))
            })?;
        self.remove_property(slot)
    }

    // ── Internals ────────────────────────────────────────────────────

    pub(super) fn assign_spouse(&mut self, fam: EntityKey, indi: EntityKey) -> Result<PropertyKey> {
        let husband = self.linked_with_role(fam, XRefRole::Husband).first().copied();
        let wife = self.linked_with_role(fam, XRefRole::Wife).first().copied();
        if husband.is_some_and(|(_, h)| h == indi) || wife.is_some_and(|(_, w)| w == indi) {
            return Err(GedcomError::Structure(format!(
                "{} is already a spouse in {}",
                self.describe(indi),
                self.describe(fam)
            )));
        }
        if husband.is_some() && wife.is_some() {
            return Err(GedcomError::Capacity(format!(
                "{} already has two spouses",
                self.describe(fam)
            )));
        }

        let role = match self.sex_of(indi) {
            Sex::Unknown if husband.is_none() => XRefRole::Husband,
            Sex::Unknown => XRefRole::Wife,
            Sex::Male => {
                if let Some((slot, occupant)) = husband {
                    self.displace(fam, slot, occupant, Sex::Male, XRefRole::Wife)?;
                }
                XRefRole::Husband
            }
            Sex::Female => {
                if let Some((slot, occupant)) = wife {
                    self.displace(fam, slot, occupant, Sex::Female, XRefRole::Husband)?;
                }
                XRefRole::Wife
            }
        };
        self.add_spouse_slot(fam, role, indi, None)
    }

    /// Move the occupant of a slot wanted by a spouse of sex `incoming`
    /// over to the `other` slot.
    fn displace(
        &mut self,
        fam: EntityKey,
        slot: PropertyKey,
        occupant: EntityKey,
        incoming: Sex,
        other: XRefRole,
    ) -> Result<()> {
        if self.sex_of(occupant) == incoming {
            return Err(GedcomError::Capacity(format!(
                "{} already has a spouse of the same sex ({})",
                self.describe(fam),
                self.describe(occupant)
            )));
        }
        self.detach(slot)?;
        self.remove_property(slot)?;
        self.add_spouse_slot(fam, other, occupant, None)?;
        Ok(())
    }

    fn add_spouse_slot(
        &mut self,
        fam: EntityKey,
        role: XRefRole,
        indi: EntityKey,
        position: Option<usize>,
    ) -> Result<PropertyKey> {
        let tag = self.role_tag(role)?;
        let id = self.require_individual(indi)?;
        let root = self.family_root(fam)?;
        let position = match position {
            Some(position) => position,
            None => self.slot_position(fam, role)?,
        };
        let key = self.create_xref(&tag, &id)?;
        self.add_child(root, key, Some(position))?;
        self.link(key)?;
        Ok(key)
    }

    /// Where a new property of `role` goes in a family record: husbands
    /// before wives, both before children, children last.
    pub(super) fn slot_position(&self, fam: EntityKey, role: XRefRole) -> Result<usize> {
        let grammar = Arc::clone(&self.doc.grammar);
        let later: Vec<&str> = match role {
            XRefRole::Husband => [XRefRole::Wife, XRefRole::Child]
                .into_iter()
                .filter_map(|r| grammar.role_tag(r))
                .collect(),
            XRefRole::Wife => grammar.role_tag(XRefRole::Child).into_iter().collect(),
            _ => Vec::new(),
        };
        let root = self.family_root(fam)?;
        let children = self.get_children(root)?;
        Ok(children
            .iter()
            .position(|child| self.node(*child).is_some_and(|n| later.contains(&n.tag.as_str())))
            .unwrap_or(children.len()))
    }

    fn role_tag(&self, role: XRefRole) -> Result<String> {
        self.grammar()
            .role_tag(role)
            .map(str::to_string)
            .ok_or_else(|| GedcomError::Grammar(format!("No reference declared for role {role:?}")))
    }

    fn sex_of(&self, indi: EntityKey) -> Sex {
        self.indi(indi).map_or(Sex::Unknown, |i| i.sex())
    }

    fn family_root(&self, fam: EntityKey) -> Result<PropertyKey> {
        self.entity(fam)
            .map(|e| e.root_key())
            .ok_or_else(|| GedcomError::NotFound(format!("record {fam:?}")))
    }

    fn require_family(&self, fam: EntityKey) -> Result<()> {
        let entity = self
            .entity(fam)
            .ok_or_else(|| GedcomError::NotFound(format!("record {fam:?}")))?;
        if entity.tag() != self.grammar().family_tag() {
            return Err(GedcomError::Structure(format!("{entity} is not a family")));
        }
        Ok(())
    }

    /// Returns the individual's id.
    fn require_individual(&self, indi: EntityKey) -> Result<String> {
        let entity = self
            .entity(indi)
            .ok_or_else(|| GedcomError::NotFound(format!("record {indi:?}")))?;
        if entity.tag() != self.grammar().individual_tag() {
            return Err(GedcomError::Structure(format!("{entity} is not an individual")));
        }
        Ok(entity.id().to_string())
    }
}
