// Derived genealogy - individual and family views over linked references

use crate::entity::{EntityKey, EntityRef};
use crate::error::{GedcomError, Result};
use crate::grammar::XRefRole;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[default]
    #[serde(rename = "U")]
    Unknown,
}

impl Sex {
    /// Interpret a `SEX` value. Anything other than `M` or `F` is unknown.
    pub fn from_value(value: &str) -> Self {
        match value.trim() {
            "M" | "m" => Sex::Male,
            "F" | "f" => Sex::Female,
            _ => Sex::Unknown,
        }
    }

    pub fn as_value(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Unknown => "U",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_value())
    }
}

/// Records reached through the linked properties of `role` below the root.
fn linked<'a>(entity: EntityRef<'a>, role: XRefRole) -> impl Iterator<Item = EntityRef<'a>> + 'a {
    let tag = entity.gedcom().grammar().role_tag(role);
    entity
        .properties()
        .filter(move |p| Some(p.tag()) == tag)
        .filter_map(|p| p.target())
}

/// Breadth-first closure of `step`, excluding the starting points unless
/// they are reached again.
fn closure<'a>(start: Vec<Indi<'a>>, step: impl Fn(&Indi<'a>) -> Vec<Indi<'a>>) -> Vec<Indi<'a>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut queue: VecDeque<Indi<'a>> = start.into();
    while let Some(indi) = queue.pop_front() {
        if !seen.insert(indi.key()) {
            continue;
        }
        queue.extend(step(&indi));
        out.push(indi);
    }
    out
}

/// An individual (`INDI`) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indi<'a> {
    entity: EntityRef<'a>,
}

impl<'a> Indi<'a> {
    pub(crate) fn new(entity: EntityRef<'a>) -> Self {
        Indi { entity }
    }

    pub fn key(&self) -> EntityKey {
        self.entity.key()
    }

    pub fn id(&self) -> &'a str {
        self.entity.id()
    }

    pub fn entity(&self) -> EntityRef<'a> {
        self.entity
    }

    /// The raw `NAME` value, e.g. `John /Doe/`.
    pub fn name(&self) -> Option<&'a str> {
        self.entity.property("NAME").map(|p| p.value())
    }

    /// Given names: the part of `NAME` before the surname slashes.
    pub fn first_name(&self) -> Option<&'a str> {
        let name = self.name()?;
        let first = name.split('/').next().unwrap_or_default().trim();
        (!first.is_empty()).then_some(first)
    }

    /// The surname between slashes.
    pub fn last_name(&self) -> Option<&'a str> {
        let mut parts = self.name()?.split('/');
        parts.next();
        let last = parts.next()?.trim();
        (!last.is_empty()).then_some(last)
    }

    pub fn sex(&self) -> Sex {
        self.entity
            .property("SEX")
            .map_or(Sex::Unknown, |p| Sex::from_value(p.value()))
    }

    pub fn birth_date(&self) -> Option<&'a str> {
        self.entity
            .property("BIRT")
            .and_then(|birt| birt.property("DATE"))
            .map(|d| d.value())
    }

    pub fn death_date(&self) -> Option<&'a str> {
        self.entity
            .property("DEAT")
            .and_then(|deat| deat.property("DATE"))
            .map(|d| d.value())
    }

    pub fn families_as_spouse(&self) -> Vec<Fam<'a>> {
        linked(self.entity, XRefRole::SpouseInFamily)
            .filter_map(|e| e.as_fam())
            .collect()
    }

    pub fn families_as_child(&self) -> Vec<Fam<'a>> {
        linked(self.entity, XRefRole::ChildInFamily)
            .filter_map(|e| e.as_fam())
            .collect()
    }

    /// The first family this individual is a child in.
    pub fn family_as_child(&self) -> Option<Fam<'a>> {
        self.families_as_child().into_iter().next()
    }

    pub fn parents(&self) -> Vec<Indi<'a>> {
        self.families_as_child()
            .iter()
            .flat_map(|fam| fam.spouses())
            .collect()
    }

    pub fn spouses(&self) -> Vec<Indi<'a>> {
        self.families_as_spouse()
            .iter()
            .filter_map(|fam| fam.other_spouse(self))
            .collect()
    }

    pub fn children(&self) -> Vec<Indi<'a>> {
        self.families_as_spouse()
            .iter()
            .flat_map(|fam| fam.children())
            .collect()
    }

    pub fn ancestors(&self) -> Vec<Indi<'a>> {
        closure(self.parents(), |indi| indi.parents())
    }

    pub fn descendants(&self) -> Vec<Indi<'a>> {
        closure(self.children(), |indi| indi.children())
    }

    /// Reflexive: every individual counts as a descendant of itself.
    pub fn is_descendant_of(&self, other: &Indi<'_>) -> bool {
        self.key() == other.key() || self.ancestors().iter().any(|a| a.key() == other.key())
    }
}

impl fmt::Display for Indi<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (@{}@)", name.replace('/', ""), self.id()),
            None => write!(f, "@{}@", self.id()),
        }
    }
}

/// A family (`FAM`) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fam<'a> {
    entity: EntityRef<'a>,
}

impl<'a> Fam<'a> {
    pub(crate) fn new(entity: EntityRef<'a>) -> Self {
        Fam { entity }
    }

    pub fn key(&self) -> EntityKey {
        self.entity.key()
    }

    pub fn id(&self) -> &'a str {
        self.entity.id()
    }

    pub fn entity(&self) -> EntityRef<'a> {
        self.entity
    }

    pub fn husband(&self) -> Option<Indi<'a>> {
        linked(self.entity, XRefRole::Husband).find_map(|e| e.as_indi())
    }

    pub fn wife(&self) -> Option<Indi<'a>> {
        linked(self.entity, XRefRole::Wife).find_map(|e| e.as_indi())
    }

    /// Husband then wife, whichever are present.
    pub fn spouses(&self) -> Vec<Indi<'a>> {
        self.husband().into_iter().chain(self.wife()).collect()
    }

    pub fn spouse_count(&self) -> usize {
        self.spouses().len()
    }

    /// The spouse that is not `spouse`, if `spouse` is one of them.
    pub fn other_spouse(&self, spouse: &Indi<'_>) -> Option<Indi<'a>> {
        match (self.husband(), self.wife()) {
            (Some(h), w) if h.key() == spouse.key() => w,
            (h, Some(w)) if w.key() == spouse.key() => h,
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<Indi<'a>> {
        linked(self.entity, XRefRole::Child)
            .filter_map(|e| e.as_indi())
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn child(&self, index: usize) -> Result<Indi<'a>> {
        let children = self.children();
        let len = children.len();
        children
            .into_iter()
            .nth(index)
            .ok_or(GedcomError::Index { index, len })
    }

    pub fn marriage_date(&self) -> Option<&'a str> {
        self.entity
            .property("MARR")
            .and_then(|marr| marr.property("DATE"))
            .map(|d| d.value())
    }

    pub fn divorce_date(&self) -> Option<&'a str> {
        self.entity
            .property("DIV")
            .and_then(|div| div.property("DATE"))
            .map(|d| d.value())
    }

    /// The spouses and all of their ancestors.
    pub fn ancestors(&self) -> Vec<Indi<'a>> {
        closure(self.spouses(), |indi| indi.parents())
    }

    /// The children and all of their descendants.
    pub fn descendants(&self) -> Vec<Indi<'a>> {
        closure(self.children(), |indi| indi.children())
    }
}

impl fmt::Display for Fam<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spouses: Vec<String> = self.spouses().iter().map(ToString::to_string).collect();
        if spouses.is_empty() {
            write!(f, "@{}@", self.id())
        } else {
            write!(f, "{} (@{}@)", spouses.join(" + "), self.id())
        }
    }
}
