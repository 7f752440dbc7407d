use crate::entity::EntityRef;
use crate::gedcom::Gedcom;
use crate::grammar::XRefRole;
use crate::property::PropertyRef;
use crate::relations::Sex;
use crate::tag_path::TagPath;
use serde::Serialize;

/// Result of checking a document's integrity
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Path patterns of properties that may be empty leaves.
    pub allow_empty: Vec<TagPath>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        let events = [
            "BIRT", "CHR", "DEAT", "BURI", "CREM", "ADOP", "BAPM", "BARM", "BASM", "CONF", "EVEN",
            "GRAD", "RETI", "MARR", "DIV", "ENGA", "ANUL", "CENS",
        ];
        ValidationOptions {
            allow_empty: events.iter().map(|tag| TagPath::from_segments([*tag])).collect(),
        }
    }
}

/// Check a document with the default options.
pub fn validate(gedcom: &Gedcom) -> ValidationResult {
    validate_with(gedcom, &ValidationOptions::default())
}

/// Check every record of a document.
///
/// Errors are broken invariants of the reference graph: unresolved or
/// dangling references, pairs that do not point back at each other and
/// individuals who are their own ancestors. Warnings flag suspicious but
/// legal content.
pub fn validate_with(gedcom: &Gedcom, options: &ValidationOptions) -> ValidationResult {
    let mut result = ValidationResult::default();

    for tag in gedcom.entity_tags() {
        for entity in gedcom.entities(tag) {
            for property in entity.properties() {
                check_property(&entity, property, options, &mut result);
            }
        }
    }

    for indi in gedcom.entities(gedcom.grammar().individual_tag()).filter_map(|e| e.as_indi()) {
        if indi.name().is_none() {
            result.warnings.push(format!("{indi} has no NAME"));
        }
        if indi.ancestors().iter().any(|a| a.key() == indi.key()) {
            result.errors.push(format!("{indi} is their own ancestor"));
        }
    }

    for fam in gedcom.entities(gedcom.grammar().family_tag()).filter_map(|e| e.as_fam()) {
        if fam.spouse_count() == 0 && fam.child_count() == 0 {
            result.warnings.push(format!("{fam} has no members"));
        }
        if let Some(husband) = fam.husband().filter(|h| h.sex() == Sex::Female) {
            result.warnings.push(format!("Husband {husband} in {fam} is female"));
        }
        if let Some(wife) = fam.wife().filter(|w| w.sex() == Sex::Male) {
            result.warnings.push(format!("Wife {wife} in {fam} is male"));
        }
    }

    result
}

fn check_property(
    entity: &EntityRef<'_>,
    property: PropertyRef<'_>,
    options: &ValidationOptions,
    result: &mut ValidationResult,
) {
    let path = property.path();
    let at = format!("{entity} {path}");

    if property.is_cross_reference() {
        check_reference(entity, &property, &at, result);
    } else if property.value().is_empty()
        && property.child_count() == 0
        && !options.allow_empty.iter().any(|pattern| path.matches(pattern))
    {
        result.warnings.push(format!("{at} is empty"));
    }

    for child in property.children() {
        check_property(entity, child, options, result);
    }
}

fn check_reference(entity: &EntityRef<'_>, property: &PropertyRef<'_>, at: &str, result: &mut ValidationResult) {
    let value = property.value();
    let Some(role) = property.role() else {
        result.errors.push(format!("{at} @{value}@ is not covered by any reference rule"));
        return;
    };
    if !property.is_linked() {
        result.errors.push(format!("{at} @{value}@ is unresolved"));
        return;
    }
    let Some(target) = property.target() else {
        result.errors.push(format!("{at} @{value}@ points at a missing record"));
        return;
    };
    if target.id() != value {
        result.errors.push(format!("{at} @{value}@ is linked to {target}"));
    }
    if role == XRefRole::Plain {
        return;
    }

    let mutual = property.peer().is_some_and(|peer| {
        peer.entity().map(|e| e.key()) == Some(target.key())
            && peer.target().map(|t| t.key()) == Some(entity.key())
            && peer.peer().map(|p| p.key()) == Some(property.key())
            && peer.role().is_some_and(|r| role.reciprocal_roles().contains(&r))
    });
    if !mutual {
        result.errors.push(format!("{at} @{value}@ has no matching reference back from {target}"));
    }
}
