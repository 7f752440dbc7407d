pub mod parser;
pub mod types;

pub use parser::{parse_grammar, parse_grammar_str};
pub use types::*;

use crate::error::{GedcomError, Result};
use crate::tag_path::TagPath;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::OnceLock;

const STANDARD_GRAMMAR: &str = include_str!("standard.yaml");

impl Grammar {
    /// The embedded GEDCOM 5.5 grammar.
    pub fn standard() -> &'static Grammar {
        static STANDARD: OnceLock<Grammar> = OnceLock::new();
        STANDARD.get_or_init(|| {
            parse_grammar_str(STANDARD_GRAMMAR).expect("embedded GEDCOM grammar must be valid")
        })
    }

    pub fn entity(&self, tag: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.tag == tag)
    }

    pub fn is_entity_tag(&self, tag: &str) -> bool {
        self.entity(tag).is_some()
    }

    /// Id prefix for a record tag. Undeclared tags use their first letter.
    pub fn prefix_for(&self, tag: &str) -> String {
        self.entity(tag)
            .and_then(|e| e.prefix.clone())
            .unwrap_or_else(|| tag.chars().next().map(String::from).unwrap_or_default())
    }

    pub fn id_strategy(&self, tag: &str) -> AutoIdStrategy {
        self.entity(tag)
            .and_then(|e| e.id.as_ref())
            .map(|c| c.auto)
            .unwrap_or_default()
    }

    /// The most specific reference rule matching a concrete tag path.
    /// Among equally specific rules the first declared wins.
    pub fn reference_rule(&self, path: &TagPath) -> Option<&ReferenceRule> {
        self.references
            .iter()
            .filter(|r| path.matches(&r.path))
            .min_by_key(|r| Reverse(r.path.len()))
    }

    pub fn rule_for_role(&self, role: XRefRole) -> Option<&ReferenceRule> {
        if !role.is_paired() {
            return None;
        }
        self.references.iter().find(|r| r.role == role)
    }

    /// The tag a property of a paired role carries (`HUSB`, `FAMS`, ...).
    pub fn role_tag(&self, role: XRefRole) -> Option<&str> {
        self.rule_for_role(role).and_then(|r| r.path.last())
    }

    /// Record tag of individuals, taken from the `husband` reference.
    pub fn individual_tag(&self) -> &str {
        self.rule_for_role(XRefRole::Husband)
            .map(|r| r.target.as_str())
            .unwrap_or("INDI")
    }

    /// Record tag of families, taken from the `spouse_in_family` reference.
    pub fn family_tag(&self) -> &str {
        self.rule_for_role(XRefRole::SpouseInFamily)
            .map(|r| r.target.as_str())
            .unwrap_or("FAM")
    }

    /// Check the grammar for internal consistency.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if entity.tag.is_empty() || entity.tag.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(GedcomError::Grammar(format!(
                    "Invalid record tag '{}'",
                    entity.tag
                )));
            }
            if !seen.insert(entity.tag.as_str()) {
                return Err(GedcomError::Grammar(format!(
                    "Record tag '{}' declared twice",
                    entity.tag
                )));
            }
        }

        for rule in &self.references {
            if !self.is_entity_tag(&rule.target) {
                return Err(GedcomError::Grammar(format!(
                    "Reference '{}' targets undeclared record type '{}'",
                    rule.path, rule.target
                )));
            }
            if rule.role.is_paired() {
                if rule.path.len() != 2 {
                    return Err(GedcomError::Grammar(format!(
                        "Paired reference '{}' must be a direct child of a record",
                        rule.path
                    )));
                }
                let count = self.references.iter().filter(|r| r.role == rule.role).count();
                if count > 1 {
                    return Err(GedcomError::Grammar(format!(
                        "Role {:?} is declared {count} times",
                        rule.role
                    )));
                }
                for reciprocal in rule.role.reciprocal_roles() {
                    let other = self.rule_for_role(*reciprocal).ok_or_else(|| {
                        GedcomError::Grammar(format!(
                            "Reference '{}' has role {:?} but no {:?} reference is declared",
                            rule.path, rule.role, reciprocal
                        ))
                    })?;
                    if other.path.first() != Some(rule.target.as_str())
                        || rule.path.first() != Some(other.target.as_str())
                    {
                        return Err(GedcomError::Grammar(format!(
                            "References '{}' and '{}' do not point at each other's records",
                            rule.path, other.path
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_grammar_is_valid() {
        let grammar = Grammar::standard();
        assert!(grammar.is_entity_tag("INDI"));
        assert!(grammar.is_entity_tag("FAM"));
        assert_eq!(grammar.prefix_for("INDI"), "I");
        assert_eq!(grammar.prefix_for("FAM"), "F");
        assert_eq!(grammar.prefix_for("_CUSTOM"), "_");
        assert_eq!(grammar.role_tag(XRefRole::SpouseInFamily), Some("FAMS"));
        assert_eq!(grammar.role_tag(XRefRole::Child), Some("CHIL"));
        assert_eq!(grammar.individual_tag(), "INDI");
        assert_eq!(grammar.family_tag(), "FAM");
    }

    #[test]
    fn test_reference_rule_prefers_specific_pattern() {
        let grammar = Grammar::standard();
        let husb = grammar
            .reference_rule(&TagPath::parse("FAM:HUSB").unwrap())
            .unwrap();
        assert_eq!(husb.role, XRefRole::Husband);
        assert_eq!(husb.target, "INDI");

        let note = grammar
            .reference_rule(&TagPath::parse("INDI:BIRT:NOTE").unwrap())
            .unwrap();
        assert_eq!(note.role, XRefRole::Plain);
        assert_eq!(note.target, "NOTE");

        assert!(grammar
            .reference_rule(&TagPath::parse("INDI:HUSB").unwrap())
            .is_none());

        let famc = grammar
            .reference_rule(&TagPath::parse("INDI:FAMC").unwrap())
            .unwrap();
        assert_eq!(famc.role, XRefRole::ChildInFamily);
        let adopted_by = grammar
            .reference_rule(&TagPath::parse("INDI:ADOP:FAMC").unwrap())
            .unwrap();
        assert_eq!(adopted_by.role, XRefRole::Plain);
        assert_eq!(adopted_by.target, "FAM");
    }

    #[test]
    fn test_custom_id_strategy() {
        let grammar = parse_grammar_str(
            r#"
entities:
  - tag: INDI
    prefix: P
    id: { auto: ulid }
references: []
"#,
        )
        .unwrap();
        assert_eq!(grammar.id_strategy("INDI"), AutoIdStrategy::Ulid);
        assert_eq!(grammar.id_strategy("FAM"), AutoIdStrategy::Sequential);
        assert_eq!(grammar.prefix_for("INDI"), "P");
    }

    #[test]
    fn test_rejects_unknown_target() {
        let err = parse_grammar_str(
            r#"
entities:
  - tag: INDI
references:
  - { path: "NOTE", target: NOTE }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, GedcomError::Grammar(_)));
    }

    #[test]
    fn test_rejects_incomplete_pair() {
        let err = parse_grammar_str(
            r#"
entities:
  - tag: INDI
  - tag: FAM
references:
  - { path: "FAM:HUSB", target: INDI, role: husband }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, GedcomError::Grammar(_)));
    }

    #[test]
    fn test_rejects_duplicate_record_tag() {
        let err = parse_grammar_str("entities:\n  - tag: INDI\n  - tag: INDI\n").unwrap_err();
        assert!(matches!(err, GedcomError::Grammar(_)));
    }
}
