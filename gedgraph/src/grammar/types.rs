use crate::tag_path::TagPath;
use serde::{Deserialize, Serialize};

/// Top-level grammar definition parsed from a grammar YAML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub references: Vec<ReferenceRule>,
}

/// Definition of a single record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub tag: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub id: Option<IdConfig>,
}

/// Configuration for record id generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default)]
    pub auto: AutoIdStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIdStrategy {
    /// Prefix plus the smallest unused positive integer (`I1`, `I2`, ...)
    #[default]
    Sequential,
    Ulid,
    Uuid,
    Nanoid,
}

/// A tag path pattern whose properties point at another record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRule {
    pub path: TagPath,
    pub target: String,
    #[serde(default)]
    pub role: XRefRole,
}

/// The relationship a cross-reference expresses.
///
/// Paired roles keep a reciprocal property on the target record:
/// `husband`/`wife` pair with `spouse_in_family`, `child` pairs with
/// `child_in_family`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XRefRole {
    #[default]
    Plain,
    Husband,
    Wife,
    Child,
    SpouseInFamily,
    ChildInFamily,
}

impl XRefRole {
    pub fn is_paired(self) -> bool {
        self != XRefRole::Plain
    }

    /// Roles that can sit on the other end of a pair.
    pub fn reciprocal_roles(self) -> &'static [XRefRole] {
        match self {
            XRefRole::Plain => &[],
            XRefRole::Husband | XRefRole::Wife => &[XRefRole::SpouseInFamily],
            XRefRole::Child => &[XRefRole::ChildInFamily],
            XRefRole::SpouseInFamily => &[XRefRole::Husband, XRefRole::Wife],
            XRefRole::ChildInFamily => &[XRefRole::Child],
        }
    }
}
