pub mod entity;
pub mod error;
pub mod events;
pub mod gedcom;
pub mod grammar;
pub mod persist;
pub mod property;
pub mod relations;
pub mod search;
pub mod shared;
pub mod tag_path;
pub mod undo;
pub mod validation;

pub use entity::{EntityKey, EntityLocation, EntityRef};
pub use error::{GedcomError, Result};
pub use events::{GedcomEvent, GedcomListener, ListenerId};
pub use gedcom::{Gedcom, Transaction};
pub use grammar::Grammar;
pub use property::{PropertyKey, PropertyLocation, PropertyRef, PropertyTree};
pub use relations::{Fam, Indi, Sex};
pub use search::SearchIndex;
pub use shared::SharedGedcom;
pub use tag_path::TagPath;
pub use undo::UndoHistory;
pub use validation::ValidationResult;
