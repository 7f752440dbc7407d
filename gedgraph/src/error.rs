use thiserror::Error;

#[derive(Error, Debug)]
pub enum GedcomError {
    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate id: {tag} @{id}@ already exists")]
    DuplicateId { tag: String, id: String },

    #[error("Unresolved reference: {tag} @{id}@ does not resolve to a {target}")]
    UnresolvedReference {
        tag: String,
        id: String,
        target: String,
    },

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Concurrent mutation: another unit of work is in progress on this document")]
    ConcurrentMutation,

    #[error("Index {index} out of range (length {len})")]
    Index { index: usize, len: usize },

    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GedcomError>;
