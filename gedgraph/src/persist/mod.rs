// GEDCOM files - line reader, writer and atomic save

mod reader;
mod writer;

pub use reader::read_str_with_grammar;
pub use writer::{write_to, GEDCOM_VERSION};

use crate::error::{GedcomError, Result};
use crate::gedcom::Gedcom;
use crate::grammar::Grammar;
use chrono::Utc;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Parse GEDCOM text with the standard grammar.
pub fn read_str(content: &str) -> Result<Gedcom> {
    read_str_with_grammar(content, Grammar::standard().clone())
}

/// Load a GEDCOM file with the standard grammar.
pub fn load(path: &Path) -> Result<Gedcom> {
    load_with_grammar(path, Grammar::standard().clone())
}

pub fn load_with_grammar(path: &Path, grammar: Grammar) -> Result<Gedcom> {
    let content = std::fs::read_to_string(path)?;
    log::debug!("Loading {}", path.display());
    read_str_with_grammar(&content, grammar)
}

/// Render the document as GEDCOM text.
pub fn write_string(gedcom: &Gedcom) -> Result<String> {
    let mut out = Vec::new();
    write_to(gedcom, &mut out, Utc::now())?;
    String::from_utf8(out).map_err(|e| GedcomError::Other(format!("Written GEDCOM is not UTF-8: {e}")))
}

/// Write the document to `path`. The file is written next to its final
/// location under a temporary name and renamed into place, so readers
/// never see a partial file.
pub fn save(gedcom: &Gedcom, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write_to(gedcom, &mut out, Utc::now())?;
        out.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| GedcomError::Io(e.error))?;
    log::debug!("Saved {} records to {}", gedcom.len(), path.display());
    Ok(())
}
