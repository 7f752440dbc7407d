// Search index - SQLite rows of record values kept current by a listener

use crate::entity::{EntityLocation, EntityRef};
use crate::error::Result;
use crate::events::{GedcomEvent, GedcomListener, ListenerId, ListenerResult};
use crate::gedcom::Gedcom;
use crate::property::PropertyRef;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One indexed property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub tag: String,
    pub id: String,
    pub path: String,
    pub value: String,
}

impl SearchHit {
    pub fn entity(&self) -> EntityLocation {
        EntityLocation::new(&self.tag, &self.id)
    }
}

/// Full-text lookup over property values.
///
/// The index is a plain table of (record tag, record id, tag path, value)
/// rows. Attach it to a document with [`SearchIndex::attach`] and every
/// record touched by a committed unit of work is re-indexed. Muted units
/// of work are not delivered to listeners; call [`SearchIndex::rebuild`]
/// after a bulk load.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SearchIndex {
    /// Open or create a file backed index.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        SearchIndex::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        SearchIndex::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS property_index (
                tag TEXT NOT NULL,
                id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                path TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tag, id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_property_index_path ON property_index(path);
            ",
        )?;
        Ok(SearchIndex {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index the whole document and start following its changes.
    pub fn attach(&self, gedcom: &mut Gedcom) -> Result<ListenerId> {
        self.rebuild(gedcom)?;
        Ok(gedcom.add_listener(self.listener()))
    }

    pub fn listener(&self) -> SearchListener {
        SearchListener { index: self.clone() }
    }

    /// Drop every row and index all records again. Returns the row count.
    pub fn rebuild(&self, gedcom: &Gedcom) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM property_index", [])?;
        let mut rows = 0;
        for tag in gedcom.entity_tags() {
            for entity in gedcom.entities(tag) {
                rows += insert_entity(&tx, &entity)?;
            }
        }
        tx.commit()?;
        log::debug!("Indexed {rows} values from {} records", gedcom.len());
        Ok(rows)
    }

    /// Replace the rows of the given records with their current values.
    /// Records no longer in the document lose their rows.
    pub fn reindex(&self, gedcom: &Gedcom, locations: &[&EntityLocation]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for location in locations {
            tx.execute(
                "DELETE FROM property_index WHERE tag = ?1 AND id = ?2",
                params![location.tag, location.id],
            )?;
            if let Some(entity) = gedcom.entity_at(location) {
                insert_entity(&tx, &entity)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Rows whose value contains `term`, ignoring ASCII case.
    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.query(None, term)
    }

    /// Like [`SearchIndex::search`] but limited to records of one tag.
    pub fn search_tag(&self, tag: &str, term: &str) -> Result<Vec<SearchHit>> {
        self.query(Some(tag), term)
    }

    /// Distinct records with at least one matching value, in hit order.
    pub fn search_entities(&self, term: &str) -> Result<Vec<EntityLocation>> {
        let mut out: Vec<EntityLocation> = Vec::new();
        for hit in self.search(term)? {
            let location = hit.entity();
            if !out.contains(&location) {
                out.push(location);
            }
        }
        Ok(out)
    }

    fn query(&self, tag: Option<&str>, term: &str) -> Result<Vec<SearchHit>> {
        let pattern = format!("%{}%", escape_like(term));
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT tag, id, path, value FROM property_index
             WHERE value LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR tag = ?2)
             ORDER BY tag, id, seq",
        )?;
        let rows = stmt.query_map(params![pattern, tag], |row| {
            Ok(SearchHit {
                tag: row.get(0)?,
                id: row.get(1)?,
                path: row.get(2)?,
                value: row.get(3)?,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// Number of indexed values.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM property_index", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn insert_entity(conn: &Connection, entity: &EntityRef<'_>) -> Result<usize> {
    let mut values = Vec::new();
    collect_values(entity.root(), &mut values);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO property_index (tag, id, seq, path, value) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (seq, (path, value)) in values.iter().enumerate() {
        stmt.execute(params![entity.tag(), entity.id(), seq as i64, path, value])?;
    }
    Ok(values.len())
}

fn collect_values(property: PropertyRef<'_>, out: &mut Vec<(String, String)>) {
    if !property.value().is_empty() {
        out.push((property.path().to_string(), property.value().to_string()));
    }
    for child in property.children() {
        collect_values(child, out);
    }
}

/// The listener half of a [`SearchIndex`].
pub struct SearchListener {
    index: SearchIndex,
}

impl GedcomListener for SearchListener {
    fn on_event(&mut self, _gedcom: &Gedcom, _event: &GedcomEvent) -> ListenerResult {
        Ok(())
    }

    fn on_batch_committed(&mut self, gedcom: &Gedcom, events: &[GedcomEvent]) -> ListenerResult {
        let mut touched: Vec<&EntityLocation> = Vec::new();
        for event in events {
            let location = event.entity();
            if !touched.contains(&location) {
                touched.push(location);
            }
        }
        self.index.reindex(gedcom, &touched)?;
        Ok(())
    }
}
