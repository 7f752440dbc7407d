// Undo/redo - batches recorded by a listener, replayed as inverse units of work

use crate::entity::EntityLocation;
use crate::error::{GedcomError, Result};
use crate::events::{GedcomEvent, GedcomListener, ListenerId, ListenerResult};
use crate::gedcom::{Gedcom, Transaction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_DEPTH: usize = 100;

/// One committed unit of work as seen by the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoEntry {
    pub committed_at: DateTime<Utc>,
    pub events: Vec<GedcomEvent>,
}

impl UndoEntry {
    /// Records touched by the batch, in first-touched order.
    pub fn entities(&self) -> Vec<&EntityLocation> {
        let mut out: Vec<&EntityLocation> = Vec::new();
        for event in &self.events {
            let entity = event.entity();
            if !out.contains(&entity) {
                out.push(entity);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Undo,
    Redo,
}

#[derive(Debug)]
struct HistoryState {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
    max_depth: usize,
    replaying: Option<Replay>,
}

impl HistoryState {
    fn record(&mut self, events: &[GedcomEvent]) {
        let entry = UndoEntry {
            committed_at: Utc::now(),
            events: events.to_vec(),
        };
        match self.replaying {
            Some(Replay::Undo) => self.redo.push(entry),
            Some(Replay::Redo) => self.push_undo(entry),
            None => {
                self.redo.clear();
                self.push_undo(entry);
            }
        }
    }

    fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
        if self.undo.len() > self.max_depth {
            let excess = self.undo.len() - self.max_depth;
            self.undo.drain(..excess);
        }
    }
}

/// Bounded undo and redo stacks for one document.
///
/// Register the history's recorder on the document with
/// [`UndoHistory::attach`]; every committed, non-muted unit of work then
/// becomes an undo entry. [`UndoHistory::undo`] replays the inverse of the
/// newest entry as a new unit of work, whose own events become the redo
/// entry.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    state: Arc<Mutex<HistoryState>>,
}

impl Default for UndoHistory {
    fn default() -> Self {
        UndoHistory::new(DEFAULT_DEPTH)
    }
}

/// The listener half of an [`UndoHistory`].
pub struct UndoRecorder {
    state: Arc<Mutex<HistoryState>>,
}

impl GedcomListener for UndoRecorder {
    fn on_event(&mut self, _gedcom: &Gedcom, _event: &GedcomEvent) -> ListenerResult {
        Ok(())
    }

    fn on_batch_committed(&mut self, _gedcom: &Gedcom, events: &[GedcomEvent]) -> ListenerResult {
        lock(&self.state).record(events);
        Ok(())
    }
}

fn lock(state: &Mutex<HistoryState>) -> MutexGuard<'_, HistoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UndoHistory {
    pub fn new(max_depth: usize) -> Self {
        UndoHistory {
            state: Arc::new(Mutex::new(HistoryState {
                undo: Vec::new(),
                redo: Vec::new(),
                max_depth: max_depth.max(1),
                replaying: None,
            })),
        }
    }

    pub fn recorder(&self) -> UndoRecorder {
        UndoRecorder {
            state: Arc::clone(&self.state),
        }
    }

    /// Start recording the document's committed units of work.
    pub fn attach(&self, gedcom: &mut Gedcom) -> ListenerId {
        gedcom.add_listener(self.recorder())
    }

    pub fn can_undo(&self) -> bool {
        !lock(&self.state).undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !lock(&self.state).redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        lock(&self.state).undo.len()
    }

    pub fn redo_len(&self) -> usize {
        lock(&self.state).redo.len()
    }

    /// The entry the next `undo` would revert.
    pub fn peek_undo(&self) -> Option<UndoEntry> {
        lock(&self.state).undo.last().cloned()
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.undo.clear();
        state.redo.clear();
    }

    /// Revert the newest recorded unit of work. Returns false when there
    /// is nothing to undo. On failure the entry stays on the undo stack and
    /// the document is unchanged.
    pub fn undo(&self, gedcom: &mut Gedcom) -> Result<bool> {
        self.replay(gedcom, Replay::Undo)
    }

    /// Re-apply the newest undone unit of work.
    pub fn redo(&self, gedcom: &mut Gedcom) -> Result<bool> {
        self.replay(gedcom, Replay::Redo)
    }

    fn replay(&self, gedcom: &mut Gedcom, direction: Replay) -> Result<bool> {
        let entry = {
            let mut state = lock(&self.state);
            let stack = match direction {
                Replay::Undo => &mut state.undo,
                Replay::Redo => &mut state.redo,
            };
            let Some(entry) = stack.pop() else {
                return Ok(false);
            };
            state.replaying = Some(direction);
            entry
        };

        log::debug!(
            "{:?} of {} events committed at {}",
            direction,
            entry.events.len(),
            entry.committed_at
        );
        let result = gedcom.do_unit_of_work(|tx| revert_events(tx, &entry.events));

        let mut state = lock(&self.state);
        state.replaying = None;
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                log::warn!("{direction:?} failed: {e}");
                match direction {
                    Replay::Undo => state.undo.push(entry),
                    Replay::Redo => state.redo.push(entry),
                }
                Err(e)
            }
        }
    }
}

/// Apply the inverse of each event, newest first.
fn revert_events(tx: &mut Transaction<'_>, events: &[GedcomEvent]) -> Result<()> {
    for event in events.iter().rev() {
        match event {
            GedcomEvent::EntityAdded { location, .. } => {
                let key = tx
                    .get_entity(&location.tag, &location.id)
                    .ok_or_else(|| GedcomError::NotFound(format!("record {location}")))?;
                tx.delete_entity(key)?;
            }
            GedcomEvent::EntityDeleted {
                location,
                position,
                snapshot,
                ..
            } => {
                tx.restore_entity(location, *position, snapshot)?;
            }
            GedcomEvent::PropertyAdded { location, .. } => tx.remove_property_at(location)?,
            GedcomEvent::PropertyDeleted { location, snapshot, .. } => {
                tx.restore_property(location, snapshot)?;
            }
            GedcomEvent::PropertyChanged { location, old_value, .. } => tx.set_value_at(location, old_value)?,
            GedcomEvent::PropertyLinked { location, .. } => tx.unlink_raw(location)?,
            GedcomEvent::PropertyUnlinked {
                location,
                target,
                peer,
                ..
            } => tx.link_raw(location, target, peer.as_ref())?,
        }
    }
    Ok(())
}
