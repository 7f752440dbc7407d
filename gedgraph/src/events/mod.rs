// Change notification - event types, listener trait and ordered fan-out

use crate::entity::{EntityKey, EntityLocation};
use crate::gedcom::Gedcom;
use crate::property::{PropertyKey, PropertyLocation, PropertyTree};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A structural change recorded during a unit of work.
///
/// Keys identify nodes as they were when the change happened and may be
/// stale by the time the event is delivered; locations are valid in the
/// document state right after the change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GedcomEvent {
    EntityAdded {
        entity: EntityKey,
        location: EntityLocation,
        position: usize,
    },
    EntityDeleted {
        entity: EntityKey,
        location: EntityLocation,
        position: usize,
        snapshot: PropertyTree,
    },
    PropertyAdded {
        parent: PropertyKey,
        property: PropertyKey,
        location: PropertyLocation,
        snapshot: PropertyTree,
    },
    PropertyChanged {
        property: PropertyKey,
        location: PropertyLocation,
        old_value: String,
        new_value: String,
    },
    PropertyDeleted {
        parent: PropertyKey,
        location: PropertyLocation,
        snapshot: PropertyTree,
    },
    PropertyLinked {
        property: PropertyKey,
        location: PropertyLocation,
        target: EntityLocation,
        peer: Option<PropertyLocation>,
    },
    PropertyUnlinked {
        property: PropertyKey,
        location: PropertyLocation,
        target: EntityLocation,
        peer: Option<PropertyLocation>,
    },
}

impl GedcomEvent {
    /// The record the change happened in.
    pub fn entity(&self) -> &EntityLocation {
        match self {
            GedcomEvent::EntityAdded { location, .. } | GedcomEvent::EntityDeleted { location, .. } => {
                location
            }
            GedcomEvent::PropertyAdded { location, .. }
            | GedcomEvent::PropertyChanged { location, .. }
            | GedcomEvent::PropertyDeleted { location, .. }
            | GedcomEvent::PropertyLinked { location, .. }
            | GedcomEvent::PropertyUnlinked { location, .. } => &location.entity,
        }
    }

    /// Position among siblings (record order for record events).
    pub fn position(&self) -> Option<usize> {
        match self {
            GedcomEvent::EntityAdded { position, .. } | GedcomEvent::EntityDeleted { position, .. } => {
                Some(*position)
            }
            GedcomEvent::PropertyAdded { location, .. }
            | GedcomEvent::PropertyChanged { location, .. }
            | GedcomEvent::PropertyDeleted { location, .. }
            | GedcomEvent::PropertyLinked { location, .. }
            | GedcomEvent::PropertyUnlinked { location, .. } => location.position(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GedcomEvent::EntityAdded { .. } => "entity_added",
            GedcomEvent::EntityDeleted { .. } => "entity_deleted",
            GedcomEvent::PropertyAdded { .. } => "property_added",
            GedcomEvent::PropertyChanged { .. } => "property_changed",
            GedcomEvent::PropertyDeleted { .. } => "property_deleted",
            GedcomEvent::PropertyLinked { .. } => "property_linked",
            GedcomEvent::PropertyUnlinked { .. } => "property_unlinked",
        }
    }
}

pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives the events of every committed, non-muted unit of work.
///
/// Each listener sees all events of a batch in the order the mutations
/// happened, followed by `on_batch_committed`. Errors and panics are
/// logged and do not reach other listeners.
pub trait GedcomListener: Send + Sync {
    fn on_event(&mut self, gedcom: &Gedcom, event: &GedcomEvent) -> ListenerResult;

    fn on_batch_committed(&mut self, _gedcom: &Gedcom, _events: &[GedcomEvent]) -> ListenerResult {
        Ok(())
    }
}

impl<F> GedcomListener for F
where
    F: FnMut(&Gedcom, &GedcomEvent) + Send + Sync,
{
    fn on_event(&mut self, gedcom: &Gedcom, event: &GedcomEvent) -> ListenerResult {
        self(gedcom, event);
        Ok(())
    }
}

/// Registration handle returned by [`Gedcom::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    entries: Vec<(ListenerId, Box<dyn GedcomListener>)>,
}

impl ListenerRegistry {
    pub fn add(&mut self, listener: Box<dyn GedcomListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver a committed batch to every listener in registration order.
    pub fn dispatch(&mut self, gedcom: &Gedcom, events: &[GedcomEvent]) {
        if events.is_empty() {
            return;
        }

        for (id, listener) in self.entries.iter_mut() {
            for event in events {
                let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(gedcom, event)));
                report(*id, event.kind(), outcome);
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_batch_committed(gedcom, events)));
            report(*id, "batch_committed", outcome);
        }
    }
}

fn report(id: ListenerId, what: &str, outcome: std::thread::Result<ListenerResult>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("{id} failed handling {what}: {e}"),
        Err(_) => log::error!("{id} panicked handling {what}"),
    }
}
