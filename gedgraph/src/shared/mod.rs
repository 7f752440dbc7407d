// Shared document handle - single writer, concurrent readers, fail-fast overlap detection

use crate::error::GedcomError;
use crate::events::{GedcomListener, ListenerId};
use crate::gedcom::{Gedcom, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A document shared between threads.
///
/// Readers take a read lock and run concurrently with each other. A unit
/// of work claims the mutation flag before taking the write lock; a second
/// unit of work started while the flag is held fails immediately with
/// [`GedcomError::ConcurrentMutation`] instead of waiting.
///
/// Listeners run while the write lock is held, so they must use the
/// `&Gedcom` they are handed rather than calling back into the handle.
#[derive(Debug, Clone, Default)]
pub struct SharedGedcom {
    inner: Arc<RwLock<Gedcom>>,
    mutating: Arc<AtomicBool>,
}

/// Holds the mutation flag for the lifetime of one unit of work.
struct MutationClaim<'a>(&'a AtomicBool);

impl<'a> MutationClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, GedcomError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| MutationClaim(flag))
            .map_err(|_| GedcomError::ConcurrentMutation)
    }
}

impl Drop for MutationClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SharedGedcom {
    pub fn new(gedcom: Gedcom) -> Self {
        SharedGedcom {
            inner: Arc::new(RwLock::new(gedcom)),
            mutating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run a read-only closure against the document.
    pub fn read<R>(&self, f: impl FnOnce(&Gedcom) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn do_unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<GedcomError>,
    {
        let _claim = MutationClaim::acquire(&self.mutating)?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.do_unit_of_work(work)
    }

    pub fn do_muted_unit_of_work<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<GedcomError>,
    {
        let _claim = MutationClaim::acquire(&self.mutating)?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.do_muted_unit_of_work(work)
    }

    /// Run a closure with exclusive access outside of a unit of work, e.g.
    /// to register listeners or replay undo history. Fails like a unit of
    /// work if one is in progress.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut Gedcom) -> R) -> Result<R, GedcomError> {
        let _claim = MutationClaim::acquire(&self.mutating)?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }

    pub fn add_listener<L>(&self, listener: L) -> Result<ListenerId, GedcomError>
    where
        L: GedcomListener + 'static,
    {
        self.with_exclusive(|gedcom| gedcom.add_listener(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool, GedcomError> {
        self.with_exclusive(|gedcom| gedcom.remove_listener(id))
    }

    /// Whether a unit of work is running right now.
    pub fn is_mutating(&self) -> bool {
        self.mutating.load(Ordering::Acquire)
    }

    /// The document, if this is the last handle.
    pub fn try_into_inner(self) -> Result<Gedcom, SharedGedcom> {
        let mutating = self.mutating;
        Arc::try_unwrap(self.inner)
            .map(|lock| lock.into_inner().unwrap_or_else(PoisonError::into_inner))
            .map_err(|inner| SharedGedcom { inner, mutating })
    }
}

impl From<Gedcom> for SharedGedcom {
    fn from(gedcom: Gedcom) -> Self {
        SharedGedcom::new(gedcom)
    }
}
