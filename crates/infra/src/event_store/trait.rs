use std::sync::Arc;

use thiserror::Error;

use eventide_core::{Cursor, CursorData, DomainError, EventData};

/// An event as stored in a per-entity log, paired with its cursor.
pub type EventRecord<Ev> = CursorData<EventData<Ev>>;

/// An event from the global log, carrying the key of the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedEvent<Pk, Ev> {
    pub pk: Pk,
    pub event: EventData<Ev>,
}

/// A global-log record: the keyed event plus its cursor.
pub type GlobalEventRecord<Pk, Ev> = CursorData<KeyedEvent<Pk, Ev>>;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, encoding) as opposed to
/// domain errors (validation, invariants). A missing entity is never an error.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event store lock poisoned")]
    LockPoisoned,

    #[error("event store backend error: {0}")]
    Backend(String),

    #[error("event serialization failed: {0}")]
    Serialization(String),

    #[error("invalid entity key in store: {0}")]
    InvalidKey(String),
}

impl From<DomainError> for EventStoreError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidKey(msg) => EventStoreError::InvalidKey(msg),
            other => EventStoreError::Backend(other.to_string()),
        }
    }
}

/// Append-only storage backend: per-entity logs, one global log and a snapshot cache.
///
/// ## Cursor semantics
///
/// `append` assigns every event one cursor that identifies it in both the
/// per-entity and the global log. Cursors strictly increase with every append
/// and are never reused, not even after `delete`.
///
/// ## Reads
///
/// `read_entity` / `read_all` return at most `limit` records with a cursor
/// strictly greater than `after`, in ascending cursor order. They are the
/// single-page primitive behind the paged reads on
/// [`EventLog`](super::EventLog).
///
/// ## Implementation requirements
///
/// - a multi-event append is atomic as observed by readers
/// - `save_snapshot` is last-write-wins per key, and is skipped when the key
///   has no event at the snapshot's cursor (e.g. it was deleted after the fold)
/// - `delete` removes the per-entity log and snapshot; the key may start a fresh log afterwards
pub trait EventStore<Pk, Ev, Snap>: Send + Sync {
    /// Append `events` (in order) to the entity log and the global log.
    ///
    /// Returns the assigned cursors, one per event.
    fn append(&self, pk: &Pk, events: &[EventData<Ev>]) -> Result<Vec<Cursor>, EventStoreError>;

    fn read_entity(
        &self,
        pk: &Pk,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<EventRecord<Ev>>, EventStoreError>;

    fn read_all(
        &self,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<GlobalEventRecord<Pk, Ev>>, EventStoreError>;

    fn snapshot(&self, pk: &Pk) -> Result<Option<CursorData<Snap>>, EventStoreError>;

    fn save_snapshot(&self, pk: &Pk, snapshot: &CursorData<Snap>) -> Result<(), EventStoreError>;

    fn delete(&self, pk: &Pk) -> Result<(), EventStoreError>;
}

impl<Pk, Ev, Snap, S> EventStore<Pk, Ev, Snap> for Arc<S>
where
    S: EventStore<Pk, Ev, Snap> + ?Sized,
{
    fn append(&self, pk: &Pk, events: &[EventData<Ev>]) -> Result<Vec<Cursor>, EventStoreError> {
        (**self).append(pk, events)
    }

    fn read_entity(
        &self,
        pk: &Pk,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<EventRecord<Ev>>, EventStoreError> {
        (**self).read_entity(pk, after, limit)
    }

    fn read_all(
        &self,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<GlobalEventRecord<Pk, Ev>>, EventStoreError> {
        (**self).read_all(after, limit)
    }

    fn snapshot(&self, pk: &Pk) -> Result<Option<CursorData<Snap>>, EventStoreError> {
        (**self).snapshot(pk)
    }

    fn save_snapshot(&self, pk: &Pk, snapshot: &CursorData<Snap>) -> Result<(), EventStoreError> {
        (**self).save_snapshot(pk, snapshot)
    }

    fn delete(&self, pk: &Pk) -> Result<(), EventStoreError> {
        (**self).delete(pk)
    }
}
