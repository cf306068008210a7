//! Command execution and aggregate folding (application-level orchestration).
//!
//! ```text
//! execute(pk, commands)
//!   ↓
//! 1. CommandHandler turns commands into events (pure)
//!   ↓
//! 2. Events are stamped with the execution time and persisted
//!    (store → persist listeners)
//!   ↓
//! 3. get(pk): load snapshot, fold newer events page by page,
//!    refresh the snapshot if the cursor moved
//! ```
//!
//! Reads are read-repair style: every `get` brings the snapshot up to date,
//! and racing refreshes converge because folding is a deterministic replay in
//! cursor order. Snapshot refresh failures are logged, never surfaced.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use eventide_core::{
    CommandHandler, Cursor, CursorData, DomainError, EntityKey, EventData, EventReducer, KeyProvider,
};

use crate::config::{DEFAULT_PAGE_SIZE, EngineConfig};
use crate::event_store::{EventLog, EventStoreError};

#[derive(Debug, Error)]
pub enum EventSourceError {
    /// A command was rejected or a reducer invariant failed (deterministic).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The event store failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Event-sourced access to one aggregate type.
///
/// ## Generic parameters
///
/// - `Pk`: entity key
/// - `Cmd`: command type accepted by the handler
/// - `Ev`: event type produced by the handler and stored in the log
/// - `Snap`: folded aggregate, cached as the snapshot
pub struct EventSource<Pk, Cmd, Ev, Snap> {
    key_provider: Arc<dyn KeyProvider<Pk>>,
    handler: Arc<dyn CommandHandler<Cmd, Ev>>,
    reducer: Arc<dyn EventReducer<Ev, Snap>>,
    store: Arc<EventLog<Pk, Ev, Snap>>,
    page_size: usize,
}

impl<Pk, Cmd, Ev, Snap> EventSource<Pk, Cmd, Ev, Snap>
where
    Pk: EntityKey,
    Ev: Send + Sync + 'static,
    Snap: Clone + Send + Sync + 'static,
{
    pub fn new(
        key_provider: impl KeyProvider<Pk> + 'static,
        handler: impl CommandHandler<Cmd, Ev> + 'static,
        reducer: impl EventReducer<Ev, Snap> + 'static,
        store: Arc<EventLog<Pk, Ev, Snap>>,
    ) -> Self {
        Self {
            key_provider: Arc::new(key_provider),
            handler: Arc::new(handler),
            reducer: Arc::new(reducer),
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_page_size(config.page_size)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<EventLog<Pk, Ev, Snap>> {
        &self.store
    }

    pub fn generate_new_key(&self) -> Pk {
        self.key_provider.generate_new_key()
    }

    /// Run `commands` against `pk`, persist the resulting events, and return
    /// the up-to-date aggregate.
    ///
    /// When the handler produces no events nothing is persisted.
    pub fn execute(&self, pk: &Pk, commands: Vec<Cmd>) -> Result<Option<Snap>, EventSourceError> {
        let events = self.handler.execute(commands)?;

        if !events.is_empty() {
            let timestamp = Utc::now().timestamp_millis();
            let events: Vec<EventData<Ev>> = events
                .into_iter()
                .map(|payload| EventData::new(payload, timestamp))
                .collect();
            let cursors = self.store.persist(pk, &events)?;
            debug!(entity_key = ?pk, event_count = events.len(), last_cursor = ?cursors.last(), "events persisted");
        }

        self.get(pk)
    }

    /// Current aggregate for `pk`, or `None` if it has no events.
    pub fn get(&self, pk: &Pk) -> Result<Option<Snap>, EventSourceError> {
        self.get_filtered(pk, |_| true)
    }

    /// Like [`get`](Self::get), but returns `None` when `filter` rejects the aggregate.
    pub fn get_filtered(
        &self,
        pk: &Pk,
        filter: impl FnOnce(&Snap) -> bool,
    ) -> Result<Option<Snap>, EventSourceError> {
        let (mut aggregate, start) = match self.store.get_snapshot(pk)? {
            Some(snapshot) => (Some(snapshot.payload), snapshot.cursor),
            None => (None, Cursor::BEGINNING),
        };

        let mut cursor = start;
        for page in self.store.get_events(pk, start, self.page_size) {
            for record in page? {
                aggregate = Some(self.reducer.reduce(aggregate, &record.payload)?);
                cursor = record.cursor;
            }
        }

        if cursor != start {
            if let Some(aggregate) = &aggregate {
                let snapshot = CursorData::new(aggregate.clone(), cursor);
                if let Err(err) = self.store.save(pk, &snapshot) {
                    warn!(entity_key = ?pk, cursor = %cursor, error = %err, "snapshot refresh failed");
                }
            }
        }

        Ok(aggregate.filter(filter))
    }

    /// Remove the entity's log and snapshot.
    pub fn delete(&self, pk: &Pk) -> Result<(), EventSourceError> {
        self.store.delete(pk)?;
        Ok(())
    }
}
