//! Append-only event store boundary.
//!
//! [`EventStore`] is the backend-facing contract (single-page reads, appends,
//! snapshots). [`EventLog`] wraps a backend with the persist-listener hook and
//! exposes every read as a lazy [`CursorPages`] stream. [`EventFeed`] is the
//! narrow, snapshot-agnostic slice of an `EventLog` that views depend on.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use std::sync::{Arc, RwLock};

use eventide_core::{Cursor, CursorData, CursorPages, EntityKey, EventData};

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventRecord, EventStore, EventStoreError, GlobalEventRecord, KeyedEvent};

/// Callback invoked with `(pk, events)` after every successful persist.
pub type PersistListener<Pk, Ev> = Arc<dyn Fn(&Pk, &[EventData<Ev>]) + Send + Sync>;

/// Boxed single-page fetch behind an [`EventPages`] stream.
pub type PageFetch<'a, T> = Box<dyn FnMut(Cursor) -> Result<(Cursor, Vec<T>), EventStoreError> + 'a>;

/// Lazy cursor-paged read over a store.
pub type EventPages<'a, T> = CursorPages<Cursor, T, EventStoreError, PageFetch<'a, T>>;

/// Event store handle: a backend plus the persist-listener list.
///
/// Listeners accumulate for the lifetime of the handle and are invoked
/// synchronously, in registration order, on the thread that persisted. They
/// run after the backend append returned, so they may read the store.
pub struct EventLog<Pk, Ev, Snap> {
    backend: Arc<dyn EventStore<Pk, Ev, Snap>>,
    listeners: RwLock<Vec<PersistListener<Pk, Ev>>>,
}

impl<Pk, Ev, Snap> EventLog<Pk, Ev, Snap>
where
    Pk: EntityKey,
    Ev: Send + Sync + 'static,
    Snap: Send + Sync + 'static,
{
    pub fn new<S>(backend: S) -> Self
    where
        S: EventStore<Pk, Ev, Snap> + 'static,
    {
        Self::from_backend(Arc::new(backend))
    }

    pub fn from_backend(backend: Arc<dyn EventStore<Pk, Ev, Snap>>) -> Self {
        Self {
            backend,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register_on_persist_listener(
        &self,
        listener: PersistListener<Pk, Ev>,
    ) -> Result<(), EventStoreError> {
        self.listeners
            .write()
            .map_err(|_| EventStoreError::LockPoisoned)?
            .push(listener);
        Ok(())
    }

    /// Append `events` for `pk`, then notify every persist listener.
    ///
    /// Nothing is appended (and no listener runs) for an empty batch.
    pub fn persist(&self, pk: &Pk, events: &[EventData<Ev>]) -> Result<Vec<Cursor>, EventStoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let cursors = self.backend.append(pk, events)?;

        let listeners = self
            .listeners
            .read()
            .map_err(|_| EventStoreError::LockPoisoned)?
            .clone();
        for listener in &listeners {
            listener(pk, events);
        }

        Ok(cursors)
    }

    /// Events of `pk` with a cursor strictly greater than `cursor`, ascending.
    pub fn get_events(
        &self,
        pk: &Pk,
        cursor: Cursor,
        page_size: usize,
    ) -> EventPages<'_, EventRecord<Ev>> {
        let pk = pk.clone();
        paged(cursor, move |after| self.backend.read_entity(&pk, after, page_size))
    }

    /// Events of every entity with a cursor strictly greater than `cursor`, ascending.
    pub fn get_all_events(
        &self,
        cursor: Cursor,
        page_size: usize,
    ) -> EventPages<'_, GlobalEventRecord<Pk, Ev>> {
        paged(cursor, move |after| self.backend.read_all(after, page_size))
    }

    pub fn get_snapshot(&self, pk: &Pk) -> Result<Option<CursorData<Snap>>, EventStoreError> {
        self.backend.snapshot(pk)
    }

    pub fn save(&self, pk: &Pk, snapshot: &CursorData<Snap>) -> Result<(), EventStoreError> {
        self.backend.save_snapshot(pk, snapshot)
    }

    pub fn delete(&self, pk: &Pk) -> Result<(), EventStoreError> {
        self.backend.delete(pk)
    }
}

/// Build a cursor-paged stream from a single-page read; the next cursor is
/// the last record's cursor.
pub fn paged<'a, T: 'a>(
    cursor: Cursor,
    mut read_page: impl FnMut(Cursor) -> Result<Vec<CursorData<T>>, EventStoreError> + 'a,
) -> EventPages<'a, CursorData<T>> {
    let fetch: PageFetch<'a, CursorData<T>> = Box::new(
        move |after: Cursor| -> Result<(Cursor, Vec<CursorData<T>>), EventStoreError> {
            let page = read_page(after)?;
            let next = page.last().map(|record| record.cursor).unwrap_or(after);
            Ok((next, page))
        },
    );
    CursorPages::new(cursor, fetch)
}

/// The global feed plus the persist hook: what a materialized view needs from a store.
pub trait EventFeed<Pk, Ev>: Send + Sync {
    fn register_on_persist_listener(
        &self,
        listener: PersistListener<Pk, Ev>,
    ) -> Result<(), EventStoreError>;

    fn get_all_events(&self, cursor: Cursor, page_size: usize)
    -> EventPages<'_, GlobalEventRecord<Pk, Ev>>;
}

impl<Pk, Ev, Snap> EventFeed<Pk, Ev> for EventLog<Pk, Ev, Snap>
where
    Pk: EntityKey,
    Ev: Send + Sync + 'static,
    Snap: Send + Sync + 'static,
{
    fn register_on_persist_listener(
        &self,
        listener: PersistListener<Pk, Ev>,
    ) -> Result<(), EventStoreError> {
        EventLog::register_on_persist_listener(self, listener)
    }

    fn get_all_events(
        &self,
        cursor: Cursor,
        page_size: usize,
    ) -> EventPages<'_, GlobalEventRecord<Pk, Ev>> {
        EventLog::get_all_events(self, cursor, page_size)
    }
}

impl<Pk, Ev, F> EventFeed<Pk, Ev> for Arc<F>
where
    F: EventFeed<Pk, Ev> + ?Sized,
{
    fn register_on_persist_listener(
        &self,
        listener: PersistListener<Pk, Ev>,
    ) -> Result<(), EventStoreError> {
        (**self).register_on_persist_listener(listener)
    }

    fn get_all_events(
        &self,
        cursor: Cursor,
        page_size: usize,
    ) -> EventPages<'_, GlobalEventRecord<Pk, Ev>> {
        (**self).get_all_events(cursor, page_size)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use eventide_core::PagesExt;

    use super::*;

    type Log = EventLog<String, String, String>;

    fn log() -> Log {
        EventLog::new(InMemoryEventStore::new())
    }

    fn events(payloads: &[&str]) -> Vec<EventData<String>> {
        payloads
            .iter()
            .enumerate()
            .map(|(i, p)| EventData::new(p.to_string(), i as i64))
            .collect()
    }

    fn payloads(log: &Log, pk: &str, cursor: Cursor, page_size: usize) -> Vec<String> {
        log.get_events(&pk.to_string(), cursor, page_size)
            .flatten_pages()
            .map(|r| r.unwrap().payload.payload)
            .collect()
    }

    #[test]
    fn listeners_see_every_batch_in_persist_order() {
        let log = log();
        let seen: Arc<Mutex<Vec<(String, Vec<String>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        log.register_on_persist_listener(Arc::new(move |pk: &String, batch: &[EventData<String>]| {
            let payloads = batch.iter().map(|e| e.payload.clone()).collect();
            sink.lock().unwrap().push((pk.clone(), payloads));
        }))
        .unwrap();

        let pk = "x".to_string();
        for i in 0..5 {
            log.persist(&pk, &events(&[&format!("e{i}"), "tail"])).unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, (key, batch)) in seen.iter().enumerate() {
            assert_eq!(key, "x");
            assert_eq!(batch, &vec![format!("e{i}"), "tail".to_string()]);
        }
    }

    #[test]
    fn listeners_accumulate_and_run_in_registration_order() {
        let log = log();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            log.register_on_persist_listener(Arc::new(move |_: &String, _: &[EventData<String>]| {
                order.lock().unwrap().push(id);
            }))
            .unwrap();
        }

        log.persist(&"x".to_string(), &events(&["a"])).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn empty_batches_do_not_notify() {
        let log = log();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        log.register_on_persist_listener(Arc::new(move |_: &String, _: &[EventData<String>]| {
            *counter.lock().unwrap() += 1;
        }))
        .unwrap();

        assert!(log.persist(&"x".to_string(), &[]).unwrap().is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn listeners_may_read_the_store() {
        let log = Arc::new(log());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&log);
        let sink = Arc::clone(&observed);
        log.register_on_persist_listener(Arc::new(move |pk: &String, _: &[EventData<String>]| {
            if let Some(log) = weak.upgrade() {
                let n = log.get_events(pk, Cursor::BEGINNING, 10).flatten_pages().count();
                sink.lock().unwrap().push(n);
            }
        }))
        .unwrap();

        log.persist(&"x".to_string(), &events(&["a", "b"])).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![2]);
    }

    #[test]
    fn paged_reads_are_complete_for_every_page_size() {
        let log = log();
        let pk = "x".to_string();
        log.persist(&pk, &events(&["a", "b", "c"])).unwrap();

        for page_size in 1..=4 {
            assert_eq!(payloads(&log, "x", Cursor::BEGINNING, page_size), vec!["a", "b", "c"]);
        }

        let one_per_page: Vec<usize> = log
            .get_events(&pk, Cursor::BEGINNING, 1)
            .map(|p| p.unwrap().len())
            .collect();
        assert_eq!(one_per_page, vec![1, 1, 1]);
        assert_eq!(log.get_events(&pk, Cursor::BEGINNING, 4).count(), 1);
    }

    #[test]
    fn reads_start_strictly_after_the_cursor() {
        let log = log();
        let pk = "x".to_string();
        let cursors = log.persist(&pk, &events(&["a", "b", "c"])).unwrap();

        assert_eq!(payloads(&log, "x", cursors[0], 2), vec!["b", "c"]);
        assert!(payloads(&log, "x", cursors[2], 2).is_empty());
    }

    #[test]
    fn global_feed_interleaves_entities_in_cursor_order() {
        let log = log();
        log.persist(&"x".to_string(), &events(&["x1"])).unwrap();
        log.persist(&"y".to_string(), &events(&["y1"])).unwrap();
        log.persist(&"x".to_string(), &events(&["x2"])).unwrap();

        let all: Vec<(String, String)> = log
            .get_all_events(Cursor::BEGINNING, 2)
            .flatten_pages()
            .map(|r| {
                let record = r.unwrap();
                (record.payload.pk, record.payload.event.payload)
            })
            .collect();
        assert_eq!(
            all,
            vec![
                ("x".to_string(), "x1".to_string()),
                ("y".to_string(), "y1".to_string()),
                ("x".to_string(), "x2".to_string()),
            ]
        );
    }

    #[test]
    fn feed_is_usable_through_arc_dyn() {
        let log = Arc::new(log());
        log.persist(&"x".to_string(), &events(&["a"])).unwrap();

        let feed: Arc<dyn EventFeed<String, String>> = log;
        assert_eq!(feed.get_all_events(Cursor::BEGINNING, 10).flatten_pages().count(), 1);
    }
}
