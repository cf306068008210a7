use std::collections::HashMap;
use std::sync::RwLock;

use eventide_core::{Cursor, CursorData, EntityKey, EventData};

use super::r#trait::{EventRecord, EventStore, EventStoreError, GlobalEventRecord, KeyedEvent};

struct State<Pk, Ev, Snap> {
    /// Next cursor to hand out; shared by the per-entity and global spaces.
    next_cursor: i64,
    streams: HashMap<Pk, Vec<EventRecord<Ev>>>,
    global: Vec<GlobalEventRecord<Pk, Ev>>,
    snapshots: HashMap<Pk, CursorData<Snap>>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev and single-process embedding. One lock guards the
/// per-entity logs, the global log and the snapshot map, so an append is
/// atomic for readers. Deleting an entity keeps its global-log entries.
pub struct InMemoryEventStore<Pk, Ev, Snap> {
    state: RwLock<State<Pk, Ev, Snap>>,
}

impl<Pk, Ev, Snap> InMemoryEventStore<Pk, Ev, Snap> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Pk, Ev, Snap> Default for InMemoryEventStore<Pk, Ev, Snap> {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                next_cursor: 1,
                streams: HashMap::new(),
                global: Vec::new(),
                snapshots: HashMap::new(),
            }),
        }
    }
}

impl<Pk, Ev, Snap> core::fmt::Debug for InMemoryEventStore<Pk, Ev, Snap> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let events = self.state.read().map(|s| s.global.len()).unwrap_or_default();
        f.debug_struct("InMemoryEventStore").field("events", &events).finish()
    }
}

/// Records with a cursor strictly greater than `after`; `records` is sorted by cursor.
fn page_after<T: Clone>(records: &[CursorData<T>], after: Cursor, limit: usize) -> Vec<CursorData<T>> {
    let start = records.partition_point(|record| record.cursor <= after);
    records[start..].iter().take(limit).cloned().collect()
}

impl<Pk, Ev, Snap> EventStore<Pk, Ev, Snap> for InMemoryEventStore<Pk, Ev, Snap>
where
    Pk: EntityKey,
    Ev: Clone + Send + Sync,
    Snap: Clone + Send + Sync,
{
    fn append(&self, pk: &Pk, events: &[EventData<Ev>]) -> Result<Vec<Cursor>, EventStoreError> {
        let mut state = self.state.write().map_err(|_| EventStoreError::LockPoisoned)?;
        let state = &mut *state;

        let stream = state.streams.entry(pk.clone()).or_default();
        let mut cursors = Vec::with_capacity(events.len());
        for event in events {
            let cursor = Cursor::new(state.next_cursor);
            state.next_cursor += 1;

            stream.push(CursorData::new(event.clone(), cursor));
            state.global.push(CursorData::new(
                KeyedEvent {
                    pk: pk.clone(),
                    event: event.clone(),
                },
                cursor,
            ));
            cursors.push(cursor);
        }

        Ok(cursors)
    }

    fn read_entity(
        &self,
        pk: &Pk,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<EventRecord<Ev>>, EventStoreError> {
        let state = self.state.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(state
            .streams
            .get(pk)
            .map(|stream| page_after(stream, after, limit))
            .unwrap_or_default())
    }

    fn read_all(
        &self,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<GlobalEventRecord<Pk, Ev>>, EventStoreError> {
        let state = self.state.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(page_after(&state.global, after, limit))
    }

    fn snapshot(&self, pk: &Pk) -> Result<Option<CursorData<Snap>>, EventStoreError> {
        let state = self.state.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(state.snapshots.get(pk).cloned())
    }

    fn save_snapshot(&self, pk: &Pk, snapshot: &CursorData<Snap>) -> Result<(), EventStoreError> {
        let mut state = self.state.write().map_err(|_| EventStoreError::LockPoisoned)?;
        let folded = state.streams.get(pk).is_some_and(|stream| {
            stream
                .binary_search_by_key(&snapshot.cursor, |record| record.cursor)
                .is_ok()
        });
        if folded {
            state.snapshots.insert(pk.clone(), snapshot.clone());
        }
        Ok(())
    }

    fn delete(&self, pk: &Pk) -> Result<(), EventStoreError> {
        let mut state = self.state.write().map_err(|_| EventStoreError::LockPoisoned)?;
        state.streams.remove(pk);
        state.snapshots.remove(pk);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    type Store = InMemoryEventStore<String, String, String>;

    fn pk(s: &str) -> String {
        s.to_string()
    }

    fn batch(payloads: &[&str]) -> Vec<EventData<String>> {
        payloads.iter().map(|p| EventData::new(p.to_string(), 0)).collect()
    }

    #[test]
    fn cursors_are_shared_across_entities_and_strictly_increase() {
        let store = Store::new();
        let a = store.append(&pk("a"), &batch(&["1", "2"])).unwrap();
        let b = store.append(&pk("b"), &batch(&["3"])).unwrap();
        let c = store.append(&pk("a"), &batch(&["4"])).unwrap();

        let all: Vec<Cursor> = a.into_iter().chain(b).chain(c).collect();
        assert_eq!(all, (1..=4).map(Cursor::new).collect::<Vec<_>>());
    }

    #[test]
    fn entity_and_global_cursors_match() {
        let store = Store::new();
        store.append(&pk("a"), &batch(&["1"])).unwrap();
        store.append(&pk("b"), &batch(&["2"])).unwrap();

        let entity = store.read_entity(&pk("b"), Cursor::BEGINNING, 10).unwrap();
        let global = store.read_all(Cursor::BEGINNING, 10).unwrap();
        assert_eq!(entity[0].cursor, global[1].cursor);
        assert_eq!(global[1].payload.pk, "b");
    }

    #[test]
    fn reading_unknown_entity_is_empty() {
        let store = Store::new();
        assert!(store.read_entity(&pk("nope"), Cursor::BEGINNING, 10).unwrap().is_empty());
        assert_eq!(store.snapshot(&pk("nope")).unwrap(), None);
    }

    #[test]
    fn snapshot_save_is_last_write_wins() {
        let store = Store::new();
        store.append(&pk("a"), &batch(&["1", "2"])).unwrap();
        store
            .save_snapshot(&pk("a"), &CursorData::new("first".into(), Cursor::new(1)))
            .unwrap();
        store
            .save_snapshot(&pk("a"), &CursorData::new("second".into(), Cursor::new(2)))
            .unwrap();

        assert_eq!(
            store.snapshot(&pk("a")).unwrap(),
            Some(CursorData::new("second".to_string(), Cursor::new(2)))
        );
    }

    #[test]
    fn delete_removes_log_and_snapshot_but_not_global_entries() {
        let store = Store::new();
        store.append(&pk("a"), &batch(&["1"])).unwrap();
        store
            .save_snapshot(&pk("a"), &CursorData::new("s".into(), Cursor::new(1)))
            .unwrap();

        store.delete(&pk("a")).unwrap();

        assert!(store.read_entity(&pk("a"), Cursor::BEGINNING, 10).unwrap().is_empty());
        assert_eq!(store.snapshot(&pk("a")).unwrap(), None);
        assert_eq!(store.read_all(Cursor::BEGINNING, 10).unwrap().len(), 1);

        // A fresh log under the same key continues the cursor sequence.
        let again = store.append(&pk("a"), &batch(&["2"])).unwrap();
        assert_eq!(again, vec![Cursor::new(2)]);
    }

    #[test]
    fn snapshot_of_a_deleted_log_is_not_saved() {
        let store = Store::new();
        store.append(&pk("a"), &batch(&["1"])).unwrap();
        store.delete(&pk("a")).unwrap();

        // A fold that started before the delete finishes afterwards.
        store
            .save_snapshot(&pk("a"), &CursorData::new("stale".into(), Cursor::new(1)))
            .unwrap();
        assert_eq!(store.snapshot(&pk("a")).unwrap(), None);

        store.append(&pk("a"), &batch(&["2"])).unwrap();
        store
            .save_snapshot(&pk("a"), &CursorData::new("stale".into(), Cursor::new(1)))
            .unwrap();
        assert_eq!(store.snapshot(&pk("a")).unwrap(), None);
    }

    #[test]
    fn concurrent_appends_never_share_a_cursor() {
        let store = Arc::new(Store::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .append(&format!("w{w}"), &batch(&[i.to_string().as_str()]))
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let global = store.read_all(Cursor::BEGINNING, 1_000).unwrap();
        assert_eq!(global.len(), 100);
        assert!(global.windows(2).all(|w| w[0].cursor < w[1].cursor));

        for w in 0..4 {
            let stream = store.read_entity(&format!("w{w}"), Cursor::BEGINNING, 1_000).unwrap();
            let payloads: Vec<String> = stream.into_iter().map(|r| r.payload.payload).collect();
            let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
            assert_eq!(payloads, expected);
        }
    }

    proptest! {
        #[test]
        fn interleaved_persists_get_strictly_increasing_cursors(
            batches in prop::collection::vec((0usize..4, 1usize..4), 1..30),
        ) {
            let store = Store::new();
            let mut assigned = Vec::new();
            for (key, len) in &batches {
                let events: Vec<EventData<String>> =
                    (0..*len).map(|i| EventData::new(i.to_string(), 0)).collect();
                assigned.extend(store.append(&format!("k{key}"), &events).unwrap());
            }

            prop_assert!(assigned.windows(2).all(|w| w[0] < w[1]));

            let global = store.read_all(Cursor::BEGINNING, 1_000).unwrap();
            let global: Vec<Cursor> = global.into_iter().map(|r| r.cursor).collect();
            prop_assert_eq!(&global, &assigned);

            for key in 0..4 {
                let stream = store.read_entity(&format!("k{key}"), Cursor::BEGINNING, 1_000).unwrap();
                prop_assert!(stream.windows(2).all(|w| w[0].cursor < w[1].cursor));
            }
        }
    }
}
