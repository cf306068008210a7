//! Postgres-backed event store implementation.
//!
//! ## Schema
//!
//! For a store named `posts`:
//!
//! ```sql
//! CREATE TABLE posts_events (
//!     id         BIGSERIAL PRIMARY KEY,   -- cursor, in both spaces
//!     entity_key TEXT   NOT NULL,
//!     event      JSONB  NOT NULL,
//!     time       BIGINT NOT NULL
//! );
//! CREATE TABLE posts_snapshots (
//!     entity_key TEXT PRIMARY KEY,
//!     data       JSONB  NOT NULL,
//!     cursor     BIGINT NOT NULL
//! );
//! ```
//!
//! ## Error mapping
//!
//! | SQLx error | EventStoreError |
//! |------------|-----------------|
//! | any query/connection failure | `Backend` |
//! | JSON encode/decode of payloads | `Serialization` |
//! | stored key that fails `EntityKey::decode` | `InvalidKey` |

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{Span, instrument};

use eventide_core::{Cursor, CursorData, EntityKey, EventData};

use super::r#trait::{EventRecord, EventStore, EventStoreError, GlobalEventRecord, KeyedEvent};
use crate::db::{PgClient, validate_identifier};

/// Postgres-backed append-only event store.
///
/// Appends take a transaction-scoped advisory lock keyed on the events table,
/// so `id` order equals commit order and a reader paging with
/// `id > $cursor` never skips a late-committing append.
pub struct PostgresEventStore<Pk, Ev, Snap> {
    client: PgClient,
    events_table: String,
    snapshots_table: String,
    _marker: PhantomData<fn() -> (Pk, Ev, Snap)>,
}

impl<Pk, Ev, Snap> core::fmt::Debug for PostgresEventStore<Pk, Ev, Snap> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresEventStore")
            .field("events_table", &self.events_table)
            .field("snapshots_table", &self.snapshots_table)
            .finish()
    }
}

impl<Pk, Ev, Snap> PostgresEventStore<Pk, Ev, Snap> {
    /// Bind a store named `name` (tables `<name>_events` / `<name>_snapshots`).
    pub fn new(client: PgClient, name: &str) -> Result<Self, EventStoreError> {
        let name = validate_identifier(name).map_err(|e| EventStoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            events_table: format!("{name}_events"),
            snapshots_table: format!("{name}_snapshots"),
            _marker: PhantomData,
        })
    }

    /// Create the store's tables if they do not exist yet.
    #[instrument(skip(self), fields(table = %self.events_table), err)]
    pub fn ensure_schema(&self) -> Result<(), EventStoreError> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    entity_key TEXT NOT NULL,
                    event JSONB NOT NULL,
                    time BIGINT NOT NULL
                )",
                self.events_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_entity_key_idx ON {0} (entity_key, id)",
                self.events_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    entity_key TEXT PRIMARY KEY,
                    data JSONB NOT NULL,
                    cursor BIGINT NOT NULL
                )",
                self.snapshots_table
            ),
        ];

        self.client.block_on(async {
            for statement in &statements {
                sqlx::query(statement)
                    .execute(self.client.pool())
                    .await
                    .map_err(|e| map_sqlx_error("ensure_schema", e))?;
            }
            Ok::<_, EventStoreError>(())
        })
    }
}

impl<Pk, Ev, Snap> EventStore<Pk, Ev, Snap> for PostgresEventStore<Pk, Ev, Snap>
where
    Pk: EntityKey,
    Ev: Serialize + DeserializeOwned,
    Snap: Serialize + DeserializeOwned,
{
    #[instrument(
        skip(self, events),
        fields(table = %self.events_table, entity_key = %pk.encode(), event_count = events.len()),
        err
    )]
    fn append(&self, pk: &Pk, events: &[EventData<Ev>]) -> Result<Vec<Cursor>, EventStoreError> {
        let key = pk.encode();
        let encoded = events
            .iter()
            .map(|e| -> Result<(JsonValue, i64), EventStoreError> {
                Ok((to_json(&e.payload)?, e.timestamp))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let insert = format!(
            "INSERT INTO {} (entity_key, event, time) VALUES ($1, $2, $3) RETURNING id",
            self.events_table
        );

        self.client.block_on(async {
            let mut tx = self
                .client
                .pool()
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;

            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&self.events_table)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("advisory_lock", e))?;

            let mut cursors = Vec::with_capacity(encoded.len());
            for (event, time) in encoded {
                let id: i64 = sqlx::query_scalar(&insert)
                    .bind(&key)
                    .bind(event)
                    .bind(time)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("insert_event", e))?;
                cursors.push(Cursor::new(id));
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;

            Ok::<_, EventStoreError>(cursors)
        })
    }

    #[instrument(
        skip(self),
        fields(
            table = %self.events_table,
            entity_key = %pk.encode(),
            after = %after,
            row_count = tracing::field::Empty
        ),
        err
    )]
    fn read_entity(
        &self,
        pk: &Pk,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<EventRecord<Ev>>, EventStoreError> {
        let query = format!(
            "SELECT id, event, time FROM {} WHERE entity_key = $1 AND id > $2 ORDER BY id ASC LIMIT $3",
            self.events_table
        );

        let rows = self.client.block_on(async {
            sqlx::query(&query)
                .bind(pk.encode())
                .bind(after.value())
                .bind(to_limit(limit))
                .fetch_all(self.client.pool())
                .await
                .map_err(|e| map_sqlx_error("read_entity", e))
        })?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(event_record).collect()
    }

    #[instrument(skip(self), fields(table = %self.events_table, after = %after), err)]
    fn read_all(
        &self,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<GlobalEventRecord<Pk, Ev>>, EventStoreError> {
        let query = format!(
            "SELECT id, entity_key, event, time FROM {} WHERE id > $1 ORDER BY id ASC LIMIT $2",
            self.events_table
        );

        let rows = self.client.block_on(async {
            sqlx::query(&query)
                .bind(after.value())
                .bind(to_limit(limit))
                .fetch_all(self.client.pool())
                .await
                .map_err(|e| map_sqlx_error("read_all", e))
        })?;

        rows.iter()
            .map(|row| -> Result<GlobalEventRecord<Pk, Ev>, EventStoreError> {
                let key: String = row
                    .try_get("entity_key")
                    .map_err(|e| map_sqlx_error("read_all", e))?;
                let pk = Pk::decode(&key)?;
                Ok(event_record(row)?.map(|event| KeyedEvent { pk, event }))
            })
            .collect()
    }

    #[instrument(
        skip(self),
        fields(table = %self.snapshots_table, entity_key = %pk.encode()),
        err
    )]
    fn snapshot(&self, pk: &Pk) -> Result<Option<CursorData<Snap>>, EventStoreError> {
        let query = format!(
            "SELECT data, cursor FROM {} WHERE entity_key = $1",
            self.snapshots_table
        );

        let row = self.client.block_on(async {
            sqlx::query(&query)
                .bind(pk.encode())
                .fetch_optional(self.client.pool())
                .await
                .map_err(|e| map_sqlx_error("load_snapshot", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data: JsonValue = row.try_get("data").map_err(|e| map_sqlx_error("load_snapshot", e))?;
        let cursor: i64 = row.try_get("cursor").map_err(|e| map_sqlx_error("load_snapshot", e))?;
        Ok(Some(CursorData::new(from_json(data)?, Cursor::new(cursor))))
    }

    #[instrument(
        skip(self, snapshot),
        fields(table = %self.snapshots_table, entity_key = %pk.encode(), cursor = %snapshot.cursor),
        err
    )]
    fn save_snapshot(&self, pk: &Pk, snapshot: &CursorData<Snap>) -> Result<(), EventStoreError> {
        let data = to_json(&snapshot.payload)?;
        let query = format!(
            "INSERT INTO {} (entity_key, data, cursor)
             SELECT $1, $2, $3
             WHERE EXISTS (SELECT 1 FROM {} WHERE entity_key = $1 AND id = $3)
             ON CONFLICT (entity_key) DO UPDATE SET data = EXCLUDED.data, cursor = EXCLUDED.cursor",
            self.snapshots_table, self.events_table
        );

        self.client.block_on(async {
            sqlx::query(&query)
                .bind(pk.encode())
                .bind(data)
                .bind(snapshot.cursor.value())
                .execute(self.client.pool())
                .await
                .map_err(|e| map_sqlx_error("store_snapshot", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.events_table, entity_key = %pk.encode()), err)]
    fn delete(&self, pk: &Pk) -> Result<(), EventStoreError> {
        let key = pk.encode();
        let delete_events = format!("DELETE FROM {} WHERE entity_key = $1", self.events_table);
        let delete_snapshot = format!("DELETE FROM {} WHERE entity_key = $1", self.snapshots_table);

        self.client.block_on(async {
            let mut tx = self
                .client
                .pool()
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;

            for statement in [&delete_events, &delete_snapshot] {
                sqlx::query(statement)
                    .bind(&key)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))
        })
    }
}

fn event_record<Ev: DeserializeOwned>(row: &PgRow) -> Result<EventRecord<Ev>, EventStoreError> {
    let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("decode_row", e))?;
    let event: JsonValue = row.try_get("event").map_err(|e| map_sqlx_error("decode_row", e))?;
    let time: i64 = row.try_get("time").map_err(|e| map_sqlx_error("decode_row", e))?;
    Ok(CursorData::new(EventData::new(from_json(event)?, time), Cursor::new(id)))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, EventStoreError> {
    serde_json::to_value(value).map_err(|e| EventStoreError::Serialization(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(value: JsonValue) -> Result<T, EventStoreError> {
    serde_json::from_value(value).map_err(|e| EventStoreError::Serialization(e.to_string()))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Map SQLx errors into `EventStoreError`, keeping the failing operation in the message.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            EventStoreError::Backend(format!(
                "database error in {operation} [{code}]: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
