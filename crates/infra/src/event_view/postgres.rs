//! Postgres-backed view store.
//!
//! ## Schema
//!
//! Checkpoints of every view share one table; each view owns an entity table:
//!
//! ```sql
//! CREATE TABLE views (
//!     name   TEXT PRIMARY KEY,
//!     cursor BIGINT NOT NULL
//! );
//! CREATE TABLE post_summaries_entities (
//!     entity_key TEXT PRIMARY KEY,
//!     data       JSONB NOT NULL
//! );
//! ```
//!
//! A commit writes entity upserts, entity deletes and the checkpoint in one
//! transaction.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::Row;
use tracing::{Span, instrument};

use eventide_core::{Cursor, EntityKey};

use super::ViewError;
use super::store::ViewStore;
use crate::db::{PgClient, validate_identifier};
use crate::event_store::EventStoreError;
use crate::event_store::postgres::{from_json, map_sqlx_error, to_json};

const CHECKPOINTS_TABLE: &str = "views";

pub struct PostgresViewStore<Pk, E> {
    client: PgClient,
    name: String,
    entities_table: String,
    _marker: PhantomData<fn() -> (Pk, E)>,
}

impl<Pk, E> core::fmt::Debug for PostgresViewStore<Pk, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresViewStore")
            .field("name", &self.name)
            .field("entities_table", &self.entities_table)
            .finish()
    }
}

impl<Pk, E> PostgresViewStore<Pk, E> {
    /// Bind the store of view `name` (table `<name>_entities`).
    pub fn new(client: PgClient, name: &str) -> Result<Self, ViewError> {
        let name = validate_identifier(name).map_err(|e| ViewError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            name: name.to_string(),
            entities_table: format!("{name}_entities"),
            _marker: PhantomData,
        })
    }

    #[instrument(skip(self), fields(view = %self.name), err)]
    pub fn ensure_schema(&self) -> Result<(), ViewError> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {CHECKPOINTS_TABLE} (
                    name TEXT PRIMARY KEY,
                    cursor BIGINT NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    entity_key TEXT PRIMARY KEY,
                    data JSONB NOT NULL
                )",
                self.entities_table
            ),
        ];

        self.client.block_on(async {
            for statement in &statements {
                sqlx::query(statement)
                    .execute(self.client.pool())
                    .await
                    .map_err(|e| store_error(map_sqlx_error("ensure_schema", e)))?;
            }
            Ok::<_, ViewError>(())
        })
    }
}

impl<Pk, E> ViewStore<Pk, E> for PostgresViewStore<Pk, E>
where
    Pk: EntityKey,
    E: Serialize + DeserializeOwned,
{
    #[instrument(skip(self), fields(view = %self.name), err)]
    fn checkpoint(&self) -> Result<Cursor, ViewError> {
        let query = format!("SELECT cursor FROM {CHECKPOINTS_TABLE} WHERE name = $1");

        let cursor: Option<i64> = self.client.block_on(async {
            sqlx::query_scalar(&query)
                .bind(&self.name)
                .fetch_optional(self.client.pool())
                .await
                .map_err(|e| store_error(map_sqlx_error("load_checkpoint", e)))
        })?;

        Ok(cursor.map(Cursor::new).unwrap_or(Cursor::BEGINNING))
    }

    #[instrument(skip(self), fields(view = %self.name, entity_key = %pk.encode()), err)]
    fn entity(&self, pk: &Pk) -> Result<Option<E>, ViewError> {
        let query = format!("SELECT data FROM {} WHERE entity_key = $1", self.entities_table);

        let data: Option<JsonValue> = self.client.block_on(async {
            sqlx::query_scalar(&query)
                .bind(pk.encode())
                .fetch_optional(self.client.pool())
                .await
                .map_err(|e| store_error(map_sqlx_error("load_entity", e)))
        })?;

        data.map(|value| from_json(value).map_err(store_error)).transpose()
    }

    #[instrument(skip(self), fields(view = %self.name, row_count = tracing::field::Empty), err)]
    fn entities(&self) -> Result<Vec<(Pk, E)>, ViewError> {
        let query = format!("SELECT entity_key, data FROM {} ORDER BY entity_key", self.entities_table);

        let rows = self.client.block_on(async {
            sqlx::query(&query)
                .fetch_all(self.client.pool())
                .await
                .map_err(|e| store_error(map_sqlx_error("load_entities", e)))
        })?;

        Span::current().record("row_count", rows.len());
        rows.iter()
            .map(|row| -> Result<(Pk, E), ViewError> {
                let key: String = row
                    .try_get("entity_key")
                    .map_err(|e| store_error(map_sqlx_error("decode_row", e)))?;
                let data: JsonValue = row
                    .try_get("data")
                    .map_err(|e| store_error(map_sqlx_error("decode_row", e)))?;
                Ok((Pk::decode(&key)?, from_json(data).map_err(store_error)?))
            })
            .collect()
    }

    #[instrument(
        skip(self, upserts, deletes),
        fields(
            view = %self.name,
            checkpoint = %checkpoint,
            upserts = upserts.len(),
            deletes = deletes.len()
        ),
        err
    )]
    fn commit(
        &self,
        checkpoint: Cursor,
        upserts: Vec<(Pk, E)>,
        deletes: Vec<Pk>,
    ) -> Result<(), ViewError> {
        let encoded = upserts
            .iter()
            .map(|(pk, entity)| -> Result<(String, JsonValue), ViewError> {
                Ok((pk.encode(), to_json(entity).map_err(store_error)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let deleted: Vec<String> = deletes.iter().map(EntityKey::encode).collect();

        let upsert = format!(
            "INSERT INTO {} (entity_key, data) VALUES ($1, $2)
             ON CONFLICT (entity_key) DO UPDATE SET data = EXCLUDED.data",
            self.entities_table
        );
        let delete = format!("DELETE FROM {} WHERE entity_key = ANY($1)", self.entities_table);
        let save_checkpoint = format!(
            "INSERT INTO {CHECKPOINTS_TABLE} (name, cursor) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET cursor = GREATEST({CHECKPOINTS_TABLE}.cursor, EXCLUDED.cursor)"
        );

        self.client.block_on(async {
            let mut tx = self
                .client
                .pool()
                .begin()
                .await
                .map_err(|e| store_error(map_sqlx_error("begin_transaction", e)))?;

            for (key, data) in encoded {
                sqlx::query(&upsert)
                    .bind(key)
                    .bind(data)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_error(map_sqlx_error("upsert_entity", e)))?;
            }

            if !deleted.is_empty() {
                sqlx::query(&delete)
                    .bind(&deleted)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_error(map_sqlx_error("delete_entities", e)))?;
            }

            sqlx::query(&save_checkpoint)
                .bind(&self.name)
                .bind(checkpoint.value())
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error(map_sqlx_error("save_checkpoint", e)))?;

            tx.commit()
                .await
                .map_err(|e| store_error(map_sqlx_error("commit_transaction", e)))
        })
    }
}

/// Re-tag store-layer errors as view-store errors.
fn store_error(err: EventStoreError) -> ViewError {
    match err {
        EventStoreError::Serialization(msg) => ViewError::Serialization(msg),
        EventStoreError::Backend(msg) => ViewError::Backend(msg),
        other => ViewError::Store(other),
    }
}
