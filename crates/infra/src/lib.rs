//! Engine layer: event stores, the event-source orchestrator,
//! materialized views, pub/sub transports, configuration and worker threads.
//!
//! Every contract has an in-memory implementation for tests and embedding,
//! plus a durable adapter (Postgres for stores, Redis Streams for pub/sub
//! behind the `redis` feature).

pub mod config;
pub mod db;
pub mod event_source;
pub mod event_store;
pub mod event_view;
pub mod pubsub;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use db::{DbError, PgClient};
pub use event_source::{EventSource, EventSourceError};
pub use event_store::{
    EventFeed, EventLog, EventRecord, EventStore, EventStoreError, GlobalEventRecord,
    InMemoryEventStore, KeyedEvent, PersistListener, PostgresEventStore,
};
pub use event_view::{
    CatchUpStats, EventView, EventViewHolder, InMemoryViewStore, PostgresViewStore, ViewError,
    ViewReducer, ViewState, ViewStore,
};
pub use workers::WorkerHandle;
