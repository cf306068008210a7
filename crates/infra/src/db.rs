//! Postgres connection wiring shared by the durable adapters.
//!
//! The engine's contracts are synchronous, so the Postgres adapters drive
//! `sqlx` on a runtime owned by [`PgClient`]. Calls block the current thread
//! and must not be made from inside another async runtime.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to start database runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("invalid sql identifier '{0}' (expected [a-z_][a-z0-9_]*)")]
    InvalidIdentifier(String),
}

/// A Postgres pool plus the runtime that drives it.
#[derive(Debug, Clone)]
pub struct PgClient {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PgClient {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

    pub fn connect(database_url: &str) -> Result<Self, DbError> {
        Self::connect_with(database_url, Self::DEFAULT_MAX_CONNECTIONS)
    }

    pub fn connect_with(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(database_url),
        )?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `future` to completion on the client's runtime.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Accept only lowercase identifiers that are safe to splice into DDL/DML.
pub fn validate_identifier(name: &str) -> Result<&str, DbError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_head && valid_tail && name.len() <= 48 {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}
