//! `eventide-core` — event-sourcing building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): the
//! event/cursor data model, entity keys, the domain-facing handler traits and
//! the pagination primitives every store read is expressed with.

pub mod data;
pub mod error;
pub mod handler;
pub mod id;
pub mod pagination;

pub use data::{Cursor, CursorData, EventData};
pub use error::{DomainError, DomainResult, ensure};
pub use handler::{CommandHandler, EventReducer};
pub use id::{EntityKey, KeyProvider, UuidKeyProvider};
pub use pagination::{CursorPages, OffsetPages, PagesExt, partition};
