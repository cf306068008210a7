//! Event log data model.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Position of a record in an append-only log.
///
/// Cursors are assigned by the store at append time and strictly increase
/// within a cursor space. [`Cursor::BEGINNING`] sorts before every assigned cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    /// The logical "before all cursors" position.
    pub const BEGINNING: Cursor = Cursor(-1);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub fn is_beginning(self) -> bool {
        self == Self::BEGINNING
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::BEGINNING
    }
}

impl core::fmt::Display for Cursor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for Cursor {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Cursor> for i64 {
    fn from(value: Cursor) -> Self {
        value.0
    }
}

/// An immutable domain event plus the time (epoch millis) it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData<E> {
    pub payload: E,
    pub timestamp: i64,
}

impl<E> EventData<E> {
    pub fn new(payload: E, timestamp: i64) -> Self {
        Self { payload, timestamp }
    }

    /// Stamp `payload` with the current wall-clock time.
    pub fn now(payload: E) -> Self {
        Self::new(payload, Utc::now().timestamp_millis())
    }
}

/// Any value paired with the cursor position it reflects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData<T> {
    pub payload: T,
    pub cursor: Cursor,
}

impl<T> CursorData<T> {
    pub fn new(payload: T, cursor: Cursor) -> Self {
        Self { payload, cursor }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CursorData<U> {
        CursorData {
            payload: f(self.payload),
            cursor: self.cursor,
        }
    }
}
