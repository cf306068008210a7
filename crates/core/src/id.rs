//! Entity keys and key generation.

use core::fmt::Debug;
use core::hash::Hash;
use core::str::FromStr;

use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Key under which one independent, append-only event stream exists.
///
/// Durable adapters store keys in their string form, so every key must
/// round-trip through [`encode`](EntityKey::encode) / [`decode`](EntityKey::decode).
pub trait EntityKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn encode(&self) -> String;

    fn decode(raw: &str) -> DomainResult<Self>;
}

impl EntityKey for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> DomainResult<Self> {
        Ok(raw.to_string())
    }
}

impl EntityKey for Uuid {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> DomainResult<Self> {
        Uuid::from_str(raw).map_err(|e| DomainError::invalid_key(format!("uuid: {e}")))
    }
}

impl EntityKey for i64 {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> DomainResult<Self> {
        raw.parse()
            .map_err(|e| DomainError::invalid_key(format!("i64: {e}")))
    }
}

/// Generates fresh entity keys.
///
/// Keys must be unique with overwhelming probability for the lifetime of the system.
pub trait KeyProvider<Pk>: Send + Sync {
    fn generate_new_key(&self) -> Pk;
}

impl<Pk, F> KeyProvider<Pk> for F
where
    F: Fn() -> Pk + Send + Sync,
{
    fn generate_new_key(&self) -> Pk {
        self()
    }
}

/// Random 128-bit keys rendered as hyphenated UUID strings.
#[derive(Debug, Default, Copy, Clone)]
pub struct UuidKeyProvider;

impl KeyProvider<String> for UuidKeyProvider {
    fn generate_new_key(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

impl KeyProvider<Uuid> for UuidKeyProvider {
    fn generate_new_key(&self) -> Uuid {
        Uuid::new_v4()
    }
}
