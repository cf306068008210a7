//! Pub/sub wiring for the engine.
//!
//! The contract and the in-process bus live in `eventide-pubsub`; durable
//! transports live here behind cargo features.

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use eventide_pubsub::{InMemoryPubSub, MessageHandler, PubSub, PubSubError};

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsPubSub;
