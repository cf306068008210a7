//! Pub/Sub contract (mechanics only).
//!
//! Messages are plain strings published to a *topic* under a *partition key*.
//! Consumers register under a *consumer group*; every group registered on a
//! topic receives each message.
//!
//! ## Delivery guarantees
//!
//! - **Per-partition ordering**: messages sharing `(topic, partition_key)` are
//!   delivered in publish order to each group.
//! - **Group exclusivity**: within one group, at most one handler processes a
//!   given message at a time.
//! - **At-least-once**: a message may be delivered more than once; handlers
//!   must be idempotent.
//! - **No replay** for groups registered after a message was published.
//!
//! Handler failures never propagate to the publisher. Backends log them and
//! move on; the next message (or a redelivery) retries the work.

use std::sync::Arc;

use thiserror::Error;

/// Callback invoked for each delivered message.
pub type MessageHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum PubSubError {
    /// Internal lock poisoning (a handler panicked mid-delivery).
    #[error("pubsub lock poisoned")]
    LockPoisoned,

    /// The transport rejected the operation.
    #[error("pubsub backend error: {0}")]
    Backend(String),

    /// A message could not be encoded/decoded by the transport.
    #[error("pubsub serialization error: {0}")]
    Serialization(String),
}

/// Topic-based publish/subscribe with consumer groups.
pub trait PubSub: Send + Sync {
    /// Publish `message` to every consumer group on `topic`.
    ///
    /// Publishing to a topic with no consumers is a successful no-op.
    fn publish(&self, topic: &str, partition_key: &str, message: &str) -> Result<(), PubSubError>;

    /// Register `handler` for `topic` under `group`.
    ///
    /// Registering the same `(topic, group)` again replaces the previous
    /// handler in-process.
    fn register_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<(), PubSubError>;
}

impl<P> PubSub for Arc<P>
where
    P: PubSub + ?Sized,
{
    fn publish(&self, topic: &str, partition_key: &str, message: &str) -> Result<(), PubSubError> {
        (**self).publish(topic, partition_key, message)
    }

    fn register_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<(), PubSubError> {
        (**self).register_consumer(topic, group, handler)
    }
}
