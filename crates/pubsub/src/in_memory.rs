//! In-memory pub/sub for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

use crate::bus::{MessageHandler, PubSub, PubSubError};

type PartitionLock = Arc<Mutex<()>>;

/// Synchronous in-process pub/sub.
///
/// - `publish` delivers to every group before returning
/// - one lock per `(topic, partition_key)` serializes deliveries, which gives
///   per-partition ordering and group exclusivity
/// - no persistence, no replay
///
/// Handlers must not publish to the topic + partition they are being invoked
/// for; the partition lock is not re-entrant.
#[derive(Default)]
pub struct InMemoryPubSub {
    consumers: RwLock<HashMap<String, HashMap<String, MessageHandler>>>,
    partitions: Mutex<HashMap<(String, String), PartitionLock>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_lock(&self, topic: &str, partition_key: &str) -> Result<PartitionLock, PubSubError> {
        let mut partitions = self.partitions.lock().map_err(|_| PubSubError::LockPoisoned)?;
        let lock = partitions
            .entry((topic.to_string(), partition_key.to_string()))
            .or_default();
        Ok(Arc::clone(lock))
    }

    fn handlers_for(&self, topic: &str) -> Result<Vec<(String, MessageHandler)>, PubSubError> {
        let consumers = self.consumers.read().map_err(|_| PubSubError::LockPoisoned)?;
        Ok(consumers
            .get(topic)
            .map(|groups| {
                groups
                    .iter()
                    .map(|(group, handler)| (group.clone(), Arc::clone(handler)))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl core::fmt::Debug for InMemoryPubSub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let topics = self.consumers.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("InMemoryPubSub").field("topics", &topics).finish()
    }
}

impl PubSub for InMemoryPubSub {
    fn publish(&self, topic: &str, partition_key: &str, message: &str) -> Result<(), PubSubError> {
        let lock = self.partition_lock(topic, partition_key)?;
        let _guard = lock.lock().map_err(|_| PubSubError::LockPoisoned)?;

        // Snapshot the handlers so consumers can register while we deliver.
        for (group, handler) in self.handlers_for(topic)? {
            if let Err(err) = handler(message) {
                warn!(
                    topic,
                    group = %group,
                    partition_key,
                    error = %err,
                    "message handler failed"
                );
            }
        }

        Ok(())
    }

    fn register_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<(), PubSubError> {
        let mut consumers = self.consumers.write().map_err(|_| PubSubError::LockPoisoned)?;
        consumers
            .entry(topic.to_string())
            .or_default()
            .insert(group.to_string(), handler);
        Ok(())
    }
}
