//! Redis Streams-backed pub/sub (durable, at-least-once delivery).
//!
//! ## Architecture
//!
//! - **Stream key**: the topic name
//! - **Entry fields**: `partition_key`, `message`
//! - **Consumer groups**: one per registered group, created at `$` so a group
//!   only sees messages published after it was registered
//! - **Consumers**: one polling worker thread per `(topic, group)`, named
//!   `<group>-<uuid v7>`
//!
//! An entry is `XACK`ed only after its handler returned `Ok`. A failed entry
//! stays in the consumer's pending list and is re-read (from id `0`) after the
//! worker's backoff. A failed read is followed by the same pending replay,
//! since Redis may have delivered the batch before the reply was lost. An
//! entry without a usable `message` field is logged and acked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use redis::Value;
use tracing::{debug, info, instrument, warn};

use eventide_pubsub::{MessageHandler, PubSub, PubSubError};

use crate::config::{DEFAULT_REDIS_BLOCK_MS, EngineConfig};
use crate::workers::WorkerHandle;

/// Entries fetched per `XREADGROUP`.
const READ_COUNT: usize = 10;

/// Pause after a failed read or a failed handler.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

type ConsumerKey = (String, String);

pub struct RedisStreamsPubSub {
    client: Arc<redis::Client>,
    block_ms: u64,
    handlers: Arc<RwLock<HashMap<ConsumerKey, MessageHandler>>>,
    workers: Mutex<HashMap<ConsumerKey, WorkerHandle>>,
}

impl core::fmt::Debug for RedisStreamsPubSub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let consumers = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("RedisStreamsPubSub")
            .field("block_ms", &self.block_ms)
            .field("consumers", &consumers)
            .finish()
    }
}

impl RedisStreamsPubSub {
    /// Open a client for `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// No connection is made until the first publish or registration.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, PubSubError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| PubSubError::Backend(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            block_ms: DEFAULT_REDIS_BLOCK_MS,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, PubSubError> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| PubSubError::Backend(format!("{} is not set", EngineConfig::REDIS_URL_VAR)))?;
        Ok(Self::new(url)?.with_block_ms(config.redis_block_ms))
    }

    /// How long each consumer read blocks waiting for new entries.
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms.max(1);
        self
    }

    /// Stop every consumer worker and wait for them to exit.
    pub fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = match self.workers.lock() {
            Ok(mut workers) => workers.drain().map(|(_, w)| w).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, w)| w).collect(),
        };
        for worker in workers {
            worker.shutdown();
        }
    }

    fn connection(&self) -> Result<redis::Connection, PubSubError> {
        self.client.get_connection().map_err(connection_error)
    }

    /// Create the consumer group (and the stream) if missing.
    fn ensure_consumer_group(&self, topic: &str, group: &str) -> Result<(), PubSubError> {
        let mut conn = self.connection()?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    fn spawn_consumer(&self, topic: &str, group: &str) -> Result<WorkerHandle, PubSubError> {
        let key: ConsumerKey = (topic.to_string(), group.to_string());
        let consumer = format!("{group}-{}", uuid::Uuid::now_v7());
        let mut reader = StreamReader {
            client: Arc::clone(&self.client),
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.clone(),
            block_ms: self.block_ms,
            conn: None,
            replay_pending: true,
        };
        let handlers = Arc::clone(&self.handlers);

        let worker = WorkerHandle::spawn_loop(consumer, RETRY_BACKOFF, move || -> Result<(), PubSubError> {
            let handler = handlers
                .read()
                .map_err(|_| PubSubError::LockPoisoned)?
                .get(&key)
                .cloned();
            match handler {
                Some(handler) => reader.step(&handler),
                None => Ok(()),
            }
        })
        .map_err(|e| PubSubError::Backend(format!("failed to spawn consumer: {e}")))?;

        Ok(worker)
    }
}

impl PubSub for RedisStreamsPubSub {
    #[instrument(skip(self, message), fields(topic = %topic, partition_key = %partition_key), err)]
    fn publish(&self, topic: &str, partition_key: &str, message: &str) -> Result<(), PubSubError> {
        let mut conn = self.connection()?;

        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("partition_key")
            .arg(partition_key)
            .arg("message")
            .arg(message)
            .query(&mut conn)
            .map_err(|e| command_error("XADD", e))?;

        Ok(())
    }

    #[instrument(skip(self, handler), fields(topic = %topic, group = %group), err)]
    fn register_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: MessageHandler,
    ) -> Result<(), PubSubError> {
        let key: ConsumerKey = (topic.to_string(), group.to_string());
        self.handlers
            .write()
            .map_err(|_| PubSubError::LockPoisoned)?
            .insert(key.clone(), handler);

        let mut workers = self.workers.lock().map_err(|_| PubSubError::LockPoisoned)?;
        if workers.contains_key(&key) {
            return Ok(());
        }

        self.ensure_consumer_group(topic, group)?;
        let worker = self.spawn_consumer(topic, group)?;
        info!(topic = %topic, group = %group, consumer = %worker.name(), "redis consumer started");
        workers.insert(key, worker);
        Ok(())
    }
}

/// Per-worker read state.
struct StreamReader {
    client: Arc<redis::Client>,
    topic: String,
    group: String,
    consumer: String,
    block_ms: u64,
    conn: Option<redis::Connection>,
    /// Re-read this consumer's pending entries before new ones.
    replay_pending: bool,
}

impl StreamReader {
    fn step(&mut self, handler: &MessageHandler) -> Result<(), PubSubError> {
        let entries = match self.read() {
            Ok(entries) => entries,
            Err(e) => {
                // A reply that failed to parse may still have been delivered.
                self.conn = None;
                self.replay_pending = true;
                return Err(e);
            }
        };

        if self.replay_pending && entries.is_empty() {
            self.replay_pending = false;
            return Ok(());
        }

        let mut failed = 0usize;
        for entry in entries {
            let message = match &entry.body {
                EntryBody::Message(message) => message.as_str(),
                EntryBody::Deleted => {
                    // Trimmed from the stream while pending.
                    self.ack(&entry.id)?;
                    continue;
                }
                EntryBody::Malformed(reason) => {
                    warn!(
                        topic = %self.topic,
                        group = %self.group,
                        entry_id = %entry.id,
                        reason = %reason,
                        "malformed stream entry dropped"
                    );
                    self.ack(&entry.id)?;
                    continue;
                }
            };

            match handler(message) {
                Ok(()) => self.ack(&entry.id)?,
                Err(err) => {
                    failed += 1;
                    warn!(
                        topic = %self.topic,
                        group = %self.group,
                        entry_id = %entry.id,
                        partition_key = ?entry.partition_key,
                        error = %err,
                        "message handler failed; entry left pending"
                    );
                }
            }
        }

        if failed > 0 {
            self.replay_pending = true;
            return Err(PubSubError::Backend(format!("{failed} message(s) left pending")));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<StreamEntry>, PubSubError> {
        let start = if self.replay_pending { "0" } else { ">" };
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT);
        if !self.replay_pending {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.topic).arg(start);

        let conn = self.connection()?;
        let reply: Value = cmd.query(conn).map_err(|e| command_error("XREADGROUP", e))?;
        let entries = parse_read_reply(reply)?;
        if !entries.is_empty() {
            debug!(topic = %self.topic, group = %self.group, count = entries.len(), "stream entries read");
        }
        Ok(entries)
    }

    fn ack(&mut self, id: &str) -> Result<(), PubSubError> {
        let topic = self.topic.clone();
        let group = self.group.clone();
        let conn = self.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(&topic)
            .arg(&group)
            .arg(id)
            .query(conn)
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut redis::Connection, PubSubError> {
        if self.conn.is_none() {
            self.conn = Some(self.client.get_connection().map_err(connection_error)?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| PubSubError::Backend("redis connection unavailable".to_string()))
    }
}

/// One entry of an `XREADGROUP` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamEntry {
    id: String,
    partition_key: Option<String>,
    body: EntryBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryBody {
    Message(String),
    /// Deleted from the stream while still pending.
    Deleted,
    /// Has an id but no usable fields; acked without delivery.
    Malformed(String),
}

/// Parse `[[stream, [[id, [field, value, ...]], ...]], ...]`; `Nil` is an
/// empty (timed out) read.
fn parse_read_reply(reply: Value) -> Result<Vec<StreamEntry>, PubSubError> {
    let streams = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(streams) => streams,
        other => return Err(malformed(format!("unexpected XREADGROUP reply: {other:?}"))),
    };

    let mut entries = Vec::new();
    for stream in streams {
        let Value::Bulk(mut parts) = stream else {
            return Err(malformed("stream reply is not an array".to_string()));
        };
        if parts.len() != 2 {
            return Err(malformed(format!("stream reply has {} parts", parts.len())));
        }
        match parts.pop() {
            Some(Value::Bulk(items)) => {
                for item in items {
                    entries.push(parse_entry(item)?);
                }
            }
            Some(Value::Nil) | None => {}
            Some(other) => return Err(malformed(format!("unexpected entry list: {other:?}"))),
        }
    }
    Ok(entries)
}

fn parse_entry(entry: Value) -> Result<StreamEntry, PubSubError> {
    let Value::Bulk(mut parts) = entry else {
        return Err(malformed("stream entry is not an array".to_string()));
    };
    if parts.len() != 2 {
        return Err(malformed(format!("stream entry has {} parts", parts.len())));
    }
    let fields = parts.pop();
    let id = match parts.pop() {
        Some(Value::Data(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Some(Value::Status(id)) => id,
        other => return Err(malformed(format!("invalid entry id: {other:?}"))),
    };

    let fields = match fields {
        Some(Value::Bulk(fields)) => fields,
        Some(Value::Nil) | None => {
            return Ok(StreamEntry {
                id,
                partition_key: None,
                body: EntryBody::Deleted,
            });
        }
        Some(other) => {
            return Ok(StreamEntry {
                id,
                partition_key: None,
                body: EntryBody::Malformed(format!("invalid entry fields: {other:?}")),
            });
        }
    };

    let mut partition_key = None;
    let mut message = None;
    for pair in fields.chunks(2) {
        if let [Value::Data(name), Value::Data(value)] = pair {
            let value = String::from_utf8_lossy(value).into_owned();
            match name.as_slice() {
                b"partition_key" => partition_key = Some(value),
                b"message" => message = Some(value),
                _ => {}
            }
        }
    }

    let body = match message {
        Some(message) => EntryBody::Message(message),
        None => EntryBody::Malformed("entry has no message field".to_string()),
    };
    Ok(StreamEntry {
        id,
        partition_key,
        body,
    })
}

fn malformed(reason: String) -> PubSubError {
    PubSubError::Serialization(reason)
}

fn connection_error(err: redis::RedisError) -> PubSubError {
    PubSubError::Backend(format!("redis connection error: {err}"))
}

fn command_error(command: &str, err: redis::RedisError) -> PubSubError {
    PubSubError::Backend(format!("{command} failed: {err}"))
}
