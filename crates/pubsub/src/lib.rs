//! Topic/partition/consumer-group messaging.
//!
//! The contract lives in [`bus`]; [`in_memory`] is the synchronous,
//! process-local implementation used by tests and single-process deployments.

pub mod bus;
pub mod in_memory;

pub use bus::{MessageHandler, PubSub, PubSubError};
pub use in_memory::InMemoryPubSub;
