//! Process-state broker consumer (spec §4.6).
//!
//! Consumes `{process_id, state, timestamp?, metadata?, error_message?,
//! description?}` messages from an abstract [`MessageBroker`], durable /
//! non-exclusive / QoS-1 / manual-ack (simulated through the trait's
//! `declare_queue` call and the message handle's explicit `ack`/`nack`).

pub mod broker;
pub mod consumer;

pub use broker::memory::InMemoryMessageBroker;
pub use broker::{BrokerMessage, ConsumedMessage, MessageBroker};
pub use consumer::{ConsumerError, ProcessStateConsumer};
