//! Abstract broker seam (spec §6.1 scopes the concrete AMQP-shaped broker
//! out; this is the trait boundary the consumer depends on instead).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("broker error: {0}")]
    Other(String),
}

/// Raw wire schema for a ProcessState channel message (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub process_id: String,
    pub state: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<HashMap<String, Value>>,
    pub error_message: Option<String>,
    pub description: Option<String>,
}

/// A delivered message the consumer must explicitly ack or nack.
#[async_trait]
pub trait ConsumedMessage: Send {
    fn body(&self) -> &[u8];

    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// The broker connection the consumer pulls from. Durable/non-exclusive
/// queue declaration and QoS prefetch=1 are simulated by `declare_queue`;
/// concrete implementations (AMQP, etc.) are explicitly out of scope here.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn declare_queue(&self) -> Result<(), BrokerError>;

    /// Blocks up to `wait` for the next message; `Ok(None)` on timeout.
    async fn next_message(&self, wait: Duration) -> Result<Option<Box<dyn ConsumedMessage>>, BrokerError>;
}

/// In-process broker backed by a shared deque of raw message bodies. Concrete
/// message brokers (AMQP and similar) are explicitly out of scope (spec
/// §1/§4.6); this is the one default implementation `semflow-cli` wires up,
/// the same role `semflow-storage`'s in-memory repositories play for the
/// storage contracts.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct InMemoryMessage {
        body: Vec<u8>,
        queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    #[async_trait]
    impl ConsumedMessage for InMemoryMessage {
        fn body(&self) -> &[u8] {
            &self.body
        }

        async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
            if requeue {
                self.queue.lock().await.push_front(self.body);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryMessageBroker {
        queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl InMemoryMessageBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn publish(&self, body: Vec<u8>) {
            self.queue.lock().await.push_back(body);
        }
    }

    #[async_trait]
    impl MessageBroker for InMemoryMessageBroker {
        async fn declare_queue(&self) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn next_message(&self, wait: std::time::Duration) -> Result<Option<Box<dyn ConsumedMessage>>, BrokerError> {
            let deadline = tokio::time::Instant::now() + wait;
            loop {
                if let Some(body) = self.queue.lock().await.pop_front() {
                    return Ok(Some(Box::new(InMemoryMessage { body, queue: Arc::clone(&self.queue) })));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
    }
}
