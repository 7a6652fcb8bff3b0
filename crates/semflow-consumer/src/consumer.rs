//! Processes broker messages into [`ProcessState`] writes (spec §4.6 steps 1-6).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use semflow_core::process_state::{ProcessState, ProcessStateError, ProcessStateValue};
use semflow_core::repository::{ProcessStateStore, RepositoryError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{BrokerError, BrokerMessage, MessageBroker};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub struct ProcessStateConsumer {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn ProcessStateStore>,
    poll_wait: Duration,
}

impl ProcessStateConsumer {
    pub fn new(broker: Arc<dyn MessageBroker>, store: Arc<dyn ProcessStateStore>) -> Self {
        Self { broker, store, poll_wait: Duration::from_secs(5) }
    }

    /// Runs until `shutdown` fires: stop accepting new messages, finish the
    /// in-flight one, return (spec §5 cancellation policy).
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.broker.declare_queue().await?;
        info!("process-state consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                result = self.broker.next_message(self.poll_wait) => result?,
                _ = shutdown.changed() => break,
            };

            let Some(message) = message else {
                continue;
            };

            self.process_one(message).await;
        }

        info!("process-state consumer stopped");
        Ok(())
    }

    async fn process_one(&self, message: Box<dyn crate::broker::ConsumedMessage>) {
        let parsed: Result<BrokerMessage, _> = serde_json::from_slice(message.body());
        let parsed = match parsed {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "malformed process-state message, nack-requeue");
                let _ = message.nack(true).await;
                return;
            }
        };

        if parsed.process_id.trim().is_empty() {
            warn!("process-state message missing process_id, nack-requeue");
            let _ = message.nack(true).await;
            return;
        }

        let Some(state) = ProcessStateValue::parse(&parsed.state) else {
            warn!(state = %parsed.state, "process-state message has invalid state, nack-requeue");
            let _ = message.nack(true).await;
            return;
        };

        let timestamp = parsed.timestamp.unwrap_or_else(Utc::now);

        match self.apply(&parsed.process_id, state, timestamp, &parsed).await {
            Ok(()) => {
                debug!(process_id = %parsed.process_id, %state, "process-state applied");
                let _ = message.ack().await;
            }
            Err(ApplyOutcome::Requeue) => {
                let _ = message.nack(true).await;
            }
            Err(ApplyOutcome::Drop(reason)) => {
                error!(process_id = %parsed.process_id, reason, "process-state message dropped without requeue");
                let _ = message.nack(false).await;
            }
        }
    }

    async fn apply(
        &self,
        process_id: &str,
        state: ProcessStateValue,
        timestamp: chrono::DateTime<Utc>,
        message: &BrokerMessage,
    ) -> Result<(), ApplyOutcome> {
        match self.store.get(process_id).await {
            Err(RepositoryError::NotFound(_)) => {
                if state != ProcessStateValue::Started {
                    return Err(ApplyOutcome::Drop("document not found (out-of-order delivery)"));
                }
                let created = ProcessState::create(process_id, timestamp, message.description.clone());
                match self.store.create(created).await {
                    Ok(()) => Ok(()),
                    Err(RepositoryError::Conflict(_)) => Err(ApplyOutcome::Requeue),
                    Err(_) => Err(ApplyOutcome::Requeue),
                }
            }
            Err(_) => Err(ApplyOutcome::Requeue),
            Ok(mut existing) => {
                match existing.apply_transition(
                    state,
                    timestamp,
                    message.error_message.clone(),
                    message.description.clone(),
                    message.metadata.clone(),
                    None,
                ) {
                    Err(ProcessStateError::InvalidTransition { .. }) => {
                        return Err(ApplyOutcome::Drop("invalid state transition"));
                    }
                    Err(_) => return Err(ApplyOutcome::Requeue),
                    Ok(()) => {}
                }

                match self.store.update(existing).await {
                    Ok(()) => Ok(()),
                    Err(RepositoryError::Conflict(_)) => Err(ApplyOutcome::Requeue),
                    Err(RepositoryError::NotFound(_)) => Err(ApplyOutcome::Drop("document not found on update")),
                    Err(_) => Err(ApplyOutcome::Requeue),
                }
            }
        }
    }
}

enum ApplyOutcome {
    Requeue,
    Drop(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::InMemoryBroker;
    use semflow_storage::InMemoryProcessStateStore;
    use serde_json::json;

    fn consumer(broker: Arc<InMemoryBroker>, store: Arc<InMemoryProcessStateStore>) -> ProcessStateConsumer {
        ProcessStateConsumer::new(broker, store)
    }

    #[tokio::test]
    async fn started_message_creates_process_state() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryProcessStateStore::new());
        broker
            .publish(serde_json::to_vec(&json!({"process_id": "P1", "state": "started"})).unwrap())
            .await;

        let message = broker.next_message(Duration::from_secs(1)).await.unwrap().unwrap();
        consumer(Arc::clone(&broker), Arc::clone(&store)).process_one(message).await;

        let state = store.get("P1").await.unwrap();
        assert_eq!(state.state, ProcessStateValue::Started);
    }

    #[tokio::test]
    async fn malformed_json_is_requeued() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryProcessStateStore::new());
        broker.publish(b"not json".to_vec()).await;

        let message = broker.next_message(Duration::from_secs(1)).await.unwrap().unwrap();
        consumer(Arc::clone(&broker), Arc::clone(&store)).process_one(message).await;

        // nack(true) pushed the raw body back onto the queue.
        let requeued = broker.next_message(Duration::from_millis(50)).await.unwrap();
        assert!(requeued.is_some());
    }

    #[tokio::test]
    async fn update_before_create_is_dropped_without_requeue() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryProcessStateStore::new());
        broker
            .publish(serde_json::to_vec(&json!({"process_id": "P2", "state": "running"})).unwrap())
            .await;

        let message = broker.next_message(Duration::from_secs(1)).await.unwrap().unwrap();
        consumer(Arc::clone(&broker), Arc::clone(&store)).process_one(message).await;

        assert!(store.get("P2").await.is_err());
        let requeued = broker.next_message(Duration::from_millis(50)).await.unwrap();
        assert!(requeued.is_none(), "a 404-on-update message must not be requeued");
    }

    #[tokio::test]
    async fn full_lifecycle_started_running_successful() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryProcessStateStore::new());
        let c = consumer(Arc::clone(&broker), Arc::clone(&store));

        for state in ["started", "running", "successful"] {
            broker
                .publish(serde_json::to_vec(&json!({"process_id": "P3", "state": state})).unwrap())
                .await;
            let message = broker.next_message(Duration::from_secs(1)).await.unwrap().unwrap();
            c.process_one(message).await;
        }

        let final_state = store.get("P3").await.unwrap();
        assert_eq!(final_state.state, ProcessStateValue::Successful);
        assert_eq!(final_state.history.len(), 3);
    }
}
