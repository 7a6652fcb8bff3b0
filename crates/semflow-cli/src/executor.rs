//! Adapts [`semflow_handlers::Dispatcher`] to [`semflow_worker::ActionExecutor`],
//! the wiring point deferred from `semflow-worker` to avoid a dependency
//! cycle between the queue-draining engine and the handler-dispatch layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use semflow_core::action::{Action, ActionStatus};
use semflow_core::event::{Event, EventKind};
use semflow_core::job::Job;
use semflow_core::reliability::RetryPolicy;
use semflow_core::repository::{ActionRepository, EventRepository};
use semflow_core::scheduler;
use semflow_core::substitution::SubstitutionError;
use semflow_consumer::{BrokerMessage, InMemoryMessageBroker};
use semflow_handlers::{Dispatcher, HandlerContext, HandlerError};
use semflow_transport::TransportManager;
use semflow_worker::{ActionExecutor, ExecutionOutcome};
use serde_json::Map;
use tracing::{error, info, instrument, warn};

const ORGANIZER: &str = "semflow-cli";

pub struct DispatchExecutor {
    action_repository: Arc<dyn ActionRepository>,
    event_repository: Arc<dyn EventRepository>,
    transport: Arc<TransportManager>,
    dispatcher: Dispatcher,
    broker: Arc<InMemoryMessageBroker>,
    retry_policy: RetryPolicy,
}

impl DispatchExecutor {
    pub fn new(
        action_repository: Arc<dyn ActionRepository>,
        event_repository: Arc<dyn EventRepository>,
        transport: Arc<TransportManager>,
        dispatcher: Dispatcher,
        broker: Arc<InMemoryMessageBroker>,
    ) -> Self {
        Self {
            action_repository,
            event_repository,
            transport,
            dispatcher,
            broker,
            retry_policy: RetryPolicy::exponential(),
        }
    }

    async fn params_for(&self, workflow_id: &str) -> Map<String, serde_json::Value> {
        match self.action_repository.get_action(workflow_id, workflow_id).await {
            Ok(workflow_action) => workflow_action
                .query()
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
            Err(_) => Map::new(),
        }
    }

    async fn emit(&self, kind: EventKind, about: &str) {
        if let Err(e) = self.event_repository.append(Event::new(kind, about, ORGANIZER)).await {
            warn!(error = %e, "failed to append event");
        }
    }

    async fn publish_process_state(&self, workflow_id: &str, state: &str, error_message: Option<String>) {
        let message = BrokerMessage {
            process_id: workflow_id.to_string(),
            state: state.to_string(),
            timestamp: Some(Utc::now()),
            metadata: None,
            error_message,
            description: None,
        };
        match serde_json::to_vec(&message) {
            Ok(bytes) => self.broker.publish(bytes).await,
            Err(e) => error!(error = %e, "failed to serialize process-state message"),
        }
    }

    async fn evaluate_and_publish(&self, workflow_id: &str) {
        let mut actions = match self.action_repository.list_actions(workflow_id).await {
            Ok(actions) => actions,
            Err(e) => {
                error!(workflow_id, error = %e, "failed to list actions for workflow evaluation");
                return;
            }
        };
        // The workflow's own ItemList document is stored alongside its
        // children; exclude it before evaluating child terminal status.
        actions.retain(|a| a.identifier() != workflow_id);

        match scheduler::evaluate_workflow(&mut actions) {
            Some(scheduler::WorkflowTerminalStatus::Success) => {
                self.emit(EventKind::WorkflowCompleted, workflow_id).await;
                self.publish_process_state(workflow_id, "successful", None).await;
            }
            Some(scheduler::WorkflowTerminalStatus::Failed) => {
                self.emit(EventKind::WorkflowCompleted, workflow_id).await;
                self.publish_process_state(workflow_id, "failed", Some("one or more actions failed".to_string())).await;
            }
            None => {
                self.publish_process_state(workflow_id, "running", None).await;
            }
        }

        for action in actions {
            if let Err(e) = self.action_repository.put_action(workflow_id, &action).await {
                error!(workflow_id, action_id = action.identifier(), error = %e, "failed to persist cancelled action");
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for DispatchExecutor {
    #[instrument(skip(self), fields(action_id = %job.action_id, workflow_id = %job.workflow_id))]
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let mut action = match self.action_repository.get_action(&job.workflow_id, &job.action_id).await {
            Ok(action) => action,
            Err(e) => {
                error!(error = %e, "action not found for dequeued job");
                return ExecutionOutcome::Terminal;
            }
        };

        if action.status() == ActionStatus::PotentialActionStatus {
            scheduler::mark_active(&mut action);
            if let Err(e) = self.action_repository.put_action(&job.workflow_id, &action).await {
                error!(error = %e, "failed to persist action activation");
                return ExecutionOutcome::Terminal;
            }
            self.emit(EventKind::RequestSent, &action.identifier().to_string()).await;
            self.publish_process_state(&job.workflow_id, "started", None).await;
        }

        let context = HandlerContext {
            workflow_id: job.workflow_id.clone(),
            params: self.params_for(&job.workflow_id).await,
            action_repository: Arc::clone(&self.action_repository),
            transport: Arc::clone(&self.transport),
        };

        let outcome = match self.dispatcher.dispatch(&context, action.clone()).await {
            Ok(updated) => {
                let completed = updated.status() == ActionStatus::CompletedActionStatus;
                if let Err(e) = self.action_repository.put_action(&job.workflow_id, &updated).await {
                    error!(error = %e, "failed to persist dispatched action");
                    return ExecutionOutcome::Terminal;
                }
                self.emit(
                    if completed { EventKind::ActionSuccess } else { EventKind::ActionFailure },
                    updated.identifier(),
                )
                .await;
                if completed {
                    ExecutionOutcome::Success
                } else {
                    ExecutionOutcome::Terminal
                }
            }
            Err(HandlerError::Substitution(SubstitutionError::DependencyNotReady(_))) => {
                info!("dependency not ready, deferring");
                ExecutionOutcome::Retry
            }
            Err(HandlerError::Transport(e)) if self.retry_policy.has_attempts_remaining(job.retry_count) => {
                warn!(error = %e, retry_count = job.retry_count, "transport failure, retrying");
                ExecutionOutcome::Retry
            }
            Err(e) => {
                error!(error = %e, "handler dispatch failed");
                scheduler::mark_failed(&mut action, serde_json::json!({"name": "DispatchError", "description": e.to_string()}));
                if let Err(persist_err) = self.action_repository.put_action(&job.workflow_id, &action).await {
                    error!(error = %persist_err, "failed to persist dispatch failure");
                }
                self.emit(EventKind::ActionFailure, action.identifier()).await;
                ExecutionOutcome::Terminal
            }
        };

        self.evaluate_and_publish(&job.workflow_id).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semflow_core::repository::RepositoryError;
    use semflow_handlers::HandlerRegistry;
    use semflow_storage::{InMemoryActionRepository, InMemoryEventRepository};

    fn dispatcher_with_no_handlers() -> Dispatcher {
        Dispatcher::new(HandlerRegistry::new())
    }

    #[tokio::test]
    async fn missing_action_is_terminal() {
        let repo: Arc<dyn ActionRepository> = Arc::new(InMemoryActionRepository::new());
        let events: Arc<dyn EventRepository> = Arc::new(InMemoryEventRepository::new());
        let executor = DispatchExecutor::new(
            Arc::clone(&repo),
            events,
            Arc::new(TransportManager::new()),
            dispatcher_with_no_handlers(),
            Arc::new(InMemoryMessageBroker::new()),
        );

        let job = Job::new("missing", "parallel", "wf-1");
        assert_eq!(executor.execute(&job).await, ExecutionOutcome::Terminal);
    }

    #[tokio::test]
    async fn unsupported_action_type_is_terminal_and_persists_error() {
        let repo: Arc<dyn ActionRepository> = Arc::new(InMemoryActionRepository::new());
        let events: Arc<dyn EventRepository> = Arc::new(InMemoryEventRepository::new());
        let action = Action::new("a1", "SearchAction");
        repo.put_action("wf-1", &action).await.unwrap();

        let executor = DispatchExecutor::new(
            Arc::clone(&repo),
            events,
            Arc::new(TransportManager::new()),
            dispatcher_with_no_handlers(),
            Arc::new(InMemoryMessageBroker::new()),
        );

        let job = Job::new("a1", "parallel", "wf-1");
        assert_eq!(executor.execute(&job).await, ExecutionOutcome::Terminal);

        let persisted = repo.get_action("wf-1", "a1").await.unwrap();
        assert_eq!(persisted.status(), ActionStatus::FailedActionStatus);
    }

    #[tokio::test]
    async fn action_not_found_does_not_panic_on_empty_repo() {
        let repo: Arc<dyn ActionRepository> = Arc::new(InMemoryActionRepository::new());
        match repo.get_action("wf-1", "a1").await {
            Err(RepositoryError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
