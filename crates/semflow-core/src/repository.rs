//! Abstract storage contracts. The core depends only on these traits; concrete
//! backends (document store, key-value store, graph store, ...) are external
//! collaborators plugged in by the binary that assembles the runtime.

use async_trait::async_trait;
use thiserror::Error;

use crate::action::Action;
use crate::event::Event;
use crate::process_state::ProcessState;

/// Composite storage key for an Action: `{workflow-uuid}/{action-identifier}`.
pub fn action_doc_id(workflow_id: &str, action_id: &str) -> String {
    format!("{workflow_id}/{action_id}")
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("revision conflict for {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Range-scannable store of Actions keyed by `{workflow-uuid}/{action-identifier}`.
#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn get_action(&self, workflow_id: &str, action_id: &str) -> Result<Action, RepositoryError>;

    async fn put_action(&self, workflow_id: &str, action: &Action) -> Result<(), RepositoryError>;

    /// Range scan by prefix `{workflow-uuid}/` returning every child Action.
    async fn list_actions(&self, workflow_id: &str) -> Result<Vec<Action>, RepositoryError>;

    /// Cascading delete of a workflow and all of its child Actions.
    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), RepositoryError>;
}

/// Store of [`ProcessState`] records, keyed `process_{process_id}`.
#[async_trait]
pub trait ProcessStateStore: Send + Sync {
    async fn get(&self, process_id: &str) -> Result<ProcessState, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] if the record already exists.
    async fn create(&self, state: ProcessState) -> Result<(), RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] on a stale revision token.
    async fn update(&self, state: ProcessState) -> Result<(), RepositoryError>;
}

/// Append-only store of [`Event`] records.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: Event) -> Result<(), RepositoryError>;

    async fn list_for(&self, about: &str) -> Result<Vec<Event>, RepositoryError>;
}
