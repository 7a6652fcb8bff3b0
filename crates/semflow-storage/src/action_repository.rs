//! In-memory [`ActionRepository`], keyed `{workflow-uuid}/{action-identifier}`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use semflow_core::action::Action;
use semflow_core::repository::{action_doc_id, ActionRepository, RepositoryError};

/// Reference store: one map keyed by the composite doc ID, range-scanned by
/// prefix for `list_actions`/`delete_workflow`.
#[derive(Default)]
pub struct InMemoryActionRepository {
    docs: RwLock<HashMap<String, Action>>,
}

impl InMemoryActionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionRepository for InMemoryActionRepository {
    async fn get_action(&self, workflow_id: &str, action_id: &str) -> Result<Action, RepositoryError> {
        let key = action_doc_id(workflow_id, action_id);
        self.docs
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(RepositoryError::NotFound(key))
    }

    async fn put_action(&self, workflow_id: &str, action: &Action) -> Result<(), RepositoryError> {
        let key = action_doc_id(workflow_id, action.identifier());
        self.docs.write().unwrap().insert(key, action.deep_copy());
        Ok(())
    }

    async fn list_actions(&self, workflow_id: &str) -> Result<Vec<Action>, RepositoryError> {
        let prefix = format!("{workflow_id}/");
        Ok(self
            .docs
            .read()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, action)| action.deep_copy())
            .collect())
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), RepositoryError> {
        let prefix = format!("{workflow_id}/");
        self.docs.write().unwrap().retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
