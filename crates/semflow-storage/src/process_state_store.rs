//! In-memory [`ProcessStateStore`], keyed `process_{process_id}`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use semflow_core::process_state::ProcessState;
use semflow_core::repository::{ProcessStateStore, RepositoryError};

#[derive(Default)]
pub struct InMemoryProcessStateStore {
    docs: RwLock<HashMap<String, ProcessState>>,
}

impl InMemoryProcessStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessStateStore for InMemoryProcessStateStore {
    async fn get(&self, process_id: &str) -> Result<ProcessState, RepositoryError> {
        self.docs
            .read()
            .unwrap()
            .get(process_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(process_id.to_string()))
    }

    async fn create(&self, state: ProcessState) -> Result<(), RepositoryError> {
        let mut docs = self.docs.write().unwrap();
        if docs.contains_key(&state.process_id) {
            return Err(RepositoryError::Conflict(state.process_id));
        }
        docs.insert(state.process_id.clone(), state);
        Ok(())
    }

    async fn update(&self, state: ProcessState) -> Result<(), RepositoryError> {
        let mut docs = self.docs.write().unwrap();
        match docs.get(&state.process_id) {
            None => Err(RepositoryError::NotFound(state.process_id)),
            Some(existing) if existing.revision != state.revision => {
                Err(RepositoryError::Conflict(state.process_id))
            }
            Some(_) => {
                docs.insert(state.process_id.clone(), state);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryProcessStateStore::new();
        let state = ProcessState::create("P1", Utc::now(), None);
        store.create(state.clone()).await.unwrap();
        let fetched = store.get("P1").await.unwrap();
        assert_eq!(fetched.process_id, "P1");
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = InMemoryProcessStateStore::new();
        let state = ProcessState::create("P2", Utc::now(), None);
        store.create(state.clone()).await.unwrap();
        let err = store.create(state).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_rejects_stale_revision() {
        let store = InMemoryProcessStateStore::new();
        let mut state = ProcessState::create("P3", Utc::now(), None);
        store.create(state.clone()).await.unwrap();

        let stale = state.clone();
        state
            .apply_transition(
                semflow_core::process_state::ProcessStateValue::Running,
                Utc::now(),
                None,
                None,
                None,
                None,
            )
            .unwrap();
        store.update(state).await.unwrap();

        let err = store.update(stale).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
