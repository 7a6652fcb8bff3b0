//! In-memory, append-only [`EventRepository`].

use std::sync::RwLock;

use async_trait::async_trait;
use semflow_core::event::Event;
use semflow_core::repository::{EventRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: Event) -> Result<(), RepositoryError> {
        self.events.write().unwrap().push(event);
        Ok(())
    }

    async fn list_for(&self, about: &str) -> Result<Vec<Event>, RepositoryError> {
        Ok(self
            .events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.about == about)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semflow_core::event::EventKind;

    #[tokio::test]
    async fn events_are_append_only_and_filtered_by_about() {
        let repo = InMemoryEventRepository::new();
        repo.append(Event::new(EventKind::WorkflowStarted, "wf-1", "semflow-runtime"))
            .await
            .unwrap();
        repo.append(Event::new(EventKind::WorkflowStarted, "wf-2", "semflow-runtime"))
            .await
            .unwrap();

        let events = repo.list_for("wf-1").await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
