//! Resolves a handler for an Action and runs it (spec §4.8 step 1 + delegation).

use semflow_core::action::Action;
use tracing::instrument;

use crate::{HandlerContext, HandlerError, HandlerRegistry};

pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[instrument(skip(self, context, action), fields(action_id = action.identifier()))]
    pub async fn dispatch(&self, context: &HandlerContext, action: Action) -> Result<Action, HandlerError> {
        let discriminator = action
            .additional_type()
            .or_else(|| action.action_type())
            .unwrap_or("")
            .to_string();

        let handler = self
            .registry
            .resolve(&action)
            .ok_or(HandlerError::UnsupportedAction(discriminator))?;

        handler.execute(context, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_handler::HttpDispatchHandler;
    use semflow_core::repository::{ActionRepository, RepositoryError};
    use semflow_transport::TransportManager;
    use std::sync::Arc;

    #[derive(Default)]
    struct EmptyRepo;

    #[async_trait::async_trait]
    impl ActionRepository for EmptyRepo {
        async fn get_action(&self, _wf: &str, id: &str) -> Result<Action, RepositoryError> {
            Err(RepositoryError::NotFound(id.to_string()))
        }
        async fn put_action(&self, _wf: &str, _action: &Action) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_actions(&self, _wf: &str) -> Result<Vec<Action>, RepositoryError> {
            Ok(vec![])
        }
        async fn delete_workflow(&self, _wf: &str) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unregistered_discriminator_fails_unsupported_action() {
        let registry = HandlerRegistry::new();
        let dispatcher = Dispatcher::new(registry);
        let context = HandlerContext {
            workflow_id: "wf-1".to_string(),
            params: serde_json::Map::new(),
            action_repository: Arc::new(EmptyRepo),
            transport: Arc::new(TransportManager::new()),
        };

        let action = Action::new("A1", "UnknownAction");
        let err = dispatcher.dispatch(&context, action).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnsupportedAction(_)));
    }

    #[tokio::test]
    async fn registered_discriminator_dispatches_to_handler() {
        let registry = HandlerRegistry::new();
        registry.register("SearchAction", Arc::new(HttpDispatchHandler::new()));
        let dispatcher = Dispatcher::new(registry);

        let context = HandlerContext {
            workflow_id: "wf-1".to_string(),
            params: serde_json::Map::new(),
            action_repository: Arc::new(EmptyRepo),
            transport: Arc::new(TransportManager::new()),
        };

        let action = Action::new("A1", "SearchAction");
        // No target set and no transport registered: fails at build_request, not at resolution.
        let err = dispatcher.dispatch(&context, action).await.unwrap_err();
        assert!(matches!(err, HandlerError::MalformedTarget(_)));
    }
}
