//! Default handler: substitutes variables, builds an HTTP request from the
//! Action's `target`/`object`, and dispatches it through the transport
//! manager (spec §4.8 steps 2-6).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use semflow_core::action::{Action, ActionStatus};
use semflow_core::substitution::{ActionResultResolver, MapResolver, Resolver, ResolverChain};
use semflow_transport::HttpRequest;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::{ActionHandler, HandlerContext, HandlerError};

pub struct HttpDispatchHandler;

impl HttpDispatchHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpDispatchHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn build_resolver_chain(context: &HandlerContext) -> ResolverChain {
    let params: HashMap<String, String> = context
        .params
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            other => Some((k.clone(), other.to_string())),
        })
        .collect();

    let resolvers: Vec<Arc<dyn Resolver>> = vec![
        Arc::new(MapResolver::new(params)),
        Arc::new(ActionResultResolver::new(context.workflow_id.clone(), Arc::clone(&context.action_repository))),
    ];
    ResolverChain::new(resolvers)
}

fn build_request(action: &Action) -> Result<HttpRequest, HandlerError> {
    let target = action
        .target()
        .ok_or_else(|| HandlerError::MalformedTarget("Action has no target".to_string()))?;

    let url = target
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::MalformedTarget("target.url is required".to_string()))?;
    let method = target.get("method").and_then(Value::as_str).unwrap_or("GET");
    let content_type = target.get("contentType").and_then(Value::as_str).unwrap_or("application/json");

    let mut request = HttpRequest::new(method, url).with_header("content-type", content_type);

    if let Some(headers) = target.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.with_header(name.clone(), value.to_string());
            }
        }
    }

    if let Some(object) = action.object() {
        let body = serde_json::to_vec(object).map_err(|e| HandlerError::MalformedTarget(e.to_string()))?;
        request = request.with_body(body);
    }

    Ok(request)
}

#[async_trait]
impl ActionHandler for HttpDispatchHandler {
    #[instrument(skip(self, context, action), fields(action_id = action.identifier()))]
    async fn execute(&self, context: &HandlerContext, action: Action) -> Result<Action, HandlerError> {
        let resolvers = build_resolver_chain(context);
        let substituted = semflow_core::substitution::substitute(&action, &resolvers).await?;

        let request = build_request(&substituted)?;
        let mut updated = action.deep_copy();

        match context.transport.round_trip(request).await {
            Ok(response) if response.is_success() => {
                let result = serde_json::from_slice::<Value>(&response.body)
                    .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&response.body) }));
                updated.set_result(result);
                updated.set_status(ActionStatus::CompletedActionStatus);
            }
            Ok(response) => {
                warn!(status = response.status, action_id = updated.identifier(), "non-2xx response");
                updated.set_error(json!({
                    "statusCode": response.status,
                    "reason": String::from_utf8_lossy(&response.body),
                }));
                updated.set_status(ActionStatus::FailedActionStatus);
            }
            Err(e) => {
                updated.set_error(json!({ "reason": e.to_string() }));
                updated.set_status(ActionStatus::FailedActionStatus);
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use semflow_core::repository::{ActionRepository, RepositoryError};
    use semflow_transport::{HttpResponse, Transport, TransportError, TransportKind, TransportManager};
    use serde_json::json;

    #[derive(Default)]
    struct EmptyRepo;

    #[async_trait]
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

    struct StubTransport {
        status: u16,
        body: Vec<u8>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn round_trip(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse { status: self.status, headers: HashMap::new(), body: self.body.clone() })
        }
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn context_with(transport: TransportManager) -> HandlerContext {
        HandlerContext {
            workflow_id: "wf-1".to_string(),
            params: serde_json::Map::new(),
            action_repository: Arc::new(EmptyRepo),
            transport: Arc::new(transport),
        }
    }

    #[tokio::test]
    async fn success_response_populates_result_and_completes() {
        let manager = TransportManager::new();
        manager
            .register(TransportKind::Direct, Arc::new(StubTransport { status: 200, body: br#"{"ok":true}"#.to_vec() }))
            .await;
        let context = context_with(manager);

        let mut action = Action::new("A1", "SearchAction");
        action.set_field("target", json!({"url": "https://svc/search", "method": "GET"})).unwrap();

        let handler = HttpDispatchHandler::new();
        let updated = handler.execute(&context, action).await.unwrap();

        assert_eq!(updated.status(), ActionStatus::CompletedActionStatus);
        assert_eq!(updated.result(), Some(&json!({"ok": true})));
    }

    #[tokio::test]
    async fn non_2xx_response_records_error_without_handler_failure() {
        let manager = TransportManager::new();
        manager
            .register(TransportKind::Direct, Arc::new(StubTransport { status: 404, body: b"not found".to_vec() }))
            .await;
        let context = context_with(manager);

        let mut action = Action::new("A1", "SearchAction");
        action.set_field("target", json!({"url": "https://svc/search"})).unwrap();

        let handler = HttpDispatchHandler::new();
        let updated = handler.execute(&context, action).await.unwrap();

        assert_eq!(updated.status(), ActionStatus::FailedActionStatus);
        assert!(updated.error_doc().is_some());
    }

    #[tokio::test]
    async fn missing_target_is_malformed_target_error() {
        let manager = TransportManager::new();
        let context = context_with(manager);
        let action = Action::new("A1", "SearchAction");

        let handler = HttpDispatchHandler::new();
        let err = handler.execute(&context, action).await.unwrap_err();
        assert!(matches!(err, HandlerError::MalformedTarget(_)));
    }
}
