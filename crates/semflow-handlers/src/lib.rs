//! Action handler registry and HTTP dispatch (spec §4.8).
//!
//! ```text
//!  Action ──▶ HandlerRegistry.resolve(type|additionalType)
//!                │
//!                ▼
//!          ActionHandler::execute
//!                │ substitute ▸ build request ▸ transport.round_trip ▸ parse
//!                ▼
//!          updated Action (result or error)
//! ```

pub mod dispatcher;
pub mod http_handler;
pub mod multipart;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use http_handler::HttpDispatchHandler;
pub use multipart::{MultipartIngress, MultipartIngressError};
pub use registry::HandlerRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use semflow_core::action::Action;
use semflow_core::repository::ActionRepository;
use semflow_core::substitution::SubstitutionError;
use semflow_transport::{TransportError, TransportManager};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("substitution error: {0}")]
    Substitution(#[from] SubstitutionError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed target: {0}")]
    MalformedTarget(String),

    #[error("response parse error: {0}")]
    ResponseParse(String),
}

/// Everything a handler needs beyond the Action itself: the workflow's
/// parameters (for substitution), read access to completed peer Actions, and
/// the transport manager used to actually dispatch the request.
pub struct HandlerContext {
    pub workflow_id: String,
    pub params: Map<String, Value>,
    pub action_repository: Arc<dyn ActionRepository>,
    pub transport: Arc<TransportManager>,
}

/// Implemented by each registered handler. `execute` returns the updated
/// Action for persistence; a handler-level `Err` means dispatch never
/// happened at all (unsupported action, substitution failure) as opposed to
/// a transport-level non-2xx response, which is captured *into* the returned
/// Action's `error` field with `Ok`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, context: &HandlerContext, action: Action) -> Result<Action, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display_is_stable() {
        let err = HandlerError::UnsupportedAction("FooAction".to_string());
        assert_eq!(err.to_string(), "unsupported action: FooAction");
    }
}
