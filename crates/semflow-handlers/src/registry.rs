//! Maps an Action's discriminator (`additionalType`, falling back to `type`)
//! to a registered [`ActionHandler`] (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use semflow_core::action::Action;

use crate::ActionHandler;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, discriminator: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().unwrap().insert(discriminator.into(), handler);
    }

    /// `additionalType` is checked first (more specific), then `type`.
    pub fn resolve(&self, action: &Action) -> Option<Arc<dyn ActionHandler>> {
        let handlers = self.handlers.read().unwrap();
        if let Some(additional_type) = action.additional_type() {
            if let Some(handler) = handlers.get(additional_type) {
                return Some(Arc::clone(handler));
            }
        }
        action.action_type().and_then(|action_type| handlers.get(action_type).cloned())
    }
}
