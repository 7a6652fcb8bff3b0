//! A workflow is itself an Action with `type = ItemList` (spec §3.2).

use crate::action::{Action, ActionError};

/// Thin wrapper distinguishing the workflow-level Action from its children.
#[derive(Debug, Clone)]
pub struct Workflow {
    inner: Action,
}

impl Workflow {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut inner = Action::new(workflow_id, "ItemList");
        inner.set_field("name", serde_json::Value::String(name.into())).ok();
        Self { inner }
    }

    pub fn from_action(action: Action) -> Result<Self, ActionError> {
        if action.action_type() != Some("ItemList") {
            return Err(ActionError::InvalidDocument(
                "workflow Action must have type = ItemList".into(),
            ));
        }
        Ok(Self { inner: action })
    }

    pub fn id(&self) -> &str {
        self.inner.identifier()
    }

    pub fn action(&self) -> &Action {
        &self.inner
    }

    pub fn action_mut(&mut self) -> &mut Action {
        &mut self.inner
    }

    pub fn into_action(self) -> Action {
        self.inner
    }
}
