//! Schema.org `Event`-shaped records emitted at significant lifecycle points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Named lifecycle points an [`Event`] can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RequestSent,
    ResponseReceived,
    ActionSuccess,
    ActionFailure,
    WorkflowStarted,
    WorkflowCompleted,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestSent => "request-sent",
            Self::ResponseReceived => "response-received",
            Self::ActionSuccess => "action-success",
            Self::ActionFailure => "action-failure",
            Self::WorkflowStarted => "workflow-started",
            Self::WorkflowCompleted => "workflow-completed",
        }
    }
}

/// Schema.org `Event` shaped record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub identifier: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Reference to the workflow or action this event is about.
    pub about: String,
    pub location: Option<String>,
    pub organizer: String,
    pub additional_property: HashMap<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, about: impl Into<String>, organizer: impl Into<String>) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            name: kind.name().to_string(),
            description: None,
            start_time: Utc::now(),
            about: about.into(),
            location: None,
            organizer: organizer.into(),
            additional_property: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_property.insert(key.into(), value);
        self
    }

    pub fn with_start_time(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = time;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_carries_named_measurements() {
        let event = Event::new(EventKind::ActionFailure, "wf-1/a1", "semflow-runtime")
            .with_description("handler returned 503")
            .with_property("httpStatus", json!(503))
            .with_property("durationMs", json!(1234));

        assert_eq!(event.name, "action-failure");
        assert_eq!(event.additional_property["httpStatus"], json!(503));
    }
}
