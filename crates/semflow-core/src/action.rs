//! The Action document model: a loss-free JSON-LD (Schema.org) document.
//!
//! An [`Action`] keeps every field it was constructed from in a preserved
//! [`serde_json::Map`], and layers typed accessors for the fields the runtime
//! actually reasons about on top. Writes through the typed accessors win over
//! whatever was in the preserved map; the preserved map never overrides a typed
//! edit. This is the "emit the preserved map first, overlay typed fields only
//! when they differ" strategy: see `Action::to_value`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Lifecycle status of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActionStatus {
    PotentialActionStatus,
    ActiveActionStatus,
    CompletedActionStatus,
    FailedActionStatus,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PotentialActionStatus => "PotentialActionStatus",
            Self::ActiveActionStatus => "ActiveActionStatus",
            Self::CompletedActionStatus => "CompletedActionStatus",
            Self::FailedActionStatus => "FailedActionStatus",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised while navigating or mutating an [`Action`]'s fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("not an object at path segment: {0}")]
    NotAnObject(String),

    #[error("invalid JSON-LD document: {0}")]
    InvalidDocument(String),

    #[error("identifier is immutable after creation")]
    ImmutableIdentifier,
}

/// A single executable step in a workflow, represented as a JSON-LD document.
///
/// Field access that isn't covered by a typed accessor goes through
/// [`Action::get_field`] / [`Action::set_field`], which navigate the preserved
/// map by dotted path.
#[derive(Debug, Clone)]
pub struct Action {
    identifier: String,
    fields: Map<String, Value>,
}

const TYPED_KEYS: &[&str] = &[
    "identifier",
    "type",
    "name",
    "description",
    "actionStatus",
    "startTime",
    "endTime",
    "requires",
    "isPartOf",
    "exampleOfWork",
    "additionalType",
    "dateCreated",
    "dateModified",
];

impl Action {
    /// Parse a byte buffer of JSON-LD into an `Action`.
    pub fn parse(bytes: &[u8]) -> Result<Self, ActionError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ActionError::InvalidDocument(e.to_string()))?;
        Self::from_value(value)
    }

    /// Build an `Action` from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ActionError> {
        let Value::Object(fields) = value else {
            return Err(ActionError::InvalidDocument(
                "top-level JSON-LD document must be an object".into(),
            ));
        };
        let identifier = fields
            .get("identifier")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidDocument("missing identifier".into()))?
            .to_string();
        Ok(Self { identifier, fields })
    }

    /// Create a fresh Action with the essential fields set; all other fields
    /// start unset and can be added via [`Action::set_field`].
    pub fn new(identifier: impl Into<String>, action_type: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let mut fields = Map::new();
        fields.insert("identifier".into(), Value::String(identifier.clone()));
        fields.insert("type".into(), Value::String(action_type.into()));
        fields.insert(
            "actionStatus".into(),
            Value::String(ActionStatus::PotentialActionStatus.as_str().into()),
        );
        fields.insert("requires".into(), Value::Array(vec![]));
        Self { identifier, fields }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn action_type(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    pub fn set_action_type(&mut self, value: impl Into<String>) {
        self.fields
            .insert("type".into(), Value::String(value.into()));
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.fields.get("description").and_then(Value::as_str)
    }

    pub fn status(&self) -> ActionStatus {
        match self.fields.get("actionStatus").and_then(Value::as_str) {
            Some("ActiveActionStatus") => ActionStatus::ActiveActionStatus,
            Some("CompletedActionStatus") => ActionStatus::CompletedActionStatus,
            Some("FailedActionStatus") => ActionStatus::FailedActionStatus,
            _ => ActionStatus::PotentialActionStatus,
        }
    }

    pub fn set_status(&mut self, status: ActionStatus) {
        self.fields
            .insert("actionStatus".into(), Value::String(status.as_str().into()));
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("startTime")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_start_time(&mut self, time: DateTime<Utc>) {
        self.fields
            .insert("startTime".into(), Value::String(time.to_rfc3339()));
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("endTime")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_end_time(&mut self, time: DateTime<Utc>) {
        self.fields
            .insert("endTime".into(), Value::String(time.to_rfc3339()));
    }

    /// Ordered sequence of prerequisite peer identifiers.
    pub fn requires(&self) -> Vec<String> {
        self.fields
            .get("requires")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_requires(&mut self, requires: Vec<String>) {
        self.fields.insert(
            "requires".into(),
            Value::Array(requires.into_iter().map(Value::String).collect()),
        );
    }

    pub fn is_part_of(&self) -> Option<&str> {
        self.fields.get("isPartOf").and_then(Value::as_str)
    }

    pub fn set_is_part_of(&mut self, workflow_id: impl Into<String>) {
        self.fields
            .insert("isPartOf".into(), Value::String(workflow_id.into()));
    }

    pub fn example_of_work(&self) -> Option<&str> {
        self.fields.get("exampleOfWork").and_then(Value::as_str)
    }

    pub fn additional_type(&self) -> Option<&str> {
        self.fields.get("additionalType").and_then(Value::as_str)
    }

    pub fn result(&self) -> Option<&Value> {
        self.fields.get("result")
    }

    pub fn set_result(&mut self, result: Value) {
        self.fields.insert("result".into(), result);
    }

    pub fn error_doc(&self) -> Option<&Value> {
        self.fields.get("error")
    }

    pub fn set_error(&mut self, error: Value) {
        self.fields.insert("error".into(), error);
    }

    pub fn target(&self) -> Option<&Value> {
        self.fields.get("target")
    }

    pub fn object(&self) -> Option<&Value> {
        self.fields.get("object")
    }

    pub fn query(&self) -> Option<&Value> {
        self.fields.get("query")
    }

    pub fn control_metadata(&self) -> Option<&Value> {
        self.fields.get("controlMetadata")
    }

    /// Navigate a dotted path into the preserved map and return the terminal value.
    pub fn get_field(&self, path: &str) -> Result<&Value, ActionError> {
        let mut segments = path.split('.');
        let first = segments
            .next()
            .ok_or_else(|| ActionError::FieldNotFound(path.to_string()))?;
        let mut current = self
            .fields
            .get(first)
            .ok_or_else(|| ActionError::FieldNotFound(path.to_string()))?;
        for segment in segments {
            match current {
                Value::Object(map) => {
                    current = map
                        .get(segment)
                        .ok_or_else(|| ActionError::FieldNotFound(path.to_string()))?;
                }
                _ => return Err(ActionError::NotAnObject(segment.to_string())),
            }
        }
        Ok(current)
    }

    /// Walk the preserved map by dotted path, creating missing intermediate
    /// object nodes, and assign `value` at the terminal segment.
    pub fn set_field(&mut self, path: &str, value: Value) -> Result<(), ActionError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.is_empty() {
            return Err(ActionError::FieldNotFound(path.to_string()));
        }
        if segments.len() == 1 && segments[0] == "identifier" {
            return Err(ActionError::ImmutableIdentifier);
        }
        let (last, init) = segments.split_last().expect("non-empty segments");

        let mut current = &mut self.fields;
        for segment in init {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(map) => current = map,
                _ => return Err(ActionError::NotAnObject((*segment).to_string())),
            }
        }
        current.insert((*last).to_string(), value);
        Ok(())
    }

    /// Serialize back to JSON-LD bytes. The preserved map is the basis for
    /// every field; typed accessors only ever write *into* that same map, so
    /// serialization is just re-encoding `self.fields` as-is.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ActionError> {
        serde_json::to_vec(&self.to_value()).map_err(|e| ActionError::InvalidDocument(e.to_string()))
    }

    /// Deep-copy via serialize-then-parse.
    pub fn deep_copy(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            fields: self.fields.clone(),
        }
    }

    /// DFS cycle check over `requires` edges, given a lookup of sibling
    /// actions by identifier. Returns the identifiers forming a cycle, if any.
    pub fn detect_cycle<'a>(
        actions: impl Iterator<Item = &'a Action>,
    ) -> Result<(), Vec<String>> {
        use std::collections::HashMap;

        let actions: Vec<&Action> = actions.collect();
        let by_id: HashMap<&str, &Action> =
            actions.iter().map(|a| (a.identifier(), *a)).collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Action>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut VecDeque<String>,
        ) -> Result<(), Vec<String>> {
            if let Some(Mark::Done) = marks.get(id) {
                return Ok(());
            }
            if let Some(Mark::Visiting) = marks.get(id) {
                let mut cycle: Vec<String> = stack.iter().cloned().collect();
                cycle.push(id.to_string());
                return Err(cycle);
            }
            marks.insert(id, Mark::Visiting);
            stack.push_back(id.to_string());
            if let Some(action) = by_id.get(id) {
                for dep in action.requires() {
                    visit(&dep, by_id, marks, stack)?;
                }
            }
            stack.pop_back();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for action in &actions {
            let mut stack = VecDeque::new();
            visit(action.identifier(), &by_id, &mut marks, &mut stack)?;
        }
        Ok(())
    }
}

impl Serialize for Action {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Action::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.fields == other.fields
    }
}

/// Any attribute not covered by a typed accessor is still reachable through
/// these keys for callers that want to enumerate what's preserved.
pub fn typed_keys() -> &'static [&'static str] {
    TYPED_KEYS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_bytes() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "identifier": "a1",
            "type": "SearchAction",
            "name": "Search",
            "actionStatus": "PotentialActionStatus",
            "requires": [],
            "isPartOf": "wf-1",
            "query": {"text": "hello"},
            "customVendorField": {"nested": {"deep": 1}},
        }))
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let bytes = sample_bytes();
        let action = Action::parse(&bytes).unwrap();
        let reparsed = Action::parse(&action.to_bytes().unwrap()).unwrap();
        assert_eq!(action, reparsed);
        assert_eq!(
            reparsed.get_field("customVendorField.nested.deep").unwrap(),
            &json!(1)
        );
    }

    #[test]
    fn typed_edits_override_preserved_value() {
        let bytes = sample_bytes();
        let mut action = Action::parse(&bytes).unwrap();
        assert_eq!(action.status(), ActionStatus::PotentialActionStatus);
        action.set_status(ActionStatus::ActiveActionStatus);
        let value = action.to_value();
        assert_eq!(value["actionStatus"], json!("ActiveActionStatus"));
    }

    #[test]
    fn identifier_is_immutable() {
        let mut action = Action::parse(&sample_bytes()).unwrap();
        let original_identifier = action.identifier().to_string();
        let err = action.set_field("identifier", json!("other")).unwrap_err();
        assert_eq!(err, ActionError::ImmutableIdentifier);
        assert_eq!(action.identifier(), original_identifier);
        assert_eq!(action.to_value()["identifier"], json!(original_identifier));
    }

    #[test]
    fn get_field_missing_segment_fails() {
        let action = Action::parse(&sample_bytes()).unwrap();
        assert_eq!(
            action.get_field("query.missing"),
            Err(ActionError::FieldNotFound("query.missing".into()))
        );
    }

    #[test]
    fn get_field_through_non_object_fails() {
        let action = Action::parse(&sample_bytes()).unwrap();
        assert_eq!(
            action.get_field("name.sub"),
            Err(ActionError::NotAnObject("sub".into()))
        );
    }

    #[test]
    fn set_field_creates_missing_intermediates() {
        let mut action = Action::parse(&sample_bytes()).unwrap();
        action.set_field("result.contentUrl", json!("/tmp/x.xml")).unwrap();
        assert_eq!(
            action.get_field("result.contentUrl").unwrap(),
            &json!("/tmp/x.xml")
        );
    }

    #[test]
    fn set_field_through_non_object_fails() {
        let mut action = Action::parse(&sample_bytes()).unwrap();
        let err = action.set_field("name.sub", json!(1)).unwrap_err();
        assert_eq!(err, ActionError::NotAnObject("name".into()));
    }

    #[test]
    fn deep_copy_is_independent() {
        let action = Action::parse(&sample_bytes()).unwrap();
        let mut copy = action.deep_copy();
        copy.set_status(ActionStatus::FailedActionStatus);
        assert_eq!(action.status(), ActionStatus::PotentialActionStatus);
        assert_eq!(copy.status(), ActionStatus::FailedActionStatus);
    }

    #[test]
    fn cycle_detection_flags_circular_requires() {
        let mut a1 = Action::new("a1", "SearchAction");
        a1.set_requires(vec!["a2".into()]);
        let mut a2 = Action::new("a2", "SearchAction");
        a2.set_requires(vec!["a1".into()]);
        let actions = vec![a1, a2];
        let result = Action::detect_cycle(actions.iter());
        assert!(result.is_err());
    }

    #[test]
    fn no_cycle_for_empty_requires() {
        let a1 = Action::new("a1", "SearchAction");
        let a2 = Action::new("a2", "SearchAction");
        let actions = vec![a1, a2];
        assert!(Action::detect_cycle(actions.iter()).is_ok());
    }
}
