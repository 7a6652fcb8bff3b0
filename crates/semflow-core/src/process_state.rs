//! ProcessState: the externally-facing progress record, independent of the
//! Action document model (spec §3.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Current state of a business process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStateValue {
    Started,
    Running,
    Successful,
    Failed,
}

impl ProcessStateValue {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessStateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single append-only history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessHistoryEntry {
    pub state: ProcessStateValue,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Errors raised while applying a transition to a [`ProcessState`].
#[derive(Debug, Error, PartialEq)]
pub enum ProcessStateError {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ProcessStateValue,
        to: ProcessStateValue,
    },

    #[error("process already exists: {0}")]
    AlreadyExists(String),

    #[error("process not found: {0}")]
    NotFound(String),

    #[error("revision conflict: expected {expected}, found {actual}")]
    RevisionConflict { expected: String, actual: String },
}

/// One record per business process, document ID `process_{process_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessState {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub revision: String,
    pub process_id: String,
    pub state: ProcessStateValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<ProcessHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Document ID for the process state of `process_id`.
pub fn document_id(process_id: &str) -> String {
    format!("process_{process_id}")
}

fn next_revision(previous: &str) -> String {
    match previous.split_once('-') {
        Some((seq, _)) => {
            let next = seq.parse::<u64>().unwrap_or(0) + 1;
            format!("{next}-{}", uuid::Uuid::new_v4().simple())
        }
        None => format!("1-{}", uuid::Uuid::new_v4().simple()),
    }
}

impl ProcessState {
    /// Creation is only valid from `started`.
    pub fn create(
        process_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        description: Option<String>,
    ) -> Self {
        let process_id = process_id.into();
        Self {
            id: document_id(&process_id),
            revision: format!("1-{}", uuid::Uuid::new_v4().simple()),
            process_id,
            state: ProcessStateValue::Started,
            created_at: timestamp,
            updated_at: timestamp,
            history: vec![ProcessHistoryEntry {
                state: ProcessStateValue::Started,
                timestamp,
                error_message: None,
            }],
            metadata: None,
            error_message: None,
            description,
        }
    }

    /// Valid transitions: started -> running -> {successful|failed};
    /// started -> failed also admissible. Metadata is merged last-writer-wins
    /// per key; history only ever grows.
    pub fn apply_transition(
        &mut self,
        new_state: ProcessStateValue,
        timestamp: DateTime<Utc>,
        error_message: Option<String>,
        description: Option<String>,
        metadata: Option<HashMap<String, Value>>,
        expected_revision: Option<&str>,
    ) -> Result<(), ProcessStateError> {
        if let Some(expected) = expected_revision {
            if expected != self.revision {
                return Err(ProcessStateError::RevisionConflict {
                    expected: expected.to_string(),
                    actual: self.revision.clone(),
                });
            }
        }

        let valid = matches!(
            (self.state, new_state),
            (ProcessStateValue::Started, ProcessStateValue::Running)
                | (ProcessStateValue::Started, ProcessStateValue::Successful)
                | (ProcessStateValue::Started, ProcessStateValue::Failed)
                | (ProcessStateValue::Running, ProcessStateValue::Successful)
                | (ProcessStateValue::Running, ProcessStateValue::Failed)
                | (ProcessStateValue::Running, ProcessStateValue::Running)
        );
        if !valid {
            return Err(ProcessStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = timestamp;
        if error_message.is_some() {
            self.error_message = error_message.clone();
        }
        if description.is_some() {
            self.description = description;
        }
        if let Some(update) = metadata {
            let existing = self.metadata.get_or_insert_with(HashMap::new);
            for (k, v) in update {
                existing.insert(k, v);
            }
        }
        self.history.push(ProcessHistoryEntry {
            state: new_state,
            timestamp,
            error_message,
        });
        self.revision = next_revision(&self.revision);
        Ok(())
    }
}
