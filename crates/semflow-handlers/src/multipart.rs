//! Multipart ingress: parses `multipart/form-data` where the `action` field
//! carries the JSON-LD document and other parts carry named files (spec
//! §4.8 "Handlers may accept multipart ingress").

use std::collections::HashMap;

use axum::extract::Multipart;
use semflow_core::action::{Action, ActionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultipartIngressError {
    #[error("missing required `action` part")]
    MissingAction,

    #[error("`action` part is not valid JSON-LD: {0}")]
    InvalidAction(#[from] ActionError),

    #[error("multipart read error: {0}")]
    Read(String),
}

/// An Action paired with the named file parts that accompanied it.
pub struct MultipartIngress {
    pub action: Action,
    pub files: HashMap<String, Vec<u8>>,
}

impl MultipartIngress {
    /// Drains `multipart`, extracting the `action` field as JSON-LD and every
    /// other named part as a file by its field name.
    pub async fn parse(mut multipart: Multipart) -> Result<Self, MultipartIngressError> {
        let mut action: Option<Action> = None;
        let mut files = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| MultipartIngressError::Read(e.to_string()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let bytes = field
                .bytes()
                .await
                .map_err(|e| MultipartIngressError::Read(e.to_string()))?;

            if name == "action" {
                action = Some(Action::parse(&bytes)?);
            } else {
                files.insert(name, bytes.to_vec());
            }
        }

        Ok(Self {
            action: action.ok_or(MultipartIngressError::MissingAction)?,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_action_error_display() {
        let err = MultipartIngressError::MissingAction;
        assert_eq!(err.to_string(), "missing required `action` part");
    }
}
