//! Variable substitution: resolving `${reference}` tokens across a deep-copied
//! Action document (spec §4.2).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::action::{Action, ActionStatus};
use crate::repository::{ActionRepository, RepositoryError};

#[derive(Debug, Error, PartialEq)]
pub enum SubstitutionError {
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    #[error("dependency not ready: {0}")]
    DependencyNotReady(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("backend error resolving {reference}: {message}")]
    Backend { reference: String, message: String },
}

impl From<(String, RepositoryError)> for SubstitutionError {
    fn from((reference, err): (String, RepositoryError)) -> Self {
        match err {
            RepositoryError::NotFound(_) => SubstitutionError::InvalidReference(reference),
            other => SubstitutionError::Backend {
                reference,
                message: other.to_string(),
            },
        }
    }
}

/// A single resolver in a composable chain: try each, first success wins.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Attempt to resolve `reference`. `Ok(None)` means "not mine, try the next
    /// resolver"; `Ok(Some(_))` is a successful resolution; `Err` aborts the
    /// whole substitution (the token was this resolver's to own, and it failed).
    async fn resolve(&self, reference: &str) -> Result<Option<String>, SubstitutionError>;
}

/// Looks up `reference` in a static mapping.
pub struct MapResolver {
    values: std::collections::HashMap<String, String>,
}

impl MapResolver {
    pub fn new(values: std::collections::HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl Resolver for MapResolver {
    async fn resolve(&self, reference: &str) -> Result<Option<String>, SubstitutionError> {
        // A map resolver only understands single parameter names, not dotted
        // action-result paths; yield to the next resolver if this looks like one.
        if reference.contains('.') {
            return Ok(None);
        }
        match self.values.get(reference) {
            Some(v) => Ok(Some(v.clone())),
            None => Err(SubstitutionError::VariableNotFound(reference.to_string())),
        }
    }
}

/// Resolves `actionID.field.path` references against completed peer Actions.
pub struct ActionResultResolver {
    workflow_id: String,
    repository: Arc<dyn ActionRepository>,
}

impl ActionResultResolver {
    pub fn new(workflow_id: impl Into<String>, repository: Arc<dyn ActionRepository>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            repository,
        }
    }
}

#[async_trait]
impl Resolver for ActionResultResolver {
    async fn resolve(&self, reference: &str) -> Result<Option<String>, SubstitutionError> {
        let mut parts = reference.splitn(3, '.');
        let (Some(action_id), Some(field)) = (parts.next(), parts.next()) else {
            return Ok(None);
        };
        let rest = parts.next();
        let path = match rest {
            Some(rest) => format!("{field}.{rest}"),
            None => field.to_string(),
        };

        let peer = self
            .repository
            .get_action(&self.workflow_id, action_id)
            .await
            .map_err(|e| (reference.to_string(), e))?;

        if peer.status() != ActionStatus::CompletedActionStatus {
            return Err(SubstitutionError::DependencyNotReady(action_id.to_string()));
        }

        let value = peer
            .get_field(&path)
            .map_err(|_| SubstitutionError::InvalidReference(reference.to_string()))?;
        Ok(Some(render(value)))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Chain of resolvers tried in order; first success wins.
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    async fn resolve(&self, reference: &str) -> Result<String, SubstitutionError> {
        let mut last_err = None;
        for resolver in &self.resolvers {
            match resolver.resolve(reference).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => continue,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SubstitutionError::VariableNotFound(reference.to_string())))
    }
}

/// Resolve every `${reference}` token in `action`, returning a deep-copied,
/// fully-substituted Action. The original is never mutated. Aborts on the
/// first unresolved token.
pub async fn substitute(
    action: &Action,
    resolvers: &ResolverChain,
) -> Result<Action, SubstitutionError> {
    let mut copy = action.deep_copy();
    let value = copy.to_value();
    let resolved = substitute_value(value, resolvers).await?;
    copy = Action::from_value(resolved).expect("substitution preserves document shape");
    Ok(copy)
}

fn substitute_value<'a>(
    value: Value,
    resolvers: &'a ResolverChain,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, SubstitutionError>> + 'a>> {
    Box::pin(async move {
        match value {
            Value::String(s) => Ok(Value::String(substitute_string(&s, resolvers).await?)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(substitute_value(item, resolvers).await?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, substitute_value(v, resolvers).await?);
                }
                Ok(Value::Object(out))
            }
            leaf => Ok(leaf),
        }
    })
}

async fn substitute_string(
    s: &str,
    resolvers: &ResolverChain,
) -> Result<String, SubstitutionError> {
    if !s.contains("${") {
        return Ok(s.to_string());
    }
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated token: treat the remainder literally.
            result.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let reference = &after[..end];
        let resolved = resolvers.resolve(reference).await?;
        result.push_str(&resolved);
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}
