//! Transforms turn handler output into the body of a reply.
//!
//! Each transform receives the accumulated scope and returns the next
//! one. After the chain runs, `body` must hold exactly one string.

pub mod flatten;
pub mod shell;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::filter::{Filter, FilterValue, check_filters, create_filters};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};

/// Key-value scope threaded through a transform chain.
pub type Scope = serde_json::Map<String, Value>;

/// Scope key holding the reply body.
pub const BODY_KEY: &str = "body";

#[async_trait]
pub trait Transform: Service {
    /// Whether this transform applies to `value`.
    async fn check(&self, value: FilterValue<'_>) -> bool;

    async fn transform(&self, value: FilterValue<'_>, mime: &str, scope: Scope) -> Result<Scope>;
}

/// Run every applicable transform in order, threading the scope.
pub async fn apply_transforms(
    transforms: &[Arc<dyn Transform>],
    value: FilterValue<'_>,
    mime: &str,
    mut scope: Scope,
) -> Result<Scope> {
    for transform in transforms {
        if !transform.check(value).await {
            tracing::debug!(transform = %transform.metadata().tag(), "Transform skipped");
            continue;
        }
        scope = transform.transform(value, mime, scope).await?;
    }
    Ok(scope)
}

/// The single string at `body`. A one-element array is unwrapped.
pub fn extract_body(scope: &Scope) -> std::result::Result<String, SchemaError> {
    match scope.get(BODY_KEY) {
        Some(Value::String(body)) => Ok(body.clone()),
        Some(Value::Array(items)) => match items.as_slice() {
            [Value::String(body)] => Ok(body.clone()),
            _ => Err(SchemaError::MalformedOutput {
                reason: format!("body must hold one string, found {} items", items.len()),
            }),
        },
        Some(other) => Err(SchemaError::MalformedOutput {
            reason: format!("body must be a string, found {other}"),
        }),
        None => Err(SchemaError::MalformedOutput {
            reason: "body is missing".into(),
        }),
    }
}

/// Create (or reuse) the transforms named by `defs` through the registry.
pub async fn create_transforms(
    deps: &ServiceDeps,
    defs: &[ServiceDefinition],
) -> Result<Vec<Arc<dyn Transform>>> {
    if defs.is_empty() {
        return Ok(Vec::new());
    }
    let registry = deps.registry()?;
    let mut transforms = Vec::with_capacity(defs.len());
    for def in defs {
        let handle = registry.create_service(def.clone()).await?;
        let transform = handle.as_transform().ok_or_else(|| SchemaError::Invalid {
            entity: def.tag(),
            reason: format!("expected a transform, got a {}", handle.role()),
        })?;
        transforms.push(transform);
    }
    Ok(transforms)
}

/// Options every transform accepts.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct FilterOptions {
    #[serde(default)]
    pub filters: Vec<ServiceDefinition>,
}

/// Identity and filter chain shared by the built-in transforms.
pub(crate) struct TransformCore {
    pub metadata: ServiceMetadata,
    filters: Vec<Arc<dyn Filter>>,
}

impl TransformCore {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: FilterOptions = def.options()?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            filters: create_filters(deps, &options.filters).await?,
        })
    }

    pub async fn check(&self, value: FilterValue<'_>) -> bool {
        check_filters(&self.filters, value).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scope(value: Value) -> Scope {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn body_string_or_single_item() {
        assert_eq!(extract_body(&scope(json!({"body": "hi"}))).unwrap(), "hi");
        assert_eq!(extract_body(&scope(json!({"body": ["hi"]}))).unwrap(), "hi");
    }

    #[test]
    fn malformed_bodies() {
        for value in [
            json!({}),
            json!({"body": 3}),
            json!({"body": ["a", "b"]}),
            json!({"body": []}),
            json!({"body": [1]}),
        ] {
            assert!(matches!(
                extract_body(&scope(value)),
                Err(SchemaError::MalformedOutput { .. })
            ));
        }
    }
}
