//! Join values found at key paths into one string.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::filter::FilterValue;
use crate::rules::path;
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::{BODY_KEY, Scope, Transform, TransformCore};

fn default_separator() -> String {
    " ".to_string()
}

fn default_target() -> String {
    BODY_KEY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct FlattenOptions {
    /// Paths into the scope, read in order.
    keys: Vec<String>,
    #[serde(default = "default_separator")]
    separator: String,
    /// Scope key receiving the joined string.
    #[serde(default = "default_target")]
    target: String,
}

pub struct FlattenTransform {
    core: TransformCore,
    options: FlattenOptions,
}

impl FlattenTransform {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        Ok(Self {
            options: def.options()?,
            core: TransformCore::new(def, deps).await?,
        })
    }
}

/// Render a scalar for display. Objects keep their JSON form.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Service for FlattenTransform {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Transform for FlattenTransform {
    async fn check(&self, value: FilterValue<'_>) -> bool {
        self.core.check(value).await
    }

    async fn transform(
        &self,
        _value: FilterValue<'_>,
        _mime: &str,
        mut scope: Scope,
    ) -> Result<Scope> {
        let root = Value::Object(scope.clone());
        let parts: Vec<String> = self
            .options
            .keys
            .iter()
            .flat_map(|key| path::query(&root, key))
            .map(display_value)
            .filter(|part| !part.is_empty())
            .collect();

        scope.insert(
            self.options.target.clone(),
            Value::String(parts.join(&self.options.separator)),
        );
        Ok(scope)
    }
}
