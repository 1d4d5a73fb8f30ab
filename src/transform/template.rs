//! Render `{{ path }}` templates against the scope.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::filter::FilterValue;
use crate::rules::path;
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::flatten::display_value;
use crate::transform::{Scope, Transform, TransformCore};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, Deserialize)]
struct TemplateOptions {
    /// Scope key → template.
    templates: BTreeMap<String, String>,
}

/// Writes each rendered template into its scope key. Missing paths
/// render as empty strings; multiple values are joined with `, `.
pub struct TemplateTransform {
    core: TransformCore,
    templates: BTreeMap<String, String>,
}

impl TemplateTransform {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: TemplateOptions = def.options()?;
        Ok(Self {
            templates: options.templates,
            core: TransformCore::new(def, deps).await?,
        })
    }
}

fn render(template: &str, root: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            path::query(root, &caps[1])
                .into_iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .into_owned()
}

impl Service for TemplateTransform {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Transform for TemplateTransform {
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
        for (key, template) in &self.templates {
            scope.insert(key.clone(), Value::String(render(template, &root)));
        }
        Ok(scope)
    }
}
