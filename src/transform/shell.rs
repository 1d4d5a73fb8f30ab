//! Reply body produced by an external program.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProcessError, Result, SchemaError};
use crate::filter::FilterValue;
use crate::process::{self, ProcessSpec};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::{BODY_KEY, Scope, Transform, TransformCore};

#[derive(Debug, Clone, Deserialize)]
struct ShellTransformOptions {
    #[serde(flatten)]
    process: ProcessSpec,
}

/// Feeds the scope as JSON on stdin and stores stdout under `body`.
/// A non-zero exit fails the transform.
pub struct ShellTransform {
    core: TransformCore,
    process: ProcessSpec,
}

impl ShellTransform {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: ShellTransformOptions = def.options()?;
        Ok(Self {
            process: options.process,
            core: TransformCore::new(def, deps).await?,
        })
    }
}

impl Service for ShellTransform {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Transform for ShellTransform {
    async fn check(&self, value: FilterValue<'_>) -> bool {
        self.core.check(value).await
    }

    async fn transform(
        &self,
        _value: FilterValue<'_>,
        _mime: &str,
        mut scope: Scope,
    ) -> Result<Scope> {
        let input = serde_json::to_vec(&scope).map_err(SchemaError::from)?;
        let output = process::run(&self.process, &input).await?;
        if !output.success() {
            return Err(ProcessError {
                command: self.process.command.clone(),
                reason: format!("exited with {}: {}", output.status, output.stderr.trim()),
            }
            .into());
        }

        let body = output.stdout.trim_end_matches(['\r', '\n']).to_string();
        scope.insert(BODY_KEY.to_string(), Value::String(body));
        Ok(scope)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entity::{ChannelData, Context, Message, SourceUser};
    use crate::error::Error;

    fn message() -> Message {
        let context = Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("alice", "u-1"),
        )
        .unwrap();
        Message::text(context, "")
    }

    async fn transform(script: &str) -> ShellTransform {
        ShellTransform::new(
            &ServiceDefinition::new(
                "shell-transform",
                "test",
                json!({"command": "sh", "args": ["-c", script]}),
            ),
            &ServiceDeps::in_memory(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn stdout_becomes_body() {
        let transform = transform("tr a-z A-Z").await;
        let Value::Object(scope) = json!({"word": "abc"}) else {
            unreachable!()
        };
        let message = message();
        let out = transform
            .transform(FilterValue::Message(&message), "text/plain", scope)
            .await
            .unwrap();
        assert_eq!(out["body"], json!(r#"{"WORD":"ABC"}"#));
        assert_eq!(out["word"], json!("abc"));
    }

    #[tokio::test]
    async fn failing_program_is_an_error() {
        let transform = transform("echo nope >&2; exit 1").await;
        let message = message();
        let result = transform
            .transform(FilterValue::Message(&message), "text/plain", Scope::new())
            .await;
        assert!(matches!(result, Err(Error::Process(_))));
    }
}
