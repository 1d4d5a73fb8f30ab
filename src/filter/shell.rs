//! Filter decided by an external program.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::filter::{Filter, FilterBehavior, FilterValue};
use crate::process::{self, ProcessSpec};
use crate::service::{Service, ServiceDefinition, ServiceMetadata};

#[derive(Debug, Clone, Deserialize)]
struct ShellFilterOptions {
    #[serde(flatten)]
    process: ProcessSpec,
}

/// Runs a program with the entity as JSON on stdin. Exit status 0 allows
/// the entity, anything else drops it.
pub struct ShellFilter {
    metadata: ServiceMetadata,
    process: ProcessSpec,
}

impl ShellFilter {
    pub fn new(def: &ServiceDefinition) -> Result<Self> {
        let options: ShellFilterOptions = def.options()?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            process: options.process,
        })
    }
}

impl Service for ShellFilter {
    fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }
}

#[async_trait]
impl Filter for ShellFilter {
    async fn check(&self, value: FilterValue<'_>) -> Result<FilterBehavior> {
        let input = serde_json::to_vec(&value.to_value()?).map_err(SchemaError::from)?;
        let output = process::run(&self.process, &input).await?;
        debug!(
            filter = %self.metadata.tag(),
            status = output.status,
            "Shell filter finished"
        );
        Ok(if output.success() {
            FilterBehavior::Allow
        } else {
            FilterBehavior::Drop
        })
    }
}
