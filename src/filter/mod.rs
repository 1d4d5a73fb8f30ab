//! Filters decide whether a command or message may continue.
//!
//! A chain is evaluated in order and stops at the first `Drop`. `Ignore`
//! means the filter has no opinion on this entity and never blocks.

pub mod command;
pub mod message;
pub mod shell;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::{Command, Context, Message};
use crate::error::{Result, SchemaError};
use crate::rules::{MatchDef, MatchRules};
use crate::service::{Service, ServiceDefinition, ServiceDeps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBehavior {
    Allow,
    Drop,
    Ignore,
}

/// The entity being filtered.
#[derive(Debug, Clone, Copy)]
pub enum FilterValue<'a> {
    Command(&'a Command),
    Message(&'a Message),
}

impl<'a> FilterValue<'a> {
    pub fn context(&self) -> &'a Context {
        match *self {
            Self::Command(command) => &command.context,
            Self::Message(message) => &message.context,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Message(_) => "message",
        }
    }

    /// Serialized form used by rule matching and subprocess input.
    pub fn to_value(&self) -> std::result::Result<Value, SchemaError> {
        Ok(match self {
            Self::Command(command) => serde_json::to_value(command)?,
            Self::Message(message) => serde_json::to_value(message)?,
        })
    }
}

#[async_trait]
pub trait Filter: Service {
    async fn check(&self, value: FilterValue<'_>) -> Result<FilterBehavior>;
}

/// Options shared by the rule-based filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RuleFilterOptions {
    #[serde(rename = "match", default)]
    pub rules: MatchDef,
}

impl RuleFilterOptions {
    pub fn compile(&self) -> std::result::Result<MatchRules, SchemaError> {
        MatchRules::compile(&self.rules)
    }
}

/// Run `value` through `filters`. Stops at the first `Drop`; a failing
/// filter counts as `Drop`.
pub async fn check_filters(filters: &[Arc<dyn Filter>], value: FilterValue<'_>) -> bool {
    for filter in filters {
        let behavior = match filter.check(value).await {
            Ok(behavior) => behavior,
            Err(e) => {
                warn!(
                    filter = %filter.metadata().tag(),
                    entity = value.kind(),
                    error = %e,
                    "Filter failed, dropping"
                );
                FilterBehavior::Drop
            }
        };

        if behavior == FilterBehavior::Drop {
            debug!(
                filter = %filter.metadata().tag(),
                entity = value.kind(),
                "Filter dropped entity"
            );
            return false;
        }
    }
    true
}

/// Create (or reuse) the filters named by `defs` through the registry.
pub async fn create_filters(
    deps: &ServiceDeps,
    defs: &[ServiceDefinition],
) -> Result<Vec<Arc<dyn Filter>>> {
    if defs.is_empty() {
        return Ok(Vec::new());
    }
    let registry = deps.registry()?;
    let mut filters = Vec::with_capacity(defs.len());
    for def in defs {
        let handle = registry.create_service(def.clone()).await?;
        let filter = handle.as_filter().ok_or_else(|| SchemaError::Invalid {
            entity: def.tag(),
            reason: format!("expected a filter, got a {}", handle.role()),
        })?;
        filters.push(filter);
    }
    Ok(filters)
}
