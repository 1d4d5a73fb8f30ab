//! Include/exclude checklist on the sender.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::filter::{Filter, FilterBehavior, FilterValue};
use crate::service::{Service, ServiceDefinition, ServiceMetadata};

#[derive(Debug, Clone, Default, Deserialize)]
struct UserFilterOptions {
    /// When non-empty, only these uids pass.
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Drops entities from excluded senders, or from anyone not on a
/// non-empty include list.
pub struct UserFilter {
    metadata: ServiceMetadata,
    options: UserFilterOptions,
}

impl UserFilter {
    pub fn new(def: &ServiceDefinition) -> Result<Self> {
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            options: def.options()?,
        })
    }
}

impl Service for UserFilter {
    fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }
}

#[async_trait]
impl Filter for UserFilter {
    async fn check(&self, value: FilterValue<'_>) -> Result<FilterBehavior> {
        let uid = &value.context().source_user.uid;
        if self.options.exclude.contains(uid) {
            return Ok(FilterBehavior::Drop);
        }
        if !self.options.include.is_empty() && !self.options.include.contains(uid) {
            return Ok(FilterBehavior::Drop);
        }
        Ok(FilterBehavior::Allow)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::entity::{ChannelData, Context, Message, SourceUser};

    fn message(uid: &str) -> Message {
        let context = Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("someone", uid),
        )
        .unwrap();
        Message::text(context, "hi")
    }

    async fn check(options: Value, uid: &str) -> FilterBehavior {
        let filter =
            UserFilter::new(&ServiceDefinition::new("user-filter", "test", options)).unwrap();
        let message = message(uid);
        filter.check(FilterValue::Message(&message)).await.unwrap()
    }

    #[tokio::test]
    async fn exclude_list() {
        let options = json!({"exclude": ["spammer"]});
        assert_eq!(check(options.clone(), "spammer").await, FilterBehavior::Drop);
        assert_eq!(check(options, "alice").await, FilterBehavior::Allow);
    }

    #[tokio::test]
    async fn include_list() {
        let options = json!({"include": ["alice"]});
        assert_eq!(check(options.clone(), "alice").await, FilterBehavior::Allow);
        assert_eq!(check(options, "bob").await, FilterBehavior::Drop);
    }

    #[tokio::test]
    async fn empty_lists_allow_everyone() {
        assert_eq!(check(Value::Null, "anyone").await, FilterBehavior::Allow);
    }
}
