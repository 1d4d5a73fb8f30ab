//! Rule filter over messages.

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{Filter, FilterBehavior, FilterValue, RuleFilterOptions};
use crate::rules::MatchRules;
use crate::service::{Service, ServiceDefinition, ServiceMetadata};

/// Allows messages matching its rules and drops the rest. Commands are
/// ignored.
pub struct MessageFilter {
    metadata: ServiceMetadata,
    rules: MatchRules,
}

impl MessageFilter {
    pub fn new(def: &ServiceDefinition) -> Result<Self> {
        let options: RuleFilterOptions = def.options()?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            rules: options.compile()?,
        })
    }
}

impl Service for MessageFilter {
    fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }
}

#[async_trait]
impl Filter for MessageFilter {
    async fn check(&self, value: FilterValue<'_>) -> Result<FilterBehavior> {
        let FilterValue::Message(message) = value else {
            return Ok(FilterBehavior::Ignore);
        };
        let results = self.rules.match_entity(message)?;
        Ok(if results.matched {
            FilterBehavior::Allow
        } else {
            FilterBehavior::Drop
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entity::{ChannelData, Context, Message, SourceUser};

    fn message(body: &str, channel: &str) -> Message {
        let context = Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new(channel),
            SourceUser::new("alice", "u-1"),
        )
        .unwrap();
        Message::text(context, body)
    }

    #[tokio::test]
    async fn channel_rule() {
        let filter = MessageFilter::new(&ServiceDefinition::new(
            "message-filter",
            "no-random",
            json!({"match": {"rules": [{
                "key": "context.channel.id",
                "operator": "any",
                "negate": true,
                "values": [{"string": "random"}]
            }]}}),
        ))
        .unwrap();

        let general = message("hi", "general");
        let random = message("hi", "random");
        assert_eq!(
            filter.check(FilterValue::Message(&general)).await.unwrap(),
            FilterBehavior::Allow
        );
        assert_eq!(
            filter.check(FilterValue::Message(&random)).await.unwrap(),
            FilterBehavior::Drop
        );
    }
}
