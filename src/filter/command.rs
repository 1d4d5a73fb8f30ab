//! Rule filter over commands.

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{Filter, FilterBehavior, FilterValue, RuleFilterOptions};
use crate::rules::MatchRules;
use crate::service::{Service, ServiceDefinition, ServiceMetadata};

/// Allows commands matching its rules and drops the rest. Messages are
/// ignored.
pub struct CommandFilter {
    metadata: ServiceMetadata,
    rules: MatchRules,
}

impl CommandFilter {
    pub fn new(def: &ServiceDefinition) -> Result<Self> {
        let options: RuleFilterOptions = def.options()?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            rules: options.compile()?,
        })
    }
}

impl Service for CommandFilter {
    fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }
}

#[async_trait]
impl Filter for CommandFilter {
    async fn check(&self, value: FilterValue<'_>) -> Result<FilterBehavior> {
        let FilterValue::Command(command) = value else {
            return Ok(FilterBehavior::Ignore);
        };
        let results = self.rules.match_entity(command)?;
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
    use crate::entity::{
        ChannelData, Command, CommandData, CommandOptions, CommandVerb, Context, Labels, Message,
        SourceUser,
    };

    fn context() -> Context {
        Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("alice", "u-1"),
        )
        .unwrap()
    }

    fn command(noun: &str) -> Command {
        Command::new(CommandOptions {
            noun: noun.into(),
            verb: CommandVerb::Create,
            data: CommandData::new(),
            labels: Labels::new(),
            context: context(),
        })
        .unwrap()
    }

    fn filter() -> CommandFilter {
        CommandFilter::new(&ServiceDefinition::new(
            "command-filter",
            "dice-only",
            json!({"match": {"rules": [
                {"key": "noun", "operator": "any", "values": [{"string": "roll"}]}
            ]}}),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn matching_commands_are_allowed() {
        let filter = filter();
        let roll = command("roll");
        let echo = command("echo");
        assert_eq!(
            filter.check(FilterValue::Command(&roll)).await.unwrap(),
            FilterBehavior::Allow
        );
        assert_eq!(
            filter.check(FilterValue::Command(&echo)).await.unwrap(),
            FilterBehavior::Drop
        );
    }

    #[tokio::test]
    async fn messages_are_ignored() {
        let message = Message::text(context(), "roll");
        assert_eq!(
            filter().check(FilterValue::Message(&message)).await.unwrap(),
            FilterBehavior::Ignore
        );
    }

    #[test]
    fn invalid_pattern_fails_construction() {
        let result = CommandFilter::new(&ServiceDefinition::new(
            "command-filter",
            "broken",
            json!({"match": {"rules": [
                {"key": "noun", "operator": "any", "values": [{"regexp": "("}]}
            ]}}),
        ));
        assert!(result.is_err());
    }
}
