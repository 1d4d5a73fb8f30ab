//! Named capture groups become fields.

use ::regex::Regex;
use async_trait::async_trait;
use serde::Deserialize;

use crate::entity::{Command, CommandData, Context, Fragment, Message, TYPE_TEXT};
use crate::error::{Result, SchemaError};
use crate::parser::{Parser, ParserCore};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};

#[derive(Debug, Deserialize)]
struct RegexOptions {
    pattern: String,
}

pub struct RegexParser {
    core: ParserCore,
    pattern: Regex,
}

impl RegexParser {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: RegexOptions = def.options()?;
        let pattern = Regex::new(&options.pattern).map_err(SchemaError::from)?;
        Ok(Self {
            core: ParserCore::new(def, deps, &[TYPE_TEXT])?,
            pattern,
        })
    }
}

impl Service for RegexParser {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Parser for RegexParser {
    fn matches(&self, message: &Message) -> bool {
        self.core.matches(message)
    }

    /// Every match contributes one value per participating named group.
    fn decode(&self, message: &Message) -> Result<CommandData> {
        self.core.check_mime(message)?;
        let body = self.core.strip(&message.body);

        let mut data = CommandData::new();
        for captures in self.pattern.captures_iter(&body) {
            for name in self.pattern.capture_names().flatten() {
                if let Some(value) = captures.name(name)
                    && !value.as_str().is_empty()
                {
                    data.entry(name.to_string())
                        .or_default()
                        .push(value.as_str().to_string());
                }
            }
        }
        Ok(data)
    }

    async fn parse(&self, message: &Message) -> Result<Vec<Command>> {
        let data = self.decode(message)?;
        self.core.parse(message, data).await
    }

    async fn complete(
        &self,
        context: &Context,
        fragment: &Fragment,
        value: Vec<String>,
    ) -> Result<Vec<Command>> {
        self.core.complete(context, fragment, value).await
    }
}
