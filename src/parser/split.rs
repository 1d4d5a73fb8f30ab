//! Positional parser: body tokens fill the declared fields in order.

use async_trait::async_trait;
use serde::Deserialize;

use crate::entity::{Command, CommandData, Context, Fragment, Message, TYPE_TEXT};
use crate::error::Result;
use crate::parser::{Parser, ParserCore};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};

/// Key collecting tokens beyond the declared fields.
pub const REST_KEY: &str = "rest";

#[derive(Debug, Default, Deserialize)]
struct SplitOptions {
    /// Token separator. Whitespace when unset.
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    fields: Vec<SplitField>,
}

#[derive(Debug, Deserialize)]
struct SplitField {
    name: String,
}

pub struct SplitParser {
    core: ParserCore,
    separator: Option<String>,
    positions: Vec<String>,
}

impl SplitParser {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: SplitOptions = def.options()?;
        Ok(Self {
            core: ParserCore::new(def, deps, &[TYPE_TEXT])?,
            separator: options.separator.filter(|s| !s.is_empty()),
            positions: options.fields.into_iter().map(|f| f.name).collect(),
        })
    }

    fn tokens(&self, body: &str) -> Vec<String> {
        let tokens: Vec<&str> = match &self.separator {
            Some(separator) => body.split(separator.as_str()).collect(),
            None => body.split_whitespace().collect(),
        };
        tokens
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

impl Service for SplitParser {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Parser for SplitParser {
    fn matches(&self, message: &Message) -> bool {
        self.core.matches(message)
    }

    fn decode(&self, message: &Message) -> Result<CommandData> {
        self.core.check_mime(message)?;
        let mut tokens = self.tokens(&self.core.strip(&message.body)).into_iter();

        let mut data = CommandData::new();
        for name in &self.positions {
            match tokens.next() {
                Some(token) => {
                    data.insert(name.clone(), vec![token]);
                }
                None => break,
            }
        }
        let rest: Vec<String> = tokens.collect();
        if !rest.is_empty() {
            data.insert(REST_KEY.into(), rest);
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
