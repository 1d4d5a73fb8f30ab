//! Places the whole message body into one field.

use async_trait::async_trait;
use serde::Deserialize;

use crate::entity::{Command, CommandData, Context, Fragment, Message, TYPE_TEXT};
use crate::error::Result;
use crate::parser::{Parser, ParserCore};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};

fn default_field() -> String {
    "body".into()
}

#[derive(Debug, Deserialize)]
struct EchoOptions {
    #[serde(default = "default_field")]
    field: String,
}

pub struct EchoParser {
    core: ParserCore,
    field: String,
}

impl EchoParser {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: EchoOptions = def.options()?;
        Ok(Self {
            core: ParserCore::new(def, deps, &[TYPE_TEXT])?,
            field: options.field,
        })
    }
}

impl Service for EchoParser {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Parser for EchoParser {
    fn matches(&self, message: &Message) -> bool {
        self.core.matches(message)
    }

    fn decode(&self, message: &Message) -> Result<CommandData> {
        self.core.check_mime(message)?;
        let body = self.core.strip(&message.body);
        let mut data = CommandData::new();
        if !body.is_empty() {
            data.insert(self.field.clone(), vec![body]);
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
