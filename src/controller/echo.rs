//! Replies with the command's own data, run through the transforms.

use async_trait::async_trait;
use serde_json::Value;

use crate::controller::{Controller, ControllerCore, HandlerTable, Permission, data_scope};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb};
use crate::error::Result;
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::BODY_KEY;

#[derive(Debug, Clone, Copy)]
enum Action {
    Echo,
}

pub struct EchoController {
    core: ControllerCore<Action>,
}

impl EchoController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new().on("echo", CommandVerb::Create, Action::Echo);
        Ok(Self {
            core: ControllerCore::new(def, deps, handlers).await?,
        })
    }
}

impl Service for EchoController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for EchoController {
    fn nouns(&self) -> &[String] {
        self.core.nouns()
    }

    async fn check(&self, command: &Command) -> bool {
        self.core.check(command).await
    }

    fn permission(&self, command: &Command) -> Option<Permission> {
        self.core.permission(command)
    }

    async fn handle(&self, command: Command, dispatcher: &Dispatcher) -> Result<()> {
        match self.core.action(&command)? {
            Action::Echo => {
                let mut scope = data_scope(&command);
                // several body values are joined unless a transform reshapes them
                if let Some(body) = command.get(BODY_KEY)
                    && body.len() > 1
                {
                    scope.insert(BODY_KEY.into(), Value::String(body.join(" ")));
                }
                self.core.transform_reply(dispatcher, &command, scope).await
            }
        }
    }
}
