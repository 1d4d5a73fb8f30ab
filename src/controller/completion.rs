//! Fragment prompts and completion.
//!
//! `fragment/create` sends the parser's prompt back to the sender.
//! `fragment/update` supplies the missing value: the owning parser builds
//! the next command, which is executed, and the fragment is deleted only
//! once the command is complete and executed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::controller::{Controller, ControllerCore, HandlerTable, Permission};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb, NOUN_FRAGMENT};
use crate::error::{NotFoundError, RequestError, Result, SchemaError};
use crate::parser::is_fragment_prompt;
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceLookup, ServiceMetadata};
use crate::store::Storage;

/// Data key holding the supplied value on `fragment/update`.
pub const VALUE_KEY: &str = "value";

#[derive(Debug, Clone, Copy)]
enum Action {
    Prompt,
    Complete,
}

pub struct CompletionController {
    core: ControllerCore<Action>,
    storage: Arc<dyn Storage>,
}

impl CompletionController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new()
            .on(NOUN_FRAGMENT, CommandVerb::Create, Action::Prompt)
            .on(NOUN_FRAGMENT, CommandVerb::Update, Action::Complete);
        Ok(Self {
            core: ControllerCore::new(def, deps, handlers).await?,
            storage: Arc::clone(&deps.storage),
        })
    }

    async fn prompt(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let msg = command
            .get_head("msg")
            .ok_or_else(|| RequestError::InvalidArgument {
                name: "msg".into(),
                reason: "missing".into(),
            })?;
        self.core.reply(dispatcher, command, msg).await
    }

    async fn complete(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let id: Uuid = command.parse_head("id")?;
        let fragment = self
            .storage
            .get_fragment(id)
            .await?
            // someone else's fragment looks the same as a missing one
            .filter(|f| f.user_id == command.context.source_user.uid)
            .ok_or_else(|| NotFoundError::new("fragment", id))?;

        let value = command
            .get(VALUE_KEY)
            .or_else(|| command.get(&fragment.key))
            .map(<[String]>::to_vec)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RequestError::InvalidArgument {
                name: VALUE_KEY.into(),
                reason: format!("a value for {} is required", fragment.key),
            })?;

        let handle = dispatcher
            .registry()
            .get_service(&ServiceLookup::Id(fragment.parser_id))
            .await?;
        let parser = handle.as_parser().ok_or_else(|| SchemaError::Invalid {
            entity: handle.metadata().tag(),
            reason: "fragment owner is not a parser".into(),
        })?;

        let commands = parser.complete(&command.context, &fragment, value).await?;
        let finished = !commands.iter().any(is_fragment_prompt);
        for next in commands {
            dispatcher.execute_command(next).await?;
        }

        if finished {
            self.storage.delete_fragment(id).await?;
            info!(fragment = %id, "Fragment completed");
        }
        Ok(())
    }
}

impl Service for CompletionController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for CompletionController {
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
            Action::Prompt => self.prompt(&command, dispatcher).await,
            Action::Complete => self.complete(&command, dispatcher).await,
        }
    }
}
