//! Login by source user name, and session lookup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::controller::{Controller, ControllerCore, HandlerTable, Permission};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb};
use crate::error::{NotFoundError, RequestError, Result, SchemaError};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceLookup, ServiceMetadata};
use crate::store::Storage;

#[derive(Debug, Clone, Copy)]
enum Action {
    Login,
    Show,
}

pub struct SessionController {
    core: ControllerCore<Action>,
    storage: Arc<dyn Storage>,
}

impl SessionController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new()
            .on("session", CommandVerb::Create, Action::Login)
            .guarded("session", CommandVerb::Get, Action::Show, &[], true);
        Ok(Self {
            core: ControllerCore::new(def, deps, handlers).await?,
            storage: Arc::clone(&deps.storage),
        })
    }

    /// The user named like the sender gets a session on the source listener.
    async fn login(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let source_user = &command.context.source_user;
        let user = self
            .storage
            .find_user_by_name(&source_user.name)
            .await?
            .ok_or_else(|| NotFoundError::new("user", &source_user.name))?;

        let handle = dispatcher
            .registry()
            .get_service(&ServiceLookup::Id(command.context.source.id))
            .await?;
        let listener = handle.as_listener().ok_or_else(|| SchemaError::Invalid {
            entity: handle.metadata().tag(),
            reason: "command source is not a listener".into(),
        })?;

        let session = listener.create_session(&source_user.uid, user).await?;
        self.core
            .reply(
                dispatcher,
                command,
                format!(
                    "logged in as {}, session expires {}",
                    session.user.name, session.expires_at
                ),
            )
            .await
    }

    async fn show(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let user = command
            .context
            .user
            .as_ref()
            .ok_or(RequestError::SessionRequired)?;
        let roles = user.role_names();
        let roles = if roles.is_empty() {
            "none".to_string()
        } else {
            roles.join(", ")
        };
        self.core
            .reply(
                dispatcher,
                command,
                format!("logged in as {}, roles: {roles}", user.name),
            )
            .await
    }
}

impl Service for SessionController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for SessionController {
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
            Action::Login => self.login(&command, dispatcher).await,
            Action::Show => self.show(&command, dispatcher).await,
        }
    }
}
