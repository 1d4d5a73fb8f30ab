//! Role and user administration, and self-service signup.
//!
//! Roles and users listed in the controller options are seeded into
//! storage on construction when missing, so a fresh install has someone
//! able to log in and grant further access.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::auth::{Role, User};
use crate::controller::{Controller, ControllerCore, HandlerTable, Permission};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb};
use crate::error::{NotFoundError, RequestError, Result, ValidationError};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::store::Storage;

#[derive(Debug, Clone, Copy)]
enum Action {
    CreateRole,
    GetRole,
    CreateUser,
    GetUser,
    Signup,
}

#[derive(Debug, Clone, Deserialize)]
struct RoleDef {
    name: String,
    #[serde(default)]
    grants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UserDef {
    name: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UserOptions {
    #[serde(default)]
    roles: Vec<RoleDef>,
    #[serde(default)]
    users: Vec<UserDef>,
    /// Roles given to users created through `account/create`.
    #[serde(default)]
    signup_roles: Vec<String>,
}

pub struct UserController {
    core: ControllerCore<Action>,
    storage: Arc<dyn Storage>,
    signup_roles: Vec<String>,
}

fn name(command: &Command) -> Result<&str> {
    command
        .get_head("name")
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            RequestError::InvalidArgument {
                name: "name".into(),
                reason: "missing".into(),
            }
            .into()
        })
}

/// Every value under `key`, split on whitespace. Commas belong to grant
/// syntax and are kept.
fn list(command: &Command, key: &str) -> Vec<String> {
    command
        .get(key)
        .unwrap_or_default()
        .iter()
        .flat_map(|v| v.split_whitespace())
        .map(String::from)
        .collect()
}

impl UserController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new()
            .guarded("role", CommandVerb::Create, Action::CreateRole, &["role:create"], true)
            .guarded("role", CommandVerb::Get, Action::GetRole, &["role:get"], true)
            .guarded("user", CommandVerb::Create, Action::CreateUser, &["user:create"], true)
            .guarded("user", CommandVerb::Get, Action::GetUser, &["user:get"], true)
            .on("account", CommandVerb::Create, Action::Signup);
        let options: UserOptions = def.options()?;
        let controller = Self {
            core: ControllerCore::new(def, deps, handlers).await?,
            storage: Arc::clone(&deps.storage),
            signup_roles: options.signup_roles.clone(),
        };
        controller.seed(&options).await?;
        Ok(controller)
    }

    /// Save configured roles and users that storage does not have yet.
    async fn seed(&self, options: &UserOptions) -> Result<()> {
        for def in &options.roles {
            if self.storage.get_role(&def.name).await?.is_none() {
                let role = Role::new(def.name.as_str(), def.grants.clone())?;
                self.storage.save_role(&role).await?;
                info!(role = %role.name, "Seeded role");
            }
        }
        for def in &options.users {
            if self.storage.find_user_by_name(&def.name).await?.is_none() {
                let user = User::new(def.name.as_str(), self.load_roles(&def.roles).await?)?;
                self.storage.save_user(&user).await?;
                info!(user = %user.name, "Seeded user");
            }
        }
        Ok(())
    }

    async fn load_roles(&self, names: &[String]) -> Result<Vec<Role>> {
        let mut roles = Vec::with_capacity(names.len());
        for name in names {
            let role = self
                .storage
                .get_role(name)
                .await?
                .ok_or_else(|| NotFoundError::new("role", name))?;
            roles.push(role);
        }
        Ok(roles)
    }

    /// Register the sender under their source user name with the signup
    /// roles. Names are taken once.
    async fn signup(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let name = &command.context.source_user.name;
        if self.storage.find_user_by_name(name).await?.is_some() {
            return Err(ValidationError::InvalidValue {
                field: "name".into(),
                reason: format!("{name} is already registered"),
            }
            .into());
        }

        let user = User::new(name.as_str(), self.load_roles(&self.signup_roles).await?)?;
        self.storage.save_user(&user).await?;
        info!(user = %user.name, user_id = %user.id, "User signed up");
        self.core
            .reply(
                dispatcher,
                command,
                format!("registered {}, log in to start a session", user.name),
            )
            .await
    }

    async fn create_role(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let role = Role::new(name(command)?, list(command, "grants"))?;
        self.storage.save_role(&role).await?;
        info!(role = %role.name, grants = ?role.grants, "Role saved");
        self.core
            .reply(dispatcher, command, format!("role {} saved", role.name))
            .await
    }

    async fn get_role(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let name = name(command)?;
        let role = self
            .storage
            .get_role(name)
            .await?
            .ok_or_else(|| NotFoundError::new("role", name))?;
        self.core
            .reply(
                dispatcher,
                command,
                format!("role {}: {}", role.name, role.grants.join(", ")),
            )
            .await
    }

    async fn create_user(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let roles = self.load_roles(&list(command, "roles")).await?;
        let user = User::new(name(command)?, roles)?;
        self.storage.save_user(&user).await?;
        info!(user = %user.name, user_id = %user.id, "User created");
        self.core
            .reply(
                dispatcher,
                command,
                format!("user {} created with id {}", user.name, user.id),
            )
            .await
    }

    async fn get_user(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let name = name(command)?;
        let user = self
            .storage
            .find_user_by_name(name)
            .await?
            .ok_or_else(|| NotFoundError::new("user", name))?;
        self.core
            .reply(
                dispatcher,
                command,
                format!(
                    "user {} ({}), roles: {}",
                    user.name,
                    user.id,
                    user.role_names().join(", ")
                ),
            )
            .await
    }
}

impl Service for UserController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for UserController {
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
            Action::CreateRole => self.create_role(&command, dispatcher).await,
            Action::GetRole => self.get_role(&command, dispatcher).await,
            Action::CreateUser => self.create_user(&command, dispatcher).await,
            Action::GetUser => self.get_user(&command, dispatcher).await,
            Action::Signup => self.signup(&command, dispatcher).await,
        }
    }
}
