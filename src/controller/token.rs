//! Token issue, verification and revocation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::controller::{Controller, ControllerCore, HandlerTable, Permission};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb};
use crate::error::{NotFoundError, RequestError, Result, TokenError};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::store::Storage;

/// Grant that allows revoking other users' tokens.
pub const GRANT_REVOKE_ANY: &str = "token:delete";

#[derive(Debug, Clone, Copy)]
enum Action {
    Issue,
    Verify,
    Revoke,
}

pub struct TokenController {
    core: ControllerCore<Action>,
    storage: Arc<dyn Storage>,
    tokens: Arc<TokenIssuer>,
}

impl TokenController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new()
            .guarded("token", CommandVerb::Create, Action::Issue, &[], true)
            .on("token", CommandVerb::Get, Action::Verify)
            .guarded("token", CommandVerb::Delete, Action::Revoke, &[], true);
        Ok(Self {
            core: ControllerCore::new(def, deps, handlers).await?,
            storage: Arc::clone(&deps.storage),
            tokens: Arc::clone(&deps.tokens),
        })
    }

    /// Issue a token carrying the requested grants, all of which the user
    /// must already hold. No request means all of the user's grants.
    async fn issue(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let user = command
            .context
            .user
            .as_ref()
            .ok_or(RequestError::SessionRequired)?;

        let requested: Vec<String> = command
            .get("grants")
            .map(|grants| {
                grants
                    .iter()
                    .flat_map(|g| g.split_whitespace())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| user.grants());

        let missing: Vec<String> = requested
            .iter()
            .filter(|grant| !user.check_grants(&[grant.as_str()]))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RequestError::PermissionDenied { required: missing }.into());
        }

        let (token, raw) = self.tokens.issue(&user.id.to_string(), requested)?;
        self.storage.save_token(&token).await?;
        info!(token_id = %token.id, user = %user.name, "Token issued");

        self.core
            .reply(
                dispatcher,
                command,
                format!("token {} expires {}: {raw}", token.id, token.expires_at),
            )
            .await
    }

    /// Signature and claims must verify and the token must not be revoked.
    async fn verify(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let raw = command
            .get_head("token")
            .ok_or_else(|| RequestError::InvalidArgument {
                name: "token".into(),
                reason: "missing".into(),
            })?;
        let token = self.tokens.verify(raw, None)?;
        if self.storage.get_token(token.id).await?.is_none() {
            return Err(TokenError::Invalid("revoked".into()).into());
        }

        let grants = if token.grants.is_empty() {
            "none".to_string()
        } else {
            token.grants.join(", ")
        };
        self.core
            .reply(
                dispatcher,
                command,
                format!(
                    "token {} is valid until {}, grants: {grants}",
                    token.id, token.expires_at
                ),
            )
            .await
    }

    /// Users may revoke their own tokens; others need `token:delete`.
    async fn revoke(&self, command: &Command, dispatcher: &Dispatcher) -> Result<()> {
        let user = command
            .context
            .user
            .as_ref()
            .ok_or(RequestError::SessionRequired)?;
        let id: Uuid = command.parse_head("id")?;
        let token = self
            .storage
            .get_token(id)
            .await?
            .ok_or_else(|| NotFoundError::new("token", id))?;

        let owned = token.subject == user.id.to_string();
        if !owned && !command.context.check_grants(&[GRANT_REVOKE_ANY]) {
            return Err(RequestError::PermissionDenied {
                required: vec![GRANT_REVOKE_ANY.into()],
            }
            .into());
        }

        self.storage.delete_token(id).await?;
        info!(token_id = %id, user = %user.name, "Token revoked");
        self.core
            .reply(dispatcher, command, format!("token {id} revoked"))
            .await
    }
}

impl Service for TokenController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for TokenController {
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
            Action::Issue => self.issue(&command, dispatcher).await,
            Action::Verify => self.verify(&command, dispatcher).await,
            Action::Revoke => self.revoke(&command, dispatcher).await,
        }
    }
}
