//! Where an entity came from and who sent it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Token, User};
use crate::error::ValidationError;
use crate::service::ServiceMetadata;

/// Conversation channel the entity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub id: String,
    #[serde(default)]
    pub thread: Option<String>,
}

impl ChannelData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread: None,
        }
    }
}

/// Sender identity as reported by the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub name: String,
    pub uid: String,
}

impl SourceUser {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }
}

/// Origin of a message or command. Services are referenced by metadata
/// and resolved through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: Uuid,
    pub channel: ChannelData,
    pub source_user: SourceUser,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<Token>,
    pub source: ServiceMetadata,
    #[serde(default)]
    pub target: Option<ServiceMetadata>,
    #[serde(default)]
    pub parser: Option<ServiceMetadata>,
}

impl Context {
    pub fn new(
        source: ServiceMetadata,
        channel: ChannelData,
        source_user: SourceUser,
    ) -> Result<Self, ValidationError> {
        if source_user.uid.trim().is_empty() {
            return Err(ValidationError::MissingValue {
                field: "source_user.uid".into(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            channel,
            source_user,
            user: None,
            token: None,
            source,
            target: None,
            parser: None,
        })
    }

    /// Context for an answer: same channel and sender, routed back to the
    /// source listener.
    pub fn reply(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: Some(self.source.clone()),
            ..self.clone()
        }
    }

    /// Whether this context may act with `required` permissions.
    ///
    /// A token, when attached, must cover them and so must the user's
    /// roles. Without a user only an empty requirement passes.
    pub fn check_grants<S: AsRef<str>>(&self, required: &[S]) -> bool {
        if required.is_empty() {
            return true;
        }
        let Some(user) = &self.user else {
            return false;
        };
        if let Some(token) = &self.token
            && !token.check_grants(required)
        {
            return false;
        }
        user.check_grants(required)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::Role;

    fn context() -> Context {
        Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("alice", "u-1"),
        )
        .unwrap()
    }

    fn admin() -> User {
        User::new(
            "alice",
            vec![Role::new("admin", vec!["admin:*".into()]).unwrap()],
        )
        .unwrap()
    }

    fn token(grants: &[&str]) -> Token {
        let now = Utc::now();
        Token {
            id: Uuid::new_v4(),
            subject: "alice".into(),
            issuer: "courier".into(),
            audience: vec!["courier".into()],
            grants: grants.iter().map(|g| g.to_string()).collect(),
            created_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn empty_uid_is_rejected() {
        let result = Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("alice", ""),
        );
        assert!(matches!(result, Err(ValidationError::MissingValue { .. })));
    }

    #[test]
    fn no_user_only_passes_empty_requirements() {
        let ctx = context();
        assert!(ctx.check_grants::<&str>(&[]));
        assert!(!ctx.check_grants(&["dice:roll"]));
    }

    #[test]
    fn user_grants_apply() {
        let mut ctx = context();
        ctx.user = Some(admin());
        assert!(ctx.check_grants(&["admin:write"]));
        assert!(!ctx.check_grants(&["repo:read"]));
    }

    #[test]
    fn token_narrows_user_grants() {
        let mut ctx = context();
        ctx.user = Some(admin());
        ctx.token = Some(token(&["admin:read"]));
        assert!(ctx.check_grants(&["admin:read"]));
        assert!(!ctx.check_grants(&["admin:write"]));
    }

    #[test]
    fn reply_targets_source() {
        let ctx = context();
        let reply = ctx.reply();
        assert_ne!(reply.id, ctx.id);
        assert_eq!(reply.target.as_ref(), Some(&ctx.source));
        assert_eq!(reply.source_user, ctx.source_user);
    }
}
