//! Listeners are message sources and sinks.
//!
//! A listener may produce a stream of incoming messages, delivers
//! outgoing ones, and owns the sessions of the users talking through it.

pub mod cli;
pub mod loopback;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;

use crate::auth::{Session, SessionStore, User};
use crate::entity::Message;
use crate::error::{ConfigError, Result};
use crate::rules::{MatchDef, MatchRules};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceEvent, ServiceMetadata};

/// Stream of incoming messages from a listener.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Which past messages to fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Restrict to one channel.
    pub channel: Option<String>,
    /// Most recent N. Zero means all.
    pub limit: usize,
}

#[async_trait]
pub trait Listener: Service {
    /// Whether this listener will deliver `message`.
    fn check(&self, message: &Message) -> bool;

    async fn send(&self, message: &Message) -> Result<()>;

    async fn fetch(&self, options: &FetchOptions) -> Result<Vec<Message>>;

    async fn create_session(&self, uid: &str, user: User) -> Result<Session>;

    async fn get_session(&self, uid: &str) -> Option<Session>;

    /// Incoming messages, for listeners that produce them.
    async fn listen(&self) -> Result<Option<MessageStream>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListenerOptions {
    #[serde(rename = "match", default)]
    rules: MatchDef,
}

/// Identity, delivery rules and sessions shared by the built-in listeners.
pub(crate) struct ListenerCore {
    pub metadata: ServiceMetadata,
    rules: MatchRules,
    pub sessions: SessionStore,
}

impl ListenerCore {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let options: ListenerOptions = def.options()?;
        let ttl =
            chrono::Duration::from_std(deps.session_ttl).map_err(|e| ConfigError::InvalidValue {
                key: "session ttl".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            rules: MatchRules::compile(&options.rules)?,
            sessions: SessionStore::new(ttl, deps.clock.clone()),
        })
    }

    /// No rules accepts everything.
    pub fn check(&self, message: &Message) -> bool {
        match self.rules.match_entity(message) {
            Ok(results) => results.matched,
            Err(e) => {
                tracing::debug!(
                    listener = %self.metadata.tag(),
                    error = %e,
                    "Could not match message"
                );
                false
            }
        }
    }

    pub async fn notify(&self, event: ServiceEvent) {
        if event == ServiceEvent::Tick {
            let pruned = self.sessions.prune_expired().await;
            if pruned > 0 {
                tracing::debug!(listener = %self.metadata.tag(), pruned, "Pruned expired sessions");
            }
        }
    }

    pub async fn create_session(&self, uid: &str, user: User) -> Session {
        let session = self.sessions.create(uid, user).await;
        tracing::info!(
            listener = %self.metadata.tag(),
            uid,
            user = %session.user.name,
            expires_at = %session.expires_at,
            "Session created"
        );
        session
    }
}
