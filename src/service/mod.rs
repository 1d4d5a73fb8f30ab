//! Pluggable service abstraction.
//!
//! Every parser, filter, transform, controller and listener is a service
//! identified by its `kind:name` tag and created through the
//! [`ServiceRegistry`].

pub mod registry;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::controller::Controller;
use crate::error::{Result, SchemaError};
use crate::filter::Filter;
use crate::listener::Listener;
use crate::parser::Parser;
use crate::store::{MemoryStorage, Storage};
use crate::transform::Transform;

pub use registry::{ServiceFactory, ServiceRegistry, builtin_factories};

/// Build the `kind:name` tag used as the registry key.
pub fn service_tag(kind: &str, name: &str) -> String {
    format!("{kind}:{name}")
}

/// Stable identity of a live service. Stored in contexts instead of
/// references to the service itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
}

impl ServiceMetadata {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn from_definition(def: &ServiceDefinition) -> Self {
        Self::new(def.kind.clone(), def.name.clone())
    }

    pub fn tag(&self) -> String {
        service_tag(&self.kind, &self.name)
    }
}

/// Declarative service description: which factory, which instance, and
/// the kind-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl ServiceDefinition {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            data,
        }
    }

    pub fn tag(&self) -> String {
        service_tag(&self.kind, &self.name)
    }

    /// Deserialize `data` into the kind's option struct. Missing data is
    /// treated as an empty object.
    pub fn options<T: DeserializeOwned>(&self) -> std::result::Result<T, SchemaError> {
        let data = match &self.data {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(data).map_err(|e| SchemaError::Invalid {
            entity: self.tag(),
            reason: e.to_string(),
        })
    }
}

/// Lifecycle notifications broadcast by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEvent {
    Start,
    Stop,
    Reset,
    Reload,
    Tick,
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::Reload => "reload",
            Self::Tick => "tick",
        };
        f.write_str(name)
    }
}

/// Behaviour shared by every pluggable unit.
#[async_trait]
pub trait Service: Send + Sync {
    fn metadata(&self) -> &ServiceMetadata;

    /// React to a lifecycle event. Most services ignore them.
    async fn notify(&self, event: ServiceEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Collaborators handed to every factory.
#[derive(Clone)]
pub struct ServiceDeps {
    pub storage: Arc<dyn Storage>,
    pub tokens: Arc<TokenIssuer>,
    pub clock: Arc<dyn Clock>,
    /// Lifetime of sessions created by listeners.
    pub session_ttl: Duration,
    /// Set by the registry; lets composite services create their children.
    pub registry: Weak<ServiceRegistry>,
}

impl ServiceDeps {
    pub fn new(
        storage: Arc<dyn Storage>,
        tokens: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            tokens,
            clock,
            session_ttl,
            registry: Weak::new(),
        }
    }

    /// In-memory storage, the development token config and the wall clock.
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        let tokens = TokenIssuer::new(Arc::new(AuthConfig::dev()), Arc::clone(&clock));
        Self::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(tokens),
            clock,
            Duration::from_secs(3600),
        )
    }

    /// The owning registry, or `Error::Stopped` once it has been dropped.
    pub fn registry(&self) -> Result<Arc<ServiceRegistry>> {
        self.registry.upgrade().ok_or(crate::error::Error::Stopped)
    }
}

/// How to find a live service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceLookup {
    Id(Uuid),
    Tag { kind: String, name: String },
}

impl fmt::Display for ServiceLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Tag { kind, name } => f.write_str(&service_tag(kind, name)),
        }
    }
}

/// A live service of one of the closed set of roles.
#[derive(Clone)]
pub enum ServiceHandle {
    Parser(Arc<dyn Parser>),
    Filter(Arc<dyn Filter>),
    Transform(Arc<dyn Transform>),
    Controller(Arc<dyn Controller>),
    Listener(Arc<dyn Listener>),
}

impl ServiceHandle {
    pub fn metadata(&self) -> &ServiceMetadata {
        match self {
            Self::Parser(s) => s.metadata(),
            Self::Filter(s) => s.metadata(),
            Self::Transform(s) => s.metadata(),
            Self::Controller(s) => s.metadata(),
            Self::Listener(s) => s.metadata(),
        }
    }

    pub async fn notify(&self, event: ServiceEvent) -> Result<()> {
        match self {
            Self::Parser(s) => s.notify(event).await,
            Self::Filter(s) => s.notify(event).await,
            Self::Transform(s) => s.notify(event).await,
            Self::Controller(s) => s.notify(event).await,
            Self::Listener(s) => s.notify(event).await,
        }
    }

    /// Role name, for logs and errors.
    pub fn role(&self) -> &'static str {
        match self {
            Self::Parser(_) => "parser",
            Self::Filter(_) => "filter",
            Self::Transform(_) => "transform",
            Self::Controller(_) => "controller",
            Self::Listener(_) => "listener",
        }
    }

    pub fn as_parser(&self) -> Option<Arc<dyn Parser>> {
        match self {
            Self::Parser(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> Option<Arc<dyn Filter>> {
        match self {
            Self::Filter(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<Arc<dyn Transform>> {
        match self {
            Self::Transform(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn as_controller(&self) -> Option<Arc<dyn Controller>> {
        match self {
            Self::Controller(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn as_listener(&self) -> Option<Arc<dyn Listener>> {
        match self {
            Self::Listener(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.metadata(), other.metadata())
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("role", &self.role())
            .field("tag", &self.metadata().tag())
            .field("id", &self.metadata().id)
            .finish()
    }
}
