//! Controllers handle commands.
//!
//! Each controller claims a set of nouns and resolves `(noun, verb)` to a
//! handler through a [`HandlerTable`] built once at construction. The
//! dispatcher asks for the handler's [`Permission`] and authorizes the
//! command before `handle` runs.

pub mod completion;
pub mod dice;
pub mod echo;
pub mod session;
pub mod token;
pub mod user;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb, Message, TYPE_TEXT};
use crate::error::{NotFoundError, Result, ValidationError};
use crate::filter::{Filter, FilterValue, check_filters, create_filters};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::{Scope, Transform, apply_transforms, create_transforms, extract_body};

/// What a handler requires of the command's context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permission {
    pub grants: Vec<String>,
    pub require_user: bool,
}

#[async_trait]
pub trait Controller: Service {
    fn nouns(&self) -> &[String];

    /// Noun accepted and the filter chain passes.
    async fn check(&self, command: &Command) -> bool;

    /// Requirements of the handler for `command`, `None` when there is no
    /// handler.
    fn permission(&self, command: &Command) -> Option<Permission>;

    async fn handle(&self, command: Command, dispatcher: &Dispatcher) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HandlerEntry<A> {
    pub action: A,
    pub permission: Permission,
}

/// `(noun, verb)` → handler.
#[derive(Debug, Clone)]
pub struct HandlerTable<A> {
    entries: HashMap<(String, CommandVerb), HandlerEntry<A>>,
}

impl<A: Copy> HandlerTable<A> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Handler open to anyone.
    pub fn on(self, noun: &str, verb: CommandVerb, action: A) -> Self {
        self.guarded(noun, verb, action, &[], false)
    }

    /// Handler that needs `grants`, and optionally a logged-in user.
    pub fn guarded(
        mut self,
        noun: &str,
        verb: CommandVerb,
        action: A,
        grants: &[&str],
        require_user: bool,
    ) -> Self {
        self.entries.insert(
            (noun.to_string(), verb),
            HandlerEntry {
                action,
                permission: Permission {
                    grants: grants.iter().map(|g| g.to_string()).collect(),
                    require_user,
                },
            },
        );
        self
    }

    /// Replace the grants of configured handlers. Keys are `noun/verb`.
    pub fn with_grants(
        mut self,
        overrides: &BTreeMap<String, Vec<String>>,
    ) -> std::result::Result<Self, ValidationError> {
        for (key, grants) in overrides {
            let entry = key
                .split_once('/')
                .and_then(|(noun, verb)| {
                    let verb: CommandVerb = verb.parse().ok()?;
                    self.entries.get_mut(&(noun.to_string(), verb))
                })
                .ok_or_else(|| ValidationError::InvalidValue {
                    field: "grants".into(),
                    reason: format!("no handler for {key}"),
                })?;
            entry.permission.grants = grants.clone();
        }
        Ok(self)
    }

    pub fn resolve(&self, command: &Command) -> Option<&HandlerEntry<A>> {
        self.entries
            .get(&(command.noun().to_string(), command.verb()))
    }

    /// Every noun with at least one handler, sorted.
    pub fn nouns(&self) -> Vec<String> {
        let mut nouns: Vec<String> = self.entries.keys().map(|(noun, _)| noun.clone()).collect();
        nouns.sort();
        nouns.dedup();
        nouns
    }
}

impl<A: Copy> Default for HandlerTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Options every controller accepts.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ControllerOptions {
    #[serde(default)]
    pub filters: Vec<ServiceDefinition>,
    #[serde(default)]
    pub transforms: Vec<ServiceDefinition>,
    /// Grant overrides keyed `noun/verb`.
    #[serde(default)]
    pub grants: BTreeMap<String, Vec<String>>,
}

/// Identity, handlers, filters and transforms shared by the built-in
/// controllers.
pub(crate) struct ControllerCore<A> {
    pub metadata: ServiceMetadata,
    handlers: HandlerTable<A>,
    nouns: Vec<String>,
    filters: Vec<Arc<dyn Filter>>,
    transforms: Vec<Arc<dyn Transform>>,
}

impl<A: Copy + Send + Sync> ControllerCore<A> {
    pub async fn new(
        def: &ServiceDefinition,
        deps: &ServiceDeps,
        handlers: HandlerTable<A>,
    ) -> Result<Self> {
        let options: ControllerOptions = def.options()?;
        let handlers = handlers.with_grants(&options.grants)?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            nouns: handlers.nouns(),
            handlers,
            filters: create_filters(deps, &options.filters).await?,
            transforms: create_transforms(deps, &options.transforms).await?,
        })
    }

    pub fn nouns(&self) -> &[String] {
        &self.nouns
    }

    pub async fn check(&self, command: &Command) -> bool {
        self.nouns.iter().any(|noun| noun == command.noun())
            && check_filters(&self.filters, FilterValue::Command(command)).await
    }

    pub fn permission(&self, command: &Command) -> Option<Permission> {
        self.handlers
            .resolve(command)
            .map(|entry| entry.permission.clone())
    }

    pub fn action(&self, command: &Command) -> Result<A> {
        self.handlers
            .resolve(command)
            .map(|entry| entry.action)
            .ok_or_else(|| {
                NotFoundError::new("handler", format!("{}/{}", command.noun(), command.verb()))
                    .into()
            })
    }

    /// Plain text reply to the command's sender.
    pub async fn reply(
        &self,
        dispatcher: &Dispatcher,
        command: &Command,
        body: impl Into<String>,
    ) -> Result<()> {
        let message = Message::reply(&command.context, TYPE_TEXT, body);
        debug!(
            controller = %self.metadata.tag(),
            command_id = %command.id,
            message_id = %message.id,
            "Replying"
        );
        dispatcher.send_message(message).await
    }

    /// Run the transform chain over `scope` and reply with its body.
    pub async fn transform_reply(
        &self,
        dispatcher: &Dispatcher,
        command: &Command,
        scope: Scope,
    ) -> Result<()> {
        let scope =
            apply_transforms(&self.transforms, FilterValue::Command(command), TYPE_TEXT, scope)
                .await?;
        let body = extract_body(&scope)?;
        self.reply(dispatcher, command, body).await
    }
}

/// Command data as a transform scope: each key maps to its values.
pub(crate) fn data_scope(command: &Command) -> Scope {
    command
        .data
        .iter()
        .map(|(key, values)| {
            let values = values.iter().cloned().map(Value::String).collect();
            (key.clone(), Value::Array(values))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChannelData, CommandData, CommandOptions, Context, Labels, SourceUser};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Action {
        Read,
        Write,
    }

    fn command(noun: &str, verb: CommandVerb) -> Command {
        let mut data = CommandData::new();
        data.insert("name".into(), vec!["a".into(), "b".into()]);
        Command::new(CommandOptions {
            noun: noun.into(),
            verb,
            data,
            labels: Labels::new(),
            context: Context::new(
                ServiceMetadata::new("loopback-listener", "test"),
                ChannelData::new("general"),
                SourceUser::new("alice", "u-1"),
            )
            .unwrap(),
        })
        .unwrap()
    }

    fn table() -> HandlerTable<Action> {
        HandlerTable::new()
            .on("doc", CommandVerb::Get, Action::Read)
            .guarded("doc", CommandVerb::Update, Action::Write, &["doc:write"], true)
            .on("page", CommandVerb::Get, Action::Read)
    }

    #[test]
    fn resolves_by_noun_and_verb() {
        let table = table();
        let entry = table.resolve(&command("doc", CommandVerb::Update)).unwrap();
        assert_eq!(entry.action, Action::Write);
        assert_eq!(entry.permission.grants, vec!["doc:write"]);
        assert!(entry.permission.require_user);

        assert!(table.resolve(&command("doc", CommandVerb::Delete)).is_none());
        assert_eq!(table.nouns(), vec!["doc", "page"]);
    }

    #[test]
    fn grant_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("doc/get".to_string(), vec!["doc:read".to_string()]);
        let table = table().with_grants(&overrides).unwrap();
        let entry = table.resolve(&command("doc", CommandVerb::Get)).unwrap();
        assert_eq!(entry.permission.grants, vec!["doc:read"]);
        assert!(!entry.permission.require_user);

        overrides.insert("doc/delete".to_string(), vec![]);
        assert!(table.with_grants(&overrides).is_err());
    }

    #[test]
    fn data_becomes_scope_arrays() {
        let scope = data_scope(&command("doc", CommandVerb::Get));
        assert_eq!(scope["name"], serde_json::json!(["a", "b"]));
    }
}
