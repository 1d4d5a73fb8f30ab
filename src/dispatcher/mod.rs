//! The dispatcher wires listeners, parsers and controllers together.
//!
//! Three streams carry work: incoming messages, commands and outgoing
//! messages. Each stream is an unbounded queue drained by exactly one
//! consumer task, so accepted items are never dropped and items on one
//! stream are processed in order. There is no ordering across streams.
//! Observers get a copy of every item through a bounded broadcast and may
//! lag without affecting delivery.

pub mod ticker;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{Token, TokenIssuer, User};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, DispatcherConfig};
use crate::controller::Controller;
use crate::entity::{Command, Context, Message, TOKEN_LABEL, TYPE_TEXT};
use crate::error::{Error, NotFoundError, RequestError, Result, SchemaError, TokenError};
use crate::listener::{Listener, MessageStream};
use crate::parser::Parser;
use crate::service::{
    ServiceDefinition, ServiceDeps, ServiceEvent, ServiceFactory, ServiceHandle, ServiceLookup,
    ServiceRegistry,
};
use crate::store::{MemoryStorage, Storage};

/// Builds a [`Dispatcher`] and the registry it owns.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    auth: AuthConfig,
    storage: Option<Arc<dyn Storage>>,
    clock: Option<Arc<dyn Clock>>,
    factories: Vec<(String, ServiceFactory)>,
}

impl DispatcherBuilder {
    /// Starts with the development token config, in-memory storage and
    /// the wall clock.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            auth: AuthConfig::dev(),
            storage: None,
            clock: None,
            factories: Vec::new(),
        }
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register an extra service kind next to the built-ins.
    pub fn factory(mut self, kind: impl Into<String>, factory: ServiceFactory) -> Self {
        self.factories.push((kind.into(), factory));
        self
    }

    pub async fn build(self) -> Result<Arc<Dispatcher>> {
        self.auth.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let tokens = TokenIssuer::new(Arc::new(self.auth), Arc::clone(&clock));

        let deps = ServiceDeps::new(
            Arc::clone(&storage),
            Arc::new(tokens),
            clock,
            self.config.session_ttl,
        );
        let registry = ServiceRegistry::with_builtins(deps, self.config.service_timeout);
        for (kind, factory) in self.factories {
            registry.register_factory(kind, factory).await;
        }

        Ok(Arc::new(Dispatcher::new(self.config, registry, storage)))
    }
}

/// Sending half of one stream: the consumer queue plus observers.
#[derive(Clone)]
struct Feed<T> {
    queue: mpsc::UnboundedSender<T>,
    observers: broadcast::Sender<T>,
}

impl<T: Clone> Feed<T> {
    fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let feed = Self {
            queue,
            observers: broadcast::channel(capacity).0,
        };
        (feed, rx)
    }

    /// Queue `item` for the consumer and copy it to any observers.
    fn publish(&self, item: T) -> Result<()> {
        if self.observers.receiver_count() > 0 {
            let _ = self.observers.send(item.clone());
        }
        self.queue.send(item).map_err(|_| Error::Stopped)
    }

    fn subscribe(&self) -> broadcast::Receiver<T> {
        self.observers.subscribe()
    }
}

#[derive(Clone)]
struct Streams {
    incoming: Feed<Message>,
    commands: Feed<Command>,
    outgoing: Feed<Message>,
}

/// Receiving halves, taken by `start`.
struct Queues {
    incoming: mpsc::UnboundedReceiver<Message>,
    commands: mpsc::UnboundedReceiver<Command>,
    outgoing: mpsc::UnboundedReceiver<Message>,
}

/// Counters for work that was dropped rather than failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Messages no parser matched.
    pub unmatched: u64,
    /// Commands no controller accepted.
    pub unhandled: u64,
    /// Outgoing messages no listener accepted.
    pub dead_letters: u64,
}

#[derive(Default)]
struct Counters {
    unmatched: AtomicU64,
    unhandled: AtomicU64,
    dead_letters: AtomicU64,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<ServiceRegistry>,
    storage: Arc<dyn Storage>,
    streams: RwLock<Option<Streams>>,
    queues: Mutex<Option<Queues>>,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    parsers: RwLock<Vec<Arc<dyn Parser>>>,
    controllers: RwLock<Vec<Arc<dyn Controller>>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    /// Listener forwarders and the ticker.
    background: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Dispatcher {
    fn new(
        config: DispatcherConfig,
        registry: Arc<ServiceRegistry>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let capacity = config.stream_capacity.max(1);
        let (incoming, incoming_rx) = Feed::new(capacity);
        let (commands, commands_rx) = Feed::new(capacity);
        let (outgoing, outgoing_rx) = Feed::new(capacity);
        let streams = Streams {
            incoming,
            commands,
            outgoing,
        };
        let queues = Queues {
            incoming: incoming_rx,
            commands: commands_rx,
            outgoing: outgoing_rx,
        };
        Self {
            config,
            registry,
            storage,
            streams: RwLock::new(Some(streams)),
            queues: Mutex::new(Some(queues)),
            listeners: RwLock::new(Vec::new()),
            parsers: RwLock::new(Vec::new()),
            controllers: RwLock::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            counters: Counters::default(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            dead_letters: self.counters.dead_letters.load(Ordering::Relaxed),
        }
    }

    /// Create the configured services, notify `start`, spawn the stream
    /// consumers, attach listener streams and start the ticker.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(dispatcher = %self.config.name, "Dispatcher already started");
            return Ok(());
        }

        let services = &self.config.services;
        let listeners = self
            .create_all(&services.listeners, "listener", ServiceHandle::as_listener)
            .await?;
        let parsers = self
            .create_all(&services.parsers, "parser", ServiceHandle::as_parser)
            .await?;
        let controllers = self
            .create_all(&services.controllers, "controller", ServiceHandle::as_controller)
            .await?;
        *self.listeners.write().await = listeners.clone();
        *self.parsers.write().await = parsers;
        *self.controllers.write().await = controllers;

        self.registry.notify(ServiceEvent::Start).await;

        let queues = self.queues.lock().await.take().ok_or(Error::Stopped)?;
        {
            let mut consumers = self.consumers.lock().await;
            consumers.push(self.spawn_consumer(
                "incoming",
                queues.incoming,
                |dispatcher, message| async move { dispatcher.consume_incoming(message).await },
            ));
            consumers.push(self.spawn_consumer(
                "commands",
                queues.commands,
                |dispatcher, command| async move { dispatcher.consume_command(command).await },
            ));
            consumers.push(self.spawn_consumer(
                "outgoing",
                queues.outgoing,
                |dispatcher, message| async move { dispatcher.consume_outgoing(message).await },
            ));
        }

        let mut background = self.background.lock().await;
        for listener in &listeners {
            if let Some(stream) = listener.listen().await? {
                background.push(self.spawn_forwarder(listener.metadata().tag(), stream));
            }
        }
        if let Some(expression) = &self.config.tick_schedule {
            let schedule = ticker::parse_schedule(expression)?;
            background.push(ticker::spawn_ticker(Arc::clone(&self.registry), schedule));
        }

        info!(
            dispatcher = %self.config.name,
            listeners = listeners.len(),
            parsers = services.parsers.len(),
            controllers = services.controllers.len(),
            "Dispatcher started"
        );
        Ok(())
    }

    /// Queue a message on the incoming stream.
    pub async fn submit(&self, message: Message) -> Result<()> {
        self.streams().await?.incoming.publish(message)
    }

    /// Resolve the sender's session, run every matching parser and
    /// execute the resulting commands. Returns the commands that were
    /// executed; one failing command does not hold back the others.
    pub async fn receive(&self, mut message: Message) -> Result<Vec<Command>> {
        self.ensure_running()?;
        self.authenticate(&mut message).await;
        self.storage.save_message(&message).await?;

        let parsers = self.parsers.read().await.clone();
        let mut matched = false;
        let mut commands = Vec::new();
        for parser in parsers {
            if !parser.matches(&message) {
                continue;
            }
            matched = true;
            match parser.parse(&message).await {
                Ok(parsed) => commands.extend(parsed),
                Err(Error::MimeType(e)) => {
                    debug!(
                        parser = %parser.metadata().tag(),
                        reason = %e,
                        "Parser declined message"
                    );
                }
                Err(e) => {
                    warn!(
                        parser = %parser.metadata().tag(),
                        message_id = %message.id,
                        error = %e,
                        "Parser failed"
                    );
                }
            }
        }

        if !matched {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            info!(
                message_id = %message.id,
                channel = %message.context.channel.id,
                "No parser matched message"
            );
            return Ok(Vec::new());
        }

        let mut executed = Vec::with_capacity(commands.len());
        for command in commands {
            match self.execute_command(command.clone()).await {
                Ok(()) => executed.push(command),
                Err(Error::Stopped) => return Err(Error::Stopped),
                Err(e) => {
                    warn!(
                        command_id = %command.id,
                        noun = command.noun(),
                        error = %e,
                        "Failed to execute command"
                    );
                }
            }
        }
        Ok(executed)
    }

    /// Persist a command and queue it for the controllers.
    pub async fn execute_command(&self, command: Command) -> Result<()> {
        let streams = self.streams().await?;
        self.storage.save_command(&command).await?;
        debug!(
            command_id = %command.id,
            noun = command.noun(),
            verb = %command.verb(),
            "Executing command"
        );
        streams.commands.publish(command)
    }

    /// Persist a message and queue it for delivery.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        let streams = self.streams().await?;
        self.storage.save_message(&message).await?;
        streams.outgoing.publish(message)
    }

    pub async fn subscribe_incoming(&self) -> Result<broadcast::Receiver<Message>> {
        Ok(self.streams().await?.incoming.subscribe())
    }

    pub async fn subscribe_commands(&self) -> Result<broadcast::Receiver<Command>> {
        Ok(self.streams().await?.commands.subscribe())
    }

    pub async fn subscribe_outgoing(&self) -> Result<broadcast::Receiver<Message>> {
        Ok(self.streams().await?.outgoing.subscribe())
    }

    /// Close the streams, wait for the consumers to finish and stop the
    /// registry. Later calls fail with `Error::Stopped`.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(Error::Stopped);
        }

        for task in self.background.lock().await.drain(..) {
            task.abort();
        }
        drop(self.streams.write().await.take());

        let consumers: Vec<JoinHandle<()>> = self.consumers.lock().await.drain(..).collect();
        let aborts: Vec<_> = consumers.iter().map(JoinHandle::abort_handle).collect();
        let drained = futures::future::join_all(consumers);
        if tokio::time::timeout(self.config.stop_timeout, drained)
            .await
            .is_err()
        {
            warn!(
                dispatcher = %self.config.name,
                timeout = ?self.config.stop_timeout,
                "Stream consumers did not finish in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        self.registry.stop().await;
        info!(dispatcher = %self.config.name, "Dispatcher stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }

    async fn streams(&self) -> Result<Streams> {
        self.ensure_running()?;
        self.streams.read().await.clone().ok_or(Error::Stopped)
    }

    async fn create_all<T: ?Sized>(
        &self,
        defs: &[ServiceDefinition],
        role: &str,
        cast: fn(&ServiceHandle) -> Option<Arc<T>>,
    ) -> Result<Vec<Arc<T>>> {
        let mut services = Vec::with_capacity(defs.len());
        for def in defs {
            let handle = self.registry.create_service(def.clone()).await?;
            let service = cast(&handle).ok_or_else(|| SchemaError::Invalid {
                entity: def.tag(),
                reason: format!("expected a {role}, got a {}", handle.role()),
            })?;
            services.push(service);
        }
        Ok(services)
    }

    /// Attach the sender's identity. A bearer token label takes precedence
    /// over the listener session and is removed from the message. A token
    /// that fails verification leaves the message anonymous.
    async fn authenticate(&self, message: &mut Message) {
        let Some(raw) = message.labels.remove(TOKEN_LABEL) else {
            self.resolve_session(&mut message.context).await;
            return;
        };
        match self.verify_bearer(&raw).await {
            Ok((token, user)) => {
                debug!(
                    message_id = %message.id,
                    token_id = %token.id,
                    user = %user.name,
                    "Bearer token accepted"
                );
                message.context.user = Some(user);
                message.context.token = Some(token);
            }
            Err(e) => {
                info!(message_id = %message.id, error = %e, "Bearer token rejected");
                message.context.user = None;
                message.context.token = None;
            }
        }
    }

    /// Verify a raw token, require it to still be stored and load its
    /// subject.
    async fn verify_bearer(&self, raw: &str) -> Result<(Token, User)> {
        let token = self.registry.deps().tokens.verify(raw, None)?;
        if self.storage.get_token(token.id).await?.is_none() {
            return Err(TokenError::Invalid("revoked".into()).into());
        }
        let user_id: Uuid = token
            .subject
            .parse()
            .map_err(|_| TokenError::Invalid("subject is not a user id".into()))?;
        let user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| NotFoundError::new("user", &token.subject))?;
        Ok((token, user))
    }

    /// Attach the user of the sender's session, unless the listener
    /// already set one.
    async fn resolve_session(&self, context: &mut Context) {
        if context.user.is_some() {
            return;
        }
        let listener = self
            .registry
            .get_service(&ServiceLookup::Id(context.source.id))
            .await
            .ok()
            .and_then(|handle| handle.as_listener());
        let Some(listener) = listener else {
            debug!(source = %context.source.tag(), "Message source is not a live listener");
            return;
        };
        if let Some(session) = listener.get_session(&context.source_user.uid).await {
            context.user = Some(session.user);
        }
    }

    fn spawn_consumer<T, F, Fut>(
        self: &Arc<Self>,
        stream: &'static str,
        mut rx: mpsc::UnboundedReceiver<T>,
        handle: F,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: Fn(Arc<Self>, T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                handle(Arc::clone(&dispatcher), item).await;
            }
            debug!(stream, "Stream consumer finished");
        })
    }

    fn spawn_forwarder(
        self: &Arc<Self>,
        listener: String,
        mut stream: MessageStream,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                if let Err(e) = dispatcher.submit(message).await {
                    debug!(listener = %listener, error = %e, "Stopped forwarding listener stream");
                    break;
                }
            }
            debug!(listener = %listener, "Listener stream ended");
        })
    }

    async fn consume_incoming(&self, message: Message) {
        let message_id = message.id;
        match self.receive(message).await {
            Ok(commands) => {
                debug!(message_id = %message_id, commands = commands.len(), "Message processed");
            }
            Err(Error::Stopped) => {
                debug!(message_id = %message_id, "Dispatcher stopped, message dropped");
            }
            Err(e) => warn!(message_id = %message_id, error = %e, "Failed to process message"),
        }
    }

    /// The first controller whose check passes handles the command.
    async fn consume_command(&self, command: Command) {
        let controllers = self.controllers.read().await.clone();
        for controller in controllers {
            if controller.check(&command).await {
                self.dispatch(controller.as_ref(), command).await;
                return;
            }
        }
        self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
        warn!(
            command_id = %command.id,
            noun = command.noun(),
            verb = %command.verb(),
            "No controller accepted command"
        );
    }

    /// Authorize, then run the handler. Refusals and user-facing errors
    /// become replies.
    async fn dispatch(&self, controller: &dyn Controller, command: Command) {
        let tag = controller.metadata().tag();
        let refusal = match controller.permission(&command) {
            None => Some(format!("no handler for {} {}", command.verb(), command.noun())),
            Some(permission) if permission.require_user && command.context.user.is_none() => {
                Some(RequestError::SessionRequired.to_string())
            }
            Some(permission) if !command.context.check_grants(&permission.grants) => Some(
                RequestError::PermissionDenied {
                    required: permission.grants,
                }
                .to_string(),
            ),
            Some(_) => None,
        };
        if let Some(reason) = refusal {
            info!(controller = %tag, command_id = %command.id, reason = %reason, "Command refused");
            self.reply(&command, reason).await;
            return;
        }

        match controller.handle(command.clone(), self).await {
            Ok(()) => debug!(controller = %tag, command_id = %command.id, "Command handled"),
            Err(Error::Stopped) => {
                debug!(
                    controller = %tag,
                    command_id = %command.id,
                    "Dispatcher stopped during handler"
                );
            }
            Err(e) => match e.reply_text() {
                Some(text) => {
                    info!(
                        controller = %tag,
                        command_id = %command.id,
                        error = %e,
                        "Command rejected"
                    );
                    self.reply(&command, text).await;
                }
                None => {
                    error!(
                        controller = %tag,
                        command_id = %command.id,
                        error = %e,
                        "Handler failed"
                    );
                }
            },
        }
    }

    async fn reply(&self, command: &Command, body: String) {
        let message = Message::reply(&command.context, TYPE_TEXT, body);
        if let Err(e) = self.send_message(message).await {
            debug!(command_id = %command.id, error = %e, "Reply dropped");
        }
    }

    /// Deliver to the context target when set, else to the first listener
    /// that accepts the message.
    async fn consume_outgoing(&self, message: Message) {
        let listener = match &message.context.target {
            Some(target) => self
                .registry
                .get_service(&ServiceLookup::Id(target.id))
                .await
                .ok()
                .and_then(|handle| handle.as_listener()),
            None => {
                let listeners = self.listeners.read().await.clone();
                listeners.into_iter().find(|listener| listener.check(&message))
            }
        };

        let Some(listener) = listener else {
            self.counters.dead_letters.fetch_add(1, Ordering::Relaxed);
            warn!(
                message_id = %message.id,
                target = ?message.context.target.as_ref().map(|t| t.tag()),
                "Dead letter: no listener for outgoing message"
            );
            return;
        };

        if let Err(e) = listener.send(&message).await {
            warn!(
                listener = %listener.metadata().tag(),
                message_id = %message.id,
                error = %e,
                "Failed to deliver message"
            );
        }
    }
}
