//! In-process listener. Injected messages come out of `listen`, sent
//! messages are recorded.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::auth::{Session, User};
use crate::entity::{ChannelData, Context, Message, SourceUser};
use crate::error::{ListenerError, Result, TimeoutError};
use crate::listener::{FetchOptions, Listener, ListenerCore, MessageStream};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceEvent, ServiceMetadata};

pub struct LoopbackListener {
    core: ListenerCore,
    sent: RwLock<Vec<Message>>,
    sent_count: watch::Sender<usize>,
    inbox: mpsc::UnboundedSender<Message>,
    outbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl LoopbackListener {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let (inbox, outbox) = mpsc::unbounded_channel();
        Ok(Self {
            core: ListenerCore::new(def, deps)?,
            sent: RwLock::new(Vec::new()),
            sent_count: watch::Sender::new(0),
            inbox,
            outbox: Mutex::new(Some(outbox)),
        })
    }

    /// Text message from `uid` on `channel`, sourced from this listener.
    pub fn message(&self, channel: &str, name: &str, uid: &str, body: &str) -> Result<Message> {
        let context = Context::new(
            self.core.metadata.clone(),
            ChannelData::new(channel),
            SourceUser::new(name, uid),
        )?;
        Ok(Message::text(context, body))
    }

    /// Queue `message` on the stream returned by `listen`.
    pub fn inject(&self, message: Message) -> Result<()> {
        self.inbox.send(message).map_err(|e| {
            ListenerError::SendFailed {
                name: self.core.metadata.tag(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub async fn sent(&self) -> Vec<Message> {
        self.sent.read().await.clone()
    }

    /// Wait until at least `count` messages have been sent.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Result<Vec<Message>> {
        let mut rx = self.sent_count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|sent| *sent >= count))
            .await
            .map_err(|_| TimeoutError {
                operation: format!("wait for {count} sent messages"),
                timeout,
            })?
            .map_err(|e| ListenerError::FetchFailed {
                name: self.core.metadata.tag(),
                reason: e.to_string(),
            })?;
        Ok(self.sent().await)
    }

    pub async fn session_count(&self) -> usize {
        self.core.sessions.len().await
    }
}

#[async_trait]
impl Service for LoopbackListener {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }

    async fn notify(&self, event: ServiceEvent) -> Result<()> {
        self.core.notify(event).await;
        Ok(())
    }
}

#[async_trait]
impl Listener for LoopbackListener {
    fn check(&self, message: &Message) -> bool {
        self.core.check(message)
    }

    async fn send(&self, message: &Message) -> Result<()> {
        debug!(listener = %self.core.metadata.tag(), message_id = %message.id, "Loopback send");
        let count = {
            let mut sent = self.sent.write().await;
            sent.push(message.clone());
            sent.len()
        };
        self.sent_count.send_replace(count);
        Ok(())
    }

    async fn fetch(&self, options: &FetchOptions) -> Result<Vec<Message>> {
        let sent = self.sent.read().await;
        let matching: Vec<Message> = sent
            .iter()
            .filter(|m| {
                options
                    .channel
                    .as_ref()
                    .is_none_or(|channel| &m.context.channel.id == channel)
            })
            .cloned()
            .collect();
        let skip = match options.limit {
            0 => 0,
            limit => matching.len().saturating_sub(limit),
        };
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn create_session(&self, uid: &str, user: User) -> Result<Session> {
        Ok(self.core.create_session(uid, user).await)
    }

    async fn get_session(&self, uid: &str) -> Option<Session> {
        self.core.sessions.get(uid).await
    }

    /// The stream can only be taken once.
    async fn listen(&self) -> Result<Option<MessageStream>> {
        let outbox = self.outbox.lock().await.take().ok_or_else(|| {
            ListenerError::StartupFailed {
                name: self.core.metadata.tag(),
                reason: "already listening".into(),
            }
        })?;
        Ok(Some(Box::pin(UnboundedReceiverStream::new(outbox))))
    }
}
