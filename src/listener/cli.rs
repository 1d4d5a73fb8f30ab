//! CLI listener: stdin/stdout REPL for local use.

use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::{Session, User};
use crate::entity::{ChannelData, Context, Message, SourceUser, TOKEN_LABEL};
use crate::error::Result;
use crate::listener::{FetchOptions, Listener, ListenerCore, MessageStream};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceEvent, ServiceMetadata};

fn default_user() -> String {
    "local-user".into()
}

fn default_channel() -> String {
    "cli".into()
}

#[derive(Debug, Deserialize)]
struct CliOptions {
    /// Name and uid of the person at the terminal.
    #[serde(default = "default_user")]
    user: String,
    #[serde(default = "default_channel")]
    channel: String,
    /// Bearer token attached to every line.
    #[serde(default)]
    token: Option<String>,
}

/// Who is typing, and where their lines are attributed.
#[derive(Debug, Clone)]
struct Terminal {
    source: ServiceMetadata,
    user: String,
    channel: String,
    token: Option<String>,
}

impl Terminal {
    fn message(&self, line: String) -> Result<Message> {
        let context = Context::new(
            self.source.clone(),
            ChannelData::new(self.channel.as_str()),
            SourceUser::new(self.user.as_str(), self.user.as_str()),
        )?;
        let mut message = Message::text(context, line);
        if let Some(token) = &self.token {
            message.labels.insert(TOKEN_LABEL.into(), token.clone());
        }
        Ok(message)
    }
}

pub struct CliListener {
    core: ListenerCore,
    terminal: Terminal,
}

impl CliListener {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let core = ListenerCore::new(def, deps)?;
        let options: CliOptions = def.options()?;
        let terminal = Terminal {
            source: core.metadata.clone(),
            user: options.user,
            channel: options.channel,
            token: options.token,
        };
        Ok(Self { core, terminal })
    }
}

#[async_trait]
impl Service for CliListener {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }

    async fn notify(&self, event: ServiceEvent) -> Result<()> {
        self.core.notify(event).await;
        Ok(())
    }
}

#[async_trait]
impl Listener for CliListener {
    fn check(&self, message: &Message) -> bool {
        self.core.check(message)
    }

    async fn send(&self, message: &Message) -> Result<()> {
        println!("\n{}\n", message.body);
        eprint!("> ");
        Ok(())
    }

    /// The terminal keeps no history.
    async fn fetch(&self, _options: &FetchOptions) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn create_session(&self, uid: &str, user: User) -> Result<Session> {
        Ok(self.core.create_session(uid, user).await)
    }

    async fn get_session(&self, uid: &str) -> Option<Session> {
        self.core.sessions.get(uid).await
    }

    async fn listen(&self) -> Result<Option<MessageStream>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!(error = %e, "Error reading stdin");
                        break;
                    }
                }
            }
        });

        let terminal = self.terminal.clone();
        let stream = stream::unfold(rx, move |mut rx| {
            let terminal = terminal.clone();
            async move {
                loop {
                    let line = rx.recv().await?;
                    match terminal.message(line) {
                        Ok(message) => return Some((message, rx)),
                        Err(e) => tracing::warn!(error = %e, "Dropping terminal line"),
                    }
                }
            }
        });

        Ok(Some(Box::pin(stream)))
    }
}
