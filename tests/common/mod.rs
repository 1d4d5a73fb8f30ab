//! Shared harness for the end-to-end tests: a running dispatcher with one
//! loopback listener the test drives directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};

use courier::config::{DispatcherConfig, ServicesConfig};
use courier::dispatcher::{Dispatcher, DispatcherBuilder};
use courier::entity::{Message, TOKEN_LABEL};
use courier::listener::loopback::LoopbackListener;
use courier::service::{ServiceDefinition, ServiceHandle};
use courier::service::registry::factory;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn body_rule(pattern: &str) -> Value {
    json!({"rules": [{"key": "body", "operator": "any", "values": [{"regexp": pattern}]}]})
}

pub fn echo_parser() -> ServiceDefinition {
    ServiceDefinition::new(
        "echo-parser",
        "echo",
        json!({
            "match": body_rule("^!echo\\s*"),
            "command": {"noun": "echo", "verb": "create"}
        }),
    )
}

/// An args parser for `!<word> --key value` commands.
pub fn args_parser(word: &str, noun: &str, verb: &str, fields: Value) -> ServiceDefinition {
    ServiceDefinition::new(
        "args-parser",
        word,
        json!({
            "match": body_rule(&format!("^!{word}\\b\\s*")),
            "command": {"noun": noun, "verb": verb},
            "fields": fields
        }),
    )
}

pub fn controller(kind: &str, data: Value) -> ServiceDefinition {
    ServiceDefinition::new(kind, "test", data)
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub listener: Arc<LoopbackListener>,
    answered: AtomicUsize,
}

impl Harness {
    pub async fn start(
        parsers: Vec<ServiceDefinition>,
        controllers: Vec<ServiceDefinition>,
    ) -> Self {
        Self::start_with(DispatcherConfig::default(), parsers, controllers).await
    }

    pub async fn start_with(
        config: DispatcherConfig,
        parsers: Vec<ServiceDefinition>,
        controllers: Vec<ServiceDefinition>,
    ) -> Self {
        let slot: Arc<OnceLock<Arc<LoopbackListener>>> = Arc::new(OnceLock::new());
        let captured = Arc::clone(&slot);

        let config = DispatcherConfig {
            services: ServicesConfig {
                listeners: vec![ServiceDefinition::new("test-loopback", "chat", json!({}))],
                parsers,
                controllers,
            },
            ..config
        };
        let dispatcher = DispatcherBuilder::new(config)
            .factory(
                "test-loopback",
                factory(move |def, deps| {
                    let captured = Arc::clone(&captured);
                    async move {
                        let listener = Arc::new(LoopbackListener::new(&def, &deps)?);
                        let _ = captured.set(Arc::clone(&listener));
                        Ok(ServiceHandle::Listener(listener))
                    }
                }),
            )
            .build()
            .await
            .unwrap();
        dispatcher.start().await.unwrap();

        let listener = Arc::clone(slot.get().expect("listener created on start"));
        Self {
            dispatcher,
            listener,
            answered: AtomicUsize::new(0),
        }
    }

    pub fn say(&self, body: &str) {
        self.say_as("alice", "u-1", body);
    }

    pub fn say_as(&self, name: &str, uid: &str, body: &str) {
        let message = self.listener.message("general", name, uid, body).unwrap();
        self.listener.inject(message).unwrap();
    }

    /// Send as `name` and wait for the one reply it produces.
    pub async fn ask(&self, name: &str, uid: &str, body: &str) -> String {
        let message = self.listener.message("general", name, uid, body).unwrap();
        self.ask_message(message).await
    }

    /// Send as `name` carrying a bearer token and wait for the reply.
    pub async fn ask_with_token(&self, name: &str, uid: &str, token: &str, body: &str) -> String {
        let mut message = self.listener.message("general", name, uid, body).unwrap();
        message.labels.insert(TOKEN_LABEL.into(), token.into());
        self.ask_message(message).await
    }

    async fn ask_message(&self, message: Message) -> String {
        let expected = self.answered.fetch_add(1, Ordering::SeqCst) + 1;
        self.listener.inject(message).unwrap();
        let sent = self.listener.wait_for_sent(expected, WAIT).await.unwrap();
        sent[expected - 1].body.clone()
    }

    pub async fn replies(&self, count: usize) -> Vec<String> {
        self.listener
            .wait_for_sent(count, WAIT)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect()
    }
}

pub async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
