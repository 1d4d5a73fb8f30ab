use std::sync::Arc;

use anyhow::Context as _;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;

use courier::config::{Config, ServicesConfig};
use courier::dispatcher::DispatcherBuilder;
use courier::logging;
use courier::service::ServiceDefinition;
use courier::store::{LibSqlStorage, MemoryStorage, Storage};

/// A body regexp match rule for parser definitions.
fn body_rule(pattern: &str) -> serde_json::Value {
    json!({"rules": [{"key": "body", "operator": "any", "values": [{"regexp": pattern}]}]})
}

/// An args parser for `!<word> --key value` account commands.
fn account_parser(
    word: &str,
    noun: &str,
    verb: &str,
    fields: serde_json::Value,
) -> ServiceDefinition {
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

/// Name of the person at the terminal, seeded as an administrator.
const TERMINAL_USER: &str = "local-user";

/// Services used when no services file is configured: a terminal
/// listener, dice and echo commands, fragment completion and the account
/// controllers.
fn default_services(cli_token: Option<&SecretString>) -> ServicesConfig {
    let mut terminal = json!({"user": TERMINAL_USER});
    if let Some(token) = cli_token {
        terminal["token"] = json!(token.expose_secret());
    }
    ServicesConfig {
        listeners: vec![ServiceDefinition::new("cli-listener", "terminal", terminal)],
        parsers: vec![
            ServiceDefinition::new(
                "regex-parser",
                "dice",
                json!({
                    "match": body_rule("^roll\\s*"),
                    "pattern": "(?P<count>\\d+)?\\s*d(?P<sides>\\d+)",
                    "command": {"noun": "roll", "verb": "create"},
                    "fields": [
                        {"name": "count", "type": "number", "prompt": "how many dice?"},
                        {"name": "sides", "type": "number", "prompt": "how many sides?"}
                    ]
                }),
            ),
            ServiceDefinition::new(
                "split-parser",
                "complete",
                json!({
                    "match": body_rule("^!complete\\s*"),
                    "command": {"noun": "fragment", "verb": "update"},
                    "fields": [{"name": "id"}, {"name": "value"}]
                }),
            ),
            ServiceDefinition::new(
                "echo-parser",
                "echo",
                json!({
                    "match": body_rule("^!echo\\s*"),
                    "command": {"noun": "echo", "verb": "create"}
                }),
            ),
            account_parser("signup", "account", "create", json!([])),
            account_parser("login", "session", "create", json!([])),
            account_parser("whoami", "session", "get", json!([])),
            account_parser(
                "token",
                "token",
                "create",
                json!([{"name": "grants", "type": "array", "required": false}]),
            ),
            account_parser("verify", "token", "get", json!([{"name": "token"}])),
            account_parser("revoke", "token", "delete", json!([{"name": "id"}])),
            account_parser(
                "role",
                "role",
                "create",
                json!([{"name": "name"}, {"name": "grants", "type": "array"}]),
            ),
            account_parser(
                "user",
                "user",
                "create",
                json!([{"name": "name"}, {"name": "roles", "type": "array", "required": false}]),
            ),
            account_parser("whois", "user", "get", json!([{"name": "name"}])),
        ],
        controllers: vec![
            ServiceDefinition::new("completion-controller", "fragments", json!({})),
            ServiceDefinition::new("dice-controller", "dice", json!({})),
            ServiceDefinition::new("echo-controller", "echo", json!({})),
            ServiceDefinition::new("session-controller", "sessions", json!({})),
            ServiceDefinition::new("token-controller", "tokens", json!({})),
            ServiceDefinition::new(
                "user-controller",
                "users",
                json!({
                    "roles": [
                        {"name": "admin", "grants": ["role:*", "user:*", "token:*"]},
                        {"name": "member", "grants": []}
                    ],
                    "users": [{"name": TERMINAL_USER, "roles": ["admin"]}],
                    "signup_roles": ["member"]
                }),
            ),
        ],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::from_env().context("failed to read configuration")?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    let storage: Arc<dyn Storage> = match &config.db_path {
        Some(path) => Arc::new(
            LibSqlStorage::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?,
        ),
        None => Arc::new(MemoryStorage::new()),
    };

    let services = &config.dispatcher.services;
    if services.listeners.is_empty()
        && services.parsers.is_empty()
        && services.controllers.is_empty()
    {
        info!("No services file configured, using the default terminal setup");
        config.dispatcher.services = default_services(config.cli_token.as_ref());
    }

    let dispatcher = DispatcherBuilder::new(config.dispatcher)
        .auth(config.auth)
        .storage(storage)
        .build()
        .await?;
    dispatcher.start().await?;
    info!(
        db = ?config.db_path,
        "Courier running. Try `roll 2d6`, `!echo hi`, `!signup` or `!login`. Ctrl-C to exit."
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutting down");
    dispatcher.stop().await?;
    Ok(())
}
