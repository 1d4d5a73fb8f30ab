//! Accounts end to end: signup, login sessions, seeded administrators and
//! bearer tokens carried on incoming messages.

mod common;

use serde_json::json;

use courier::service::ServiceDefinition;

use common::{Harness, args_parser, controller};

const SESSION_REQUIRED: &str = "a session is required, please log in first";

fn parsers() -> Vec<ServiceDefinition> {
    vec![
        args_parser("signup", "account", "create", json!([])),
        args_parser("login", "session", "create", json!([])),
        args_parser("whoami", "session", "get", json!([])),
        args_parser(
            "token",
            "token",
            "create",
            json!([{"name": "grants", "type": "array", "required": false}]),
        ),
        args_parser("verify", "token", "get", json!([{"name": "token"}])),
        args_parser("revoke", "token", "delete", json!([{"name": "id"}])),
        args_parser(
            "user",
            "user",
            "create",
            json!([{"name": "name"}, {"name": "roles", "type": "array", "required": false}]),
        ),
        args_parser("whois", "user", "get", json!([{"name": "name"}])),
    ]
}

fn controllers() -> Vec<ServiceDefinition> {
    vec![
        controller("session-controller", json!({})),
        controller("token-controller", json!({})),
        controller(
            "user-controller",
            json!({
                "roles": [
                    {"name": "admin", "grants": ["role:*", "user:*", "token:*"]},
                    {"name": "member", "grants": []}
                ],
                "users": [{"name": "root", "roles": ["admin"]}],
                "signup_roles": ["member"]
            }),
        ),
    ]
}

/// Split a `token <id> expires <when>: <raw>` reply into id and raw token.
fn issued(reply: &str) -> (String, String) {
    let id = reply.split_whitespace().nth(1).unwrap().to_string();
    let (_, raw) = reply.rsplit_once(": ").unwrap();
    (id, raw.to_string())
}

#[tokio::test]
async fn signup_then_login_opens_a_session() {
    let harness = Harness::start(parsers(), controllers()).await;

    assert_eq!(harness.ask("bob", "u-bob", "!whoami").await, SESSION_REQUIRED);
    assert_eq!(
        harness.ask("bob", "u-bob", "!signup").await,
        "registered bob, log in to start a session"
    );
    let again = harness.ask("bob", "u-bob", "!signup").await;
    assert!(again.contains("bob is already registered"), "{again}");

    let login = harness.ask("bob", "u-bob", "!login").await;
    assert!(login.starts_with("logged in as bob, session expires"), "{login}");
    assert_eq!(
        harness.ask("bob", "u-bob", "!whoami").await,
        "logged in as bob, roles: member"
    );

    // same name on another account is not bob's session
    assert_eq!(harness.ask("bob", "u-other", "!whoami").await, SESSION_REQUIRED);
    harness.dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn seeded_administrator_runs_granted_commands() {
    let harness = Harness::start(parsers(), controllers()).await;

    harness.ask("bob", "u-bob", "!signup").await;
    harness.ask("bob", "u-bob", "!login").await;
    assert_eq!(
        harness.ask("bob", "u-bob", "!user --name carol").await,
        "permission denied"
    );

    let login = harness.ask("root", "u-root", "!login").await;
    assert!(login.starts_with("logged in as root"), "{login}");
    let created = harness
        .ask("root", "u-root", "!user --name carol --roles member")
        .await;
    assert!(created.starts_with("user carol created with id "), "{created}");
    harness.dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn tokens_are_limited_to_the_issuers_grants() {
    let harness = Harness::start(parsers(), controllers()).await;
    harness.ask("root", "u-root", "!login").await;

    let reply = harness.ask("root", "u-root", "!token --grants user:get").await;
    assert!(reply.starts_with("token "), "{reply}");
    assert_eq!(
        harness.ask("root", "u-root", "!token --grants dice:roll").await,
        "permission denied"
    );
    harness.dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn bearer_token_authenticates_until_revoked() {
    let harness = Harness::start(parsers(), controllers()).await;
    harness.ask("root", "u-root", "!login").await;
    let (id, raw) = issued(&harness.ask("root", "u-root", "!token --grants user:get").await);

    // the token stands in for a session and narrows root's grants
    let whois = harness
        .ask_with_token("eve", "u-eve", &raw, "!whois --name root")
        .await;
    assert!(whois.starts_with("user root ("), "{whois}");
    assert_eq!(
        harness
            .ask_with_token("eve", "u-eve", &raw, "!user --name dave")
            .await,
        "permission denied"
    );
    assert_eq!(
        harness.ask("eve", "u-eve", "!whois --name root").await,
        SESSION_REQUIRED
    );

    let verified = harness
        .ask("eve", "u-eve", &format!("!verify --token {raw}"))
        .await;
    assert!(verified.starts_with(&format!("token {id} is valid until")), "{verified}");

    // only the owner or a token:delete holder may revoke
    harness.ask("bob", "u-bob", "!signup").await;
    harness.ask("bob", "u-bob", "!login").await;
    assert_eq!(
        harness.ask("bob", "u-bob", &format!("!revoke --id {id}")).await,
        "permission denied"
    );
    assert_eq!(
        harness.ask("root", "u-root", &format!("!revoke --id {id}")).await,
        format!("token {id} revoked")
    );

    assert_eq!(
        harness
            .ask("eve", "u-eve", &format!("!verify --token {raw}"))
            .await,
        "invalid token: revoked"
    );
    assert_eq!(
        harness
            .ask_with_token("eve", "u-eve", &raw, "!whois --name root")
            .await,
        SESSION_REQUIRED
    );
    harness.dispatcher.stop().await.unwrap();
}

#[tokio::test]
async fn unreadable_bearer_token_leaves_the_sender_anonymous() {
    let harness = Harness::start(parsers(), controllers()).await;
    harness.ask("root", "u-root", "!login").await;

    // a bad token overrides root's own session rather than falling back to it
    assert_eq!(
        harness
            .ask_with_token("root", "u-root", "not-a-jwt", "!whois --name root")
            .await,
        SESSION_REQUIRED
    );
    harness.dispatcher.stop().await.unwrap();
}
