use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Context, Labels};

pub const TYPE_TEXT: &str = "text/plain";
pub const TYPE_JSON: &str = "application/json";

/// Label carrying a raw bearer token on an incoming message.
pub const TOKEN_LABEL: &str = "token";

/// A chat message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Declared content type of `body`.
    pub mime: String,
    pub body: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub reactions: Vec<String>,
    pub context: Context,
}

impl Message {
    pub fn new(context: Context, mime: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mime: mime.into(),
            body: body.into(),
            labels: Labels::new(),
            reactions: Vec::new(),
            context,
        }
    }

    pub fn text(context: Context, body: impl Into<String>) -> Self {
        Self::new(context, TYPE_TEXT, body)
    }

    /// Answer to `context`, routed back to its source listener.
    pub fn reply(context: &Context, mime: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(context.reply(), mime, body)
    }
}
