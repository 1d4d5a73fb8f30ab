//! Entities flowing through the dispatcher.

pub mod command;
pub mod context;
pub mod fragment;
pub mod message;

use std::collections::BTreeMap;

pub use command::{Command, CommandData, CommandExtension, CommandOptions, CommandVerb};
pub use context::{ChannelData, Context, SourceUser};
pub use fragment::{Fragment, NOUN_FRAGMENT};
pub use message::{Message, TOKEN_LABEL, TYPE_JSON, TYPE_TEXT};

/// Free-form string labels attached to commands, messages and fragments.
pub type Labels = BTreeMap<String, String>;
