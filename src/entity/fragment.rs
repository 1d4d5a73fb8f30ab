use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{CommandData, CommandVerb, Labels};

/// Noun of the commands that prompt for and complete fragments.
pub const NOUN_FRAGMENT: &str = "fragment";

/// A partially built command waiting for the field named by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    /// Next field to ask for.
    pub key: String,
    /// Parser that started the command.
    pub parser_id: Uuid,
    /// Source uid of the sender. Only they may complete it.
    pub user_id: String,
    pub noun: String,
    pub verb: CommandVerb,
    pub data: CommandData,
    #[serde(default)]
    pub labels: Labels,
}
