//! Commands: the structured form of a user request.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Context, Labels};
use crate::error::{RequestError, ValidationError};

/// Field name → values, in key order.
pub type CommandData = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    Create,
    Get,
    List,
    Update,
    Delete,
    Watch,
    Help,
}

impl CommandVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::List => "list",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Watch => "watch",
            Self::Help => "help",
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandVerb {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "get" => Ok(Self::Get),
            "list" => Ok(Self::List),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "watch" => Ok(Self::Watch),
            "help" => Ok(Self::Help),
            _ => Err(ValidationError::InvalidValue {
                field: "verb".into(),
                reason: format!("unknown verb {s:?}"),
            }),
        }
    }
}

/// Everything needed to build a [`Command`].
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub noun: String,
    pub verb: CommandVerb,
    pub data: CommandData,
    pub labels: Labels,
    pub context: Context,
}

/// Changes applied by [`Command::extend`]. Noun and verb may only repeat
/// the current values.
#[derive(Debug, Clone, Default)]
pub struct CommandExtension {
    pub noun: Option<String>,
    pub verb: Option<CommandVerb>,
    pub data: CommandData,
    pub labels: Labels,
}

#[derive(Deserialize)]
struct CommandRecord {
    id: Uuid,
    noun: String,
    verb: CommandVerb,
    #[serde(default)]
    data: CommandData,
    #[serde(default)]
    labels: Labels,
    context: Context,
}

impl TryFrom<CommandRecord> for Command {
    type Error = ValidationError;

    fn try_from(record: CommandRecord) -> Result<Self, Self::Error> {
        let mut command = Command::new(CommandOptions {
            noun: record.noun,
            verb: record.verb,
            data: record.data,
            labels: record.labels,
            context: record.context,
        })?;
        command.id = record.id;
        Ok(command)
    }
}

/// A request routed by `(noun, verb)`. Noun and verb never change once
/// the command exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommandRecord")]
pub struct Command {
    pub id: Uuid,
    noun: String,
    verb: CommandVerb,
    pub data: CommandData,
    pub labels: Labels,
    pub context: Context,
}

impl Command {
    pub fn new(options: CommandOptions) -> Result<Self, ValidationError> {
        let noun = options.noun.trim().to_string();
        if noun.is_empty() {
            return Err(ValidationError::MissingValue {
                field: "noun".into(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            noun,
            verb: options.verb,
            data: options.data,
            labels: options.labels,
            context: options.context,
        })
    }

    pub fn noun(&self) -> &str {
        &self.noun
    }

    pub fn verb(&self) -> CommandVerb {
        self.verb
    }

    /// Copy with merged data and labels under a new id.
    pub fn extend(&self, extension: CommandExtension) -> Result<Self, ValidationError> {
        if let Some(noun) = extension.noun
            && noun != self.noun
        {
            return Err(ValidationError::ImmutableField {
                field: "noun",
                current: self.noun.clone(),
                attempted: noun,
            });
        }
        if let Some(verb) = extension.verb
            && verb != self.verb
        {
            return Err(ValidationError::ImmutableField {
                field: "verb",
                current: self.verb.to_string(),
                attempted: verb.to_string(),
            });
        }

        let mut data = self.data.clone();
        data.extend(extension.data);
        let mut labels = self.labels.clone();
        labels.extend(extension.labels);

        Ok(Self {
            id: Uuid::new_v4(),
            noun: self.noun.clone(),
            verb: self.verb,
            data,
            labels,
            context: self.context.clone(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// First value for `key`.
    pub fn get_head(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// First value for `key`, parsed. Missing or unparsable values are
    /// invalid arguments.
    pub fn parse_head<T>(&self, key: &str) -> Result<T, RequestError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self
            .get_head(key)
            .ok_or_else(|| RequestError::InvalidArgument {
                name: key.to_string(),
                reason: "missing".into(),
            })?;
        raw.trim().parse().map_err(|e: T::Err| RequestError::InvalidArgument {
            name: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChannelData, SourceUser};
    use crate::service::ServiceMetadata;

    fn context() -> Context {
        Context::new(
            ServiceMetadata::new("loopback-listener", "test"),
            ChannelData::new("general"),
            SourceUser::new("alice", "u-1"),
        )
        .unwrap()
    }

    fn command() -> Command {
        let mut data = CommandData::new();
        data.insert("count".into(), vec!["2".into()]);
        data.insert("sides".into(), vec!["6".into()]);
        Command::new(CommandOptions {
            noun: "roll".into(),
            verb: CommandVerb::Create,
            data,
            labels: Labels::new(),
            context: context(),
        })
        .unwrap()
    }

    #[test]
    fn empty_noun_is_rejected() {
        let result = Command::new(CommandOptions {
            noun: "  ".into(),
            verb: CommandVerb::Get,
            data: CommandData::new(),
            labels: Labels::new(),
            context: context(),
        });
        assert!(matches!(result, Err(ValidationError::MissingValue { .. })));
    }

    #[test]
    fn empty_extension_preserves_noun_and_verb() {
        let original = command();
        let extended = original.extend(CommandExtension::default()).unwrap();
        assert_eq!(extended.noun(), "roll");
        assert_eq!(extended.verb(), CommandVerb::Create);
        assert_eq!(extended.data, original.data);
        assert_ne!(extended.id, original.id);
    }

    #[test]
    fn extension_cannot_change_noun_or_verb() {
        let original = command();
        let noun = original.extend(CommandExtension {
            noun: Some("echo".into()),
            ..Default::default()
        });
        assert!(matches!(
            noun,
            Err(ValidationError::ImmutableField { field: "noun", .. })
        ));

        let verb = original.extend(CommandExtension {
            verb: Some(CommandVerb::Delete),
            ..Default::default()
        });
        assert!(matches!(
            verb,
            Err(ValidationError::ImmutableField { field: "verb", .. })
        ));

        let same = original.extend(CommandExtension {
            noun: Some("roll".into()),
            verb: Some(CommandVerb::Create),
            ..Default::default()
        });
        assert!(same.is_ok());
    }

    #[test]
    fn extension_merges_data() {
        let mut data = CommandData::new();
        data.insert("count".into(), vec!["4".into()]);
        data.insert("bonus".into(), vec!["1".into()]);
        let extended = command()
            .extend(CommandExtension {
                data,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(extended.get_head("count"), Some("4"));
        assert_eq!(extended.get_head("sides"), Some("6"));
        assert_eq!(extended.get("bonus"), Some(&["1".to_string()][..]));
    }

    #[test]
    fn parse_head_reports_invalid_arguments() {
        let command = command();
        assert_eq!(command.parse_head::<u32>("count").unwrap(), 2);
        assert!(matches!(
            command.parse_head::<u32>("missing"),
            Err(RequestError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn verbs_parse_and_display() {
        assert_eq!("Update".parse::<CommandVerb>().unwrap(), CommandVerb::Update);
        assert_eq!(CommandVerb::Watch.to_string(), "watch");
        assert!("launch".parse::<CommandVerb>().is_err());
    }

    #[test]
    fn deserialize_validates_noun() {
        let mut value = serde_json::to_value(command()).unwrap();
        let round: Command = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(round.noun(), "roll");

        value["noun"] = serde_json::json!("");
        assert!(serde_json::from_value::<Command>(value).is_err());
    }
}
