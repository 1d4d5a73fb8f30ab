//! Parsers turn messages into commands.
//!
//! A parser decodes a message into raw field data, then coerces the
//! fields it declares. When a required field is missing or invalid the
//! partial command is saved as a [`Fragment`] and a `fragment/create`
//! command prompting for that field is returned instead.

pub mod args;
pub mod echo;
pub mod json;
pub mod regex;
pub mod split;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::entity::{
    Command, CommandData, CommandOptions, CommandVerb, Context, Fragment, Labels, Message,
    NOUN_FRAGMENT,
};
use crate::error::{MimeTypeError, Result};
use crate::rules::{MatchDef, MatchRules};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::store::Storage;

#[async_trait]
pub trait Parser: Service {
    /// Whether this parser's rules accept the message.
    fn matches(&self, message: &Message) -> bool;

    /// Raw field data. Unsupported content types are a `MimeTypeError`.
    fn decode(&self, message: &Message) -> Result<CommandData>;

    /// Decode and build: one command, or one `fragment/create` prompt.
    async fn parse(&self, message: &Message) -> Result<Vec<Command>>;

    /// Merge `value` under `fragment.key` and build again.
    async fn complete(
        &self,
        context: &Context,
        fragment: &Fragment,
        value: Vec<String>,
    ) -> Result<Vec<Command>>;
}

/// How a declared field is coerced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Every value is kept.
    Array,
    /// Only the first value is kept.
    #[default]
    String,
    /// Every value must parse as a number.
    Number,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Question asked when the field is missing.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub default: Option<Vec<String>>,
}

/// Command produced on success.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultCommand {
    pub noun: String,
    pub verb: CommandVerb,
    #[serde(default)]
    pub data: CommandData,
    #[serde(default)]
    pub labels: Labels,
}

/// Options every parser accepts.
#[derive(Debug, Clone, Deserialize)]
pub struct ParserOptions {
    #[serde(rename = "match", default)]
    pub rules: MatchDef,
    #[serde(rename = "command")]
    pub default_command: DefaultCommand,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Outcome of coercing decoded data.
enum Coerced {
    Complete(CommandData),
    Incomplete {
        data: CommandData,
        field: FieldDef,
        invalid: bool,
    },
}

/// Shared parser machinery: rules, content types, coercion and fragments.
pub(crate) struct ParserCore {
    pub metadata: ServiceMetadata,
    rules: MatchRules,
    options: ParserOptions,
    mimes: &'static [&'static str],
    storage: Arc<dyn Storage>,
}

impl ParserCore {
    pub fn new(
        def: &ServiceDefinition,
        deps: &ServiceDeps,
        mimes: &'static [&'static str],
    ) -> Result<Self> {
        let options: ParserOptions = def.options()?;
        Ok(Self {
            metadata: ServiceMetadata::from_definition(def),
            rules: MatchRules::compile(&options.rules)?,
            options,
            mimes,
            storage: Arc::clone(&deps.storage),
        })
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self.rules.match_entity(message) {
            Ok(results) => results.matched,
            Err(e) => {
                debug!(parser = %self.metadata.tag(), error = %e, "Could not match message");
                false
            }
        }
    }

    pub fn check_mime(&self, message: &Message) -> std::result::Result<(), MimeTypeError> {
        if self.mimes.contains(&message.mime.as_str()) {
            Ok(())
        } else {
            Err(MimeTypeError {
                service: self.metadata.tag(),
                mime: message.mime.clone(),
            })
        }
    }

    /// Message body with every rule hit removed.
    pub fn strip(&self, body: &str) -> String {
        self.rules.remove_matches(body).trim().to_string()
    }

    pub async fn parse(&self, message: &Message, data: CommandData) -> Result<Vec<Command>> {
        let labels = self.options.default_command.labels.clone();
        self.build(&message.context, data, labels, None).await
    }

    pub async fn complete(
        &self,
        context: &Context,
        fragment: &Fragment,
        value: Vec<String>,
    ) -> Result<Vec<Command>> {
        let mut data = fragment.data.clone();
        data.insert(fragment.key.clone(), value);
        self.build(context, data, fragment.labels.clone(), Some(fragment.id))
            .await
    }

    async fn build(
        &self,
        context: &Context,
        decoded: CommandData,
        labels: Labels,
        fragment_id: Option<Uuid>,
    ) -> Result<Vec<Command>> {
        let mut context = context.clone();
        context.parser = Some(self.metadata.clone());
        let defaults = &self.options.default_command;

        let mut data = defaults.data.clone();
        data.extend(decoded);

        match self.coerce(data) {
            Coerced::Complete(data) => {
                let command = Command::new(CommandOptions {
                    noun: defaults.noun.clone(),
                    verb: defaults.verb,
                    data,
                    labels,
                    context,
                })?;
                debug!(
                    parser = %self.metadata.tag(),
                    noun = command.noun(),
                    verb = %command.verb(),
                    "Parsed command"
                );
                Ok(vec![command])
            }
            Coerced::Incomplete {
                data,
                field,
                invalid,
            } => {
                let fragment = Fragment {
                    id: fragment_id.unwrap_or_else(Uuid::new_v4),
                    key: field.name.clone(),
                    parser_id: self.metadata.id,
                    user_id: context.source_user.uid.clone(),
                    noun: defaults.noun.clone(),
                    verb: defaults.verb,
                    data,
                    labels,
                };
                self.storage.save_fragment(&fragment).await?;

                let msg = prompt(&field, invalid);
                debug!(
                    parser = %self.metadata.tag(),
                    fragment = %fragment.id,
                    key = %fragment.key,
                    "Command incomplete, prompting"
                );
                Ok(vec![fragment_prompt(&fragment, msg, context)?])
            }
        }
    }

    /// Coerce declared fields in order. Undeclared keys pass through.
    fn coerce(&self, mut data: CommandData) -> Coerced {
        for field in &self.options.fields {
            let mut values: Vec<String> = data
                .remove(&field.name)
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty()
                && let Some(default) = &field.default
            {
                values = default.clone();
            }

            if values.is_empty() {
                if field.required {
                    return Coerced::Incomplete {
                        data,
                        field: field.clone(),
                        invalid: false,
                    };
                }
                continue;
            }

            let coerced = match field.kind {
                FieldType::Array => Some(values),
                FieldType::String => values.into_iter().next().map(|v| vec![v]),
                FieldType::Number => values
                    .iter()
                    .all(|v| v.parse::<f64>().is_ok_and(f64::is_finite))
                    .then_some(values),
            };

            match coerced {
                Some(values) => {
                    data.insert(field.name.clone(), values);
                }
                None => {
                    return Coerced::Incomplete {
                        data,
                        field: field.clone(),
                        invalid: true,
                    };
                }
            }
        }
        Coerced::Complete(data)
    }
}

fn prompt(field: &FieldDef, invalid: bool) -> String {
    let base = field
        .prompt
        .clone()
        .unwrap_or_else(|| format!("please provide {}", field.name));
    if invalid {
        format!("{} must be a number, {base}", field.name)
    } else {
        base
    }
}

/// `fragment/create` command asking for the fragment's next key.
fn fragment_prompt(fragment: &Fragment, msg: String, context: Context) -> Result<Command> {
    let mut data = CommandData::new();
    data.insert("id".into(), vec![fragment.id.to_string()]);
    data.insert("key".into(), vec![fragment.key.clone()]);
    data.insert("msg".into(), vec![msg]);
    data.insert("noun".into(), vec![fragment.noun.clone()]);
    data.insert("verb".into(), vec![fragment.verb.to_string()]);
    data.insert("parser".into(), vec![fragment.parser_id.to_string()]);

    Ok(Command::new(CommandOptions {
        noun: NOUN_FRAGMENT.into(),
        verb: CommandVerb::Create,
        data,
        labels: fragment.labels.clone(),
        context,
    })?)
}

/// Whether `command` is a prompt for a missing field.
pub fn is_fragment_prompt(command: &Command) -> bool {
    command.noun() == NOUN_FRAGMENT && command.verb() == CommandVerb::Create
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::message;
    use super::*;
    use crate::store::MemoryStorage;

    fn core(fields: serde_json::Value, storage: Arc<MemoryStorage>) -> ParserCore {
        let mut deps = ServiceDeps::in_memory();
        deps.storage = storage;
        ParserCore::new(
            &ServiceDefinition::new(
                "test-parser",
                "dice",
                json!({
                    "command": {"noun": "roll", "verb": "create"},
                    "fields": fields,
                }),
            ),
            &deps,
            &[crate::entity::TYPE_TEXT],
        )
        .unwrap()
    }

    fn data(pairs: &[(&str, &[&str])]) -> CommandData {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn dice_fields() -> serde_json::Value {
        json!([
            {"name": "count", "type": "number", "prompt": "how many dice?"},
            {"name": "sides", "type": "number"}
        ])
    }

    #[tokio::test]
    async fn complete_data_builds_command() {
        let storage = Arc::new(MemoryStorage::new());
        let core = core(dice_fields(), storage);
        let commands = core
            .parse(&message("2 d6"), data(&[("count", &["2"]), ("sides", &["6"])]))
            .await
            .unwrap();

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].noun(), "roll");
        assert_eq!(commands[0].verb(), CommandVerb::Create);
        assert_eq!(commands[0].get_head("count"), Some("2"));
        assert_eq!(
            commands[0].context.parser.as_ref().map(|p| p.id),
            Some(core.metadata.id)
        );
    }

    #[tokio::test]
    async fn missing_field_saves_fragment() {
        let storage = Arc::new(MemoryStorage::new());
        let core = core(dice_fields(), Arc::clone(&storage));
        let commands = core
            .parse(&message("d6"), data(&[("sides", &["6"])]))
            .await
            .unwrap();

        assert_eq!(commands.len(), 1);
        let prompt = &commands[0];
        assert!(is_fragment_prompt(prompt));
        assert_eq!(prompt.get_head("key"), Some("count"));
        assert_eq!(prompt.get_head("msg"), Some("how many dice?"));
        assert_eq!(prompt.get_head("noun"), Some("roll"));

        let id: Uuid = prompt.parse_head("id").unwrap();
        let fragment = storage.get_fragment(id).await.unwrap().unwrap();
        assert_eq!(fragment.key, "count");
        assert_eq!(fragment.data, data(&[("sides", &["6"])]));
        assert_eq!(fragment.user_id, "u-1");
    }

    #[tokio::test]
    async fn invalid_number_prompts_again() {
        let storage = Arc::new(MemoryStorage::new());
        let core = core(dice_fields(), storage);
        let commands = core
            .parse(&message(""), data(&[("count", &["two"]), ("sides", &["6"])]))
            .await
            .unwrap();
        assert!(is_fragment_prompt(&commands[0]));
        assert_eq!(commands[0].get_head("key"), Some("count"));
        assert!(
            commands[0]
                .get_head("msg")
                .unwrap()
                .starts_with("count must be a number")
        );
    }

    #[tokio::test]
    async fn completion_merges_value_and_keeps_fragment_id() {
        let storage = Arc::new(MemoryStorage::new());
        let core = core(dice_fields(), Arc::clone(&storage));
        let msg = message("");
        let prompt = core.parse(&msg, CommandData::new()).await.unwrap();
        let id: Uuid = prompt[0].parse_head("id").unwrap();

        // count supplied, sides still missing
        let fragment = storage.get_fragment(id).await.unwrap().unwrap();
        let next = core
            .complete(&msg.context, &fragment, vec!["3".into()])
            .await
            .unwrap();
        assert!(is_fragment_prompt(&next[0]));
        assert_eq!(next[0].get_head("id"), Some(id.to_string().as_str()));
        assert_eq!(next[0].get_head("key"), Some("sides"));

        let fragment = storage.get_fragment(id).await.unwrap().unwrap();
        let done = core
            .complete(&msg.context, &fragment, vec!["6".into()])
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].noun(), "roll");
        assert_eq!(done[0].get("count"), Some(&["3".to_string()][..]));
        assert_eq!(done[0].get("sides"), Some(&["6".to_string()][..]));
        assert!(storage.get_fragment(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn coercion_by_type() {
        let storage = Arc::new(MemoryStorage::new());
        let core = core(
            json!([
                {"name": "tags", "type": "array"},
                {"name": "title", "type": "string"},
                {"name": "size", "type": "number", "required": false, "default": ["1"]},
                {"name": "note", "required": false}
            ]),
            storage,
        );
        let commands = core
            .parse(
                &message(""),
                data(&[
                    ("tags", &["a", "b"]),
                    ("title", &["first", "second"]),
                    ("extra", &["kept"]),
                ]),
            )
            .await
            .unwrap();
        let command = &commands[0];
        assert_eq!(command.get("tags").unwrap().len(), 2);
        assert_eq!(command.get("title"), Some(&["first".to_string()][..]));
        assert_eq!(command.get_head("size"), Some("1"));
        assert_eq!(command.get("note"), None);
        assert_eq!(command.get_head("extra"), Some("kept"));
    }

    #[test]
    fn mime_check() {
        let core = core(json!([]), Arc::new(MemoryStorage::new()));
        assert!(core.check_mime(&message("hi")).is_ok());
        let json = super::test_support::message_with_mime("{}", crate::entity::TYPE_JSON);
        assert!(core.check_mime(&json).is_err());
    }
}
