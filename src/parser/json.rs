//! Parser for `application/json` messages holding one object.

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{Command, CommandData, Context, Fragment, Message, TYPE_JSON};
use crate::error::{Result, SchemaError};
use crate::parser::{Parser, ParserCore};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::flatten::display_value;

pub struct JsonParser {
    core: ParserCore,
}

impl JsonParser {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        Ok(Self {
            core: ParserCore::new(def, deps, &[TYPE_JSON])?,
        })
    }
}

/// Object members become fields. Arrays keep each item, nulls are
/// skipped and nested objects are kept as JSON text.
fn object_data(body: &str) -> std::result::Result<CommandData, SchemaError> {
    let Value::Object(object) = serde_json::from_str::<Value>(body)? else {
        return Err(SchemaError::Invalid {
            entity: "message".into(),
            reason: "json body must be an object".into(),
        });
    };

    let mut data = CommandData::new();
    for (key, value) in object {
        let values: Vec<String> = match value {
            Value::Null => continue,
            Value::Array(items) => items
                .iter()
                .filter(|item| !item.is_null())
                .map(display_value)
                .collect(),
            other => vec![display_value(&other)],
        };
        data.insert(key, values);
    }
    Ok(data)
}

impl Service for JsonParser {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Parser for JsonParser {
    fn matches(&self, message: &Message) -> bool {
        self.core.matches(message)
    }

    fn decode(&self, message: &Message) -> Result<CommandData> {
        self.core.check_mime(message)?;
        Ok(object_data(&message.body)?)
    }

    async fn parse(&self, message: &Message) -> Result<Vec<Command>> {
        let data = self.decode(message)?;
        self.core.parse(message, data).await
    }

    async fn complete(
        &self,
        context: &Context,
        fragment: &Fragment,
        value: Vec<String>,
    ) -> Result<Vec<Command>> {
        self.core.complete(context, fragment, value).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::parser::test_support::{message, message_with_mime};

    fn parser() -> JsonParser {
        JsonParser::new(
            &ServiceDefinition::new(
                "json-parser",
                "api",
                json!({
                    "command": {"noun": "roll", "verb": "create"},
                    "fields": [
                        {"name": "count", "type": "number"},
                        {"name": "sides", "type": "number"}
                    ]
                }),
            ),
            &ServiceDeps::in_memory(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn object_members_become_fields() {
        let msg = message_with_mime(
            r#"{"count": 2, "sides": "20", "tags": ["a", null, 1]}"#,
            TYPE_JSON,
        );
        let commands = parser().parse(&msg).await.unwrap();
        let command = &commands[0];
        assert_eq!(command.get_head("count"), Some("2"));
        assert_eq!(command.get_head("sides"), Some("20"));
        assert_eq!(command.get("tags").unwrap(), &["a", "1"]);
    }

    #[test]
    fn non_object_is_schema_error() {
        let msg = message_with_mime("[1, 2]", TYPE_JSON);
        assert!(matches!(parser().decode(&msg), Err(Error::Schema(_))));
    }

    #[test]
    fn plain_text_is_declined() {
        assert!(matches!(
            parser().decode(&message("{}")),
            Err(Error::MimeType(_))
        ));
    }
}
