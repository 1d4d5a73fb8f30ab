//! Command-line style parser: `--key value`, `--key=value`, bare
//! `--flag` and positional words.

use async_trait::async_trait;

use crate::entity::{Command, CommandData, Context, Fragment, Message, TYPE_TEXT};
use crate::error::{Result, ValidationError};
use crate::parser::{Parser, ParserCore};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};

/// Key collecting positional words.
pub const POSITIONAL_KEY: &str = "_";

pub struct ArgsParser {
    core: ParserCore,
}

impl ArgsParser {
    pub fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        Ok(Self {
            core: ParserCore::new(def, deps, &[TYPE_TEXT])?,
        })
    }
}

/// Split on whitespace, honouring single and double quotes.
fn tokenize(input: &str) -> std::result::Result<Vec<String>, ValidationError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ValidationError::InvalidValue {
            field: "body".into(),
            reason: "unterminated quote".into(),
        });
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_args(tokens: Vec<String>) -> CommandData {
    let mut data = CommandData::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let Some(flag) = token.strip_prefix("--").filter(|f| !f.is_empty()) else {
            data.entry(POSITIONAL_KEY.into()).or_default().push(token);
            continue;
        };

        let (key, value) = match flag.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => {
                let takes_value = iter.peek().is_some_and(|next| !next.starts_with("--"));
                let value = if takes_value {
                    iter.next().unwrap_or_default()
                } else {
                    "true".to_string()
                };
                (flag.to_string(), value)
            }
        };
        data.entry(key).or_default().push(value);
    }
    data
}

impl Service for ArgsParser {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Parser for ArgsParser {
    fn matches(&self, message: &Message) -> bool {
        self.core.matches(message)
    }

    fn decode(&self, message: &Message) -> Result<CommandData> {
        self.core.check_mime(message)?;
        let tokens = tokenize(&self.core.strip(&message.body))?;
        Ok(parse_args(tokens))
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
    use crate::parser::test_support::message;

    fn parser() -> ArgsParser {
        ArgsParser::new(
            &ServiceDefinition::new(
                "args-parser",
                "todo",
                json!({"command": {"noun": "todo", "verb": "create"}}),
            ),
            &ServiceDeps::in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn quotes_group_words() {
        let tokens = tokenize(r#"--title "buy milk" --note='two  spaces' plain"#).unwrap();
        assert_eq!(
            tokens,
            vec!["--title", "buy milk", "--note=two  spaces", "plain"]
        );
        assert_eq!(tokenize("\"\"").unwrap(), vec![""]);
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn flags_values_and_positionals() {
        let tokens = tokenize("first --due=tomorrow --urgent --tag a --tag b second").unwrap();
        let data = parse_args(tokens);
        assert_eq!(data["due"], vec!["tomorrow"]);
        assert_eq!(data["urgent"], vec!["true"]);
        assert_eq!(data["tag"], vec!["a", "b"]);
        assert_eq!(data[POSITIONAL_KEY], vec!["first", "second"]);
    }

    #[test]
    fn trailing_flag_is_true() {
        let data = parse_args(tokenize("--verbose").unwrap());
        assert_eq!(data["verbose"], vec!["true"]);
    }

    #[tokio::test]
    async fn parse_builds_command() {
        let commands = parser()
            .parse(&message("--title groceries"))
            .await
            .unwrap();
        assert_eq!(commands[0].get_head("title"), Some("groceries"));
    }

    #[tokio::test]
    async fn unterminated_quote_is_rejected() {
        let err = parser().parse(&message("--title \"oops")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
