//! Dice rolls: `roll/create` with `count` and `sides`.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};

use crate::controller::{Controller, ControllerCore, HandlerTable, Permission, data_scope};
use crate::dispatcher::Dispatcher;
use crate::entity::{Command, CommandVerb};
use crate::error::{RequestError, Result};
use crate::service::{Service, ServiceDefinition, ServiceDeps, ServiceMetadata};
use crate::transform::BODY_KEY;

const MAX_COUNT: u32 = 100;
const MAX_SIDES: u32 = 1000;

#[derive(Debug, Clone, Copy)]
enum Action {
    Roll,
}

pub struct DiceController {
    core: ControllerCore<Action>,
}

impl DiceController {
    pub async fn new(def: &ServiceDefinition, deps: &ServiceDeps) -> Result<Self> {
        let handlers = HandlerTable::new().on("roll", CommandVerb::Create, Action::Roll);
        Ok(Self {
            core: ControllerCore::new(def, deps, handlers).await?,
        })
    }
}

fn bounded(command: &Command, key: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = command.parse_head(key)?;
    if !(min..=max).contains(&value) {
        return Err(RequestError::InvalidArgument {
            name: key.to_string(),
            reason: format!("must be between {min} and {max}"),
        }
        .into());
    }
    Ok(value)
}

fn roll(count: u32, sides: u32) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(1..=sides)).collect()
}

impl Service for DiceController {
    fn metadata(&self) -> &ServiceMetadata {
        &self.core.metadata
    }
}

#[async_trait]
impl Controller for DiceController {
    fn nouns(&self) -> &[String] {
        self.core.nouns()
    }

    async fn check(&self, command: &Command) -> bool {
        self.core.check(command).await
    }

    fn permission(&self, command: &Command) -> Option<Permission> {
        self.core.permission(command)
    }

    async fn handle(&self, command: Command, dispatcher: &Dispatcher) -> Result<()> {
        match self.core.action(&command)? {
            Action::Roll => {
                let count = bounded(&command, "count", 1, MAX_COUNT)?;
                let sides = bounded(&command, "sides", 2, MAX_SIDES)?;
                let rolls = roll(count, sides);
                let total: u32 = rolls.iter().sum();

                let listed: Vec<String> = rolls.iter().map(u32::to_string).collect();
                let mut scope = data_scope(&command);
                scope.insert("rolls".into(), json!(rolls));
                scope.insert("total".into(), json!(total));
                scope.insert(
                    BODY_KEY.into(),
                    Value::String(format!(
                        "rolled {count}d{sides}: {} (total {total})",
                        listed.join(", ")
                    )),
                );
                self.core.transform_reply(dispatcher, &command, scope).await
            }
        }
    }
}
