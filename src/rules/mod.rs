//! Declarative rule matching over structured data.
//!
//! Rules are declared in config as `{key, operator, negate, values}` and
//! compiled once by the owning service. A compiled [`MatchRules`] holds no
//! mutable state and can be shared across concurrent evaluations.
//!
//! Evaluation policy per rule:
//! - the values at `key` are extracted with a path query;
//! - no extracted values (or no expected values) fails the rule;
//! - any non-string extracted value fails the rule;
//! - `any` passes if some extracted value matches, `every` if all do;
//! - `negate` inverts the per-value test before aggregation;
//! - `never` always fails.

pub mod path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaError;

/// How extracted values are aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    Any,
    Every,
    /// Always fails. Used as a closed default.
    #[default]
    Never,
}

/// An expected value: literal equality or regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleValue {
    String(String),
    Regexp(String),
}

/// A single rule as declared in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDef {
    /// Path expression into the matched data.
    pub key: String,
    #[serde(default)]
    pub operator: RuleOperator,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub values: Vec<RuleValue>,
}

impl RuleDef {
    /// Shorthand for an `any` rule over literal strings.
    pub fn any_of(key: impl Into<String>, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator: RuleOperator::Any,
            negate: false,
            values: values
                .iter()
                .map(|v| RuleValue::String((*v).to_string()))
                .collect(),
        }
    }
}

/// A set of rules, all of which must pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDef {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// Outcome of evaluating a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResults {
    pub matched: bool,
    /// Keys of the rules that failed.
    pub failed_keys: Vec<String>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    fn test(&self, value: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == value,
            Self::Pattern(regex) => regex.is_match(value),
        }
    }

    fn strip(&self, text: &str) -> String {
        match self {
            Self::Literal(literal) if !literal.is_empty() => text.replace(literal.as_str(), ""),
            Self::Literal(_) => text.to_string(),
            Self::Pattern(regex) => regex.replace_all(text, "").into_owned(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    key: String,
    operator: RuleOperator,
    negate: bool,
    matchers: Vec<Matcher>,
}

impl CompiledRule {
    fn compile(def: &RuleDef) -> Result<Self, SchemaError> {
        let matchers = def
            .values
            .iter()
            .map(|value| match value {
                RuleValue::String(s) => Ok(Matcher::Literal(s.clone())),
                RuleValue::Regexp(p) => Regex::new(p).map(Matcher::Pattern),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            key: def.key.clone(),
            operator: def.operator,
            negate: def.negate,
            matchers,
        })
    }

    fn test_value(&self, value: &str) -> bool {
        let hit = self.matchers.iter().any(|m| m.test(value));
        hit != self.negate
    }

    fn evaluate(&self, data: &Value) -> bool {
        if self.operator == RuleOperator::Never || self.matchers.is_empty() {
            return false;
        }

        let extracted = path::query(data, &self.key);
        if extracted.is_empty() {
            return false;
        }

        let mut strings = Vec::with_capacity(extracted.len());
        for value in extracted {
            match value.as_str() {
                Some(s) => strings.push(s),
                None => return false,
            }
        }

        match self.operator {
            RuleOperator::Any => strings.iter().any(|s| self.test_value(s)),
            RuleOperator::Every => strings.iter().all(|s| self.test_value(s)),
            RuleOperator::Never => false,
        }
    }
}

/// Compiled, immutable rule set.
#[derive(Debug, Clone, Default)]
pub struct MatchRules {
    rules: Vec<CompiledRule>,
}

impl MatchRules {
    /// Compile a rule set. Invalid patterns are schema errors.
    pub fn compile(def: &MatchDef) -> Result<Self, SchemaError> {
        let rules = def
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Rule set with no rules. Matches everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against `data`.
    pub fn match_value(&self, data: &Value) -> MatchResults {
        let failed_keys: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| !rule.evaluate(data))
            .map(|rule| rule.key.clone())
            .collect();

        if !failed_keys.is_empty() {
            debug!(failed = ?failed_keys, "Rule set did not match");
        }

        MatchResults {
            matched: failed_keys.is_empty(),
            failed_keys,
        }
    }

    /// Serialize `entity` and evaluate against it.
    pub fn match_entity<T: Serialize>(&self, entity: &T) -> Result<MatchResults, SchemaError> {
        let value = serde_json::to_value(entity)?;
        Ok(self.match_value(&value))
    }

    /// Remove every literal or pattern hit from `text`.
    pub fn remove_matches(&self, text: &str) -> String {
        self.rules
            .iter()
            .flat_map(|rule| rule.matchers.iter())
            .fold(text.to_string(), |acc, matcher| matcher.strip(&acc))
    }
}
