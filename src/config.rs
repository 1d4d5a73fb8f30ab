//! Configuration types.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::auth::token::parse_algorithm;
use crate::error::ConfigError;
use crate::service::ServiceDefinition;

/// Shortest accepted signing secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Services created by the dispatcher on start, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub listeners: Vec<ServiceDefinition>,
    #[serde(default)]
    pub parsers: Vec<ServiceDefinition>,
    #[serde(default)]
    pub controllers: Vec<ServiceDefinition>,
}

impl ServicesConfig {
    /// Load service definitions from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name used in logs.
    pub name: String,
    /// Backlog each stream observer may fall behind by before it lags.
    /// Delivery to the dispatcher's own consumers is unbounded.
    pub stream_capacity: usize,
    /// Upper bound for constructing a single service.
    pub service_timeout: Duration,
    /// How long `stop` waits for the stream consumers.
    pub stop_timeout: Duration,
    /// Cron expression driving `tick` notifications.
    pub tick_schedule: Option<String>,
    /// Lifetime of listener sessions.
    pub session_ttl: Duration,
    pub services: ServicesConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "courier".to_string(),
            stream_capacity: 256,
            service_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            tick_schedule: None,
            session_ttl: Duration::from_secs(3600), // 1 hour
            services: ServicesConfig::default(),
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub audience: Vec<String>,
    /// HMAC family only.
    pub algorithm: Algorithm,
    pub token_lifetime: Duration,
}

impl AuthConfig {
    /// Fixed-secret config for local runs and tests.
    pub fn dev() -> Self {
        Self {
            secret: SecretString::from("courier-development-secret-do-not-deploy"),
            issuer: "courier".to_string(),
            audience: vec!["courier".to_string()],
            algorithm: Algorithm::HS256,
            token_lifetime: Duration::from_secs(86_400), // 1 day
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_TOKEN_SECRET".into(),
                message: format!("must be at least {MIN_SECRET_LEN} characters"),
            });
        }
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_TOKEN_ISSUER".into(),
                message: "must not be empty".into(),
            });
        }
        if self.audience.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_TOKEN_AUDIENCE".into(),
                message: "must list at least one audience".into(),
            });
        }
        Ok(())
    }
}

/// Everything the binary needs, read from `COURIER_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub auth: AuthConfig,
    /// libSQL database file. In-memory storage when unset.
    pub db_path: Option<PathBuf>,
    /// Directory for daily rolling log files.
    pub log_dir: Option<PathBuf>,
    /// Bearer token the terminal listener attaches to every line.
    pub cli_token: Option<SecretString>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DispatcherConfig::default();

        let tick_schedule = lookup("COURIER_TICK_SCHEDULE").filter(|s| !s.trim().is_empty());
        if let Some(expr) = &tick_schedule {
            cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                key: "COURIER_TICK_SCHEDULE".into(),
                message: e.to_string(),
            })?;
        }

        let services = match lookup("COURIER_SERVICES") {
            Some(path) => ServicesConfig::from_file(Path::new(&path))?,
            None => ServicesConfig::default(),
        };

        let dispatcher = DispatcherConfig {
            name: lookup("COURIER_NAME").unwrap_or(defaults.name),
            stream_capacity: parse_or(
                &lookup,
                "COURIER_STREAM_CAPACITY",
                defaults.stream_capacity,
            )?,
            service_timeout: secs_or(
                &lookup,
                "COURIER_SERVICE_TIMEOUT_SECS",
                defaults.service_timeout,
            )?,
            stop_timeout: secs_or(&lookup, "COURIER_STOP_TIMEOUT_SECS", defaults.stop_timeout)?,
            tick_schedule,
            session_ttl: secs_or(&lookup, "COURIER_SESSION_TTL_SECS", defaults.session_ttl)?,
            services,
        };
        if dispatcher.stream_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_STREAM_CAPACITY".into(),
                message: "must be greater than zero".into(),
            });
        }

        let secret = lookup("COURIER_TOKEN_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            key: "COURIER_TOKEN_SECRET".into(),
            hint: format!("Set it to a random string of at least {MIN_SECRET_LEN} characters."),
        })?;
        let dev = AuthConfig::dev();
        let auth = AuthConfig {
            secret: SecretString::from(secret),
            issuer: lookup("COURIER_TOKEN_ISSUER").unwrap_or(dev.issuer),
            audience: lookup("COURIER_TOKEN_AUDIENCE")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(dev.audience),
            algorithm: match lookup("COURIER_TOKEN_ALGORITHM") {
                Some(name) => parse_algorithm(&name)?,
                None => dev.algorithm,
            },
            token_lifetime: secs_or(&lookup, "COURIER_TOKEN_LIFETIME_SECS", dev.token_lifetime)?,
        };
        auth.validate()?;

        Ok(Self {
            dispatcher,
            auth,
            db_path: lookup("COURIER_DB_PATH").map(PathBuf::from),
            log_dir: lookup("COURIER_LOG_DIR").map(PathBuf::from),
            cli_token: lookup("COURIER_CLI_TOKEN")
                .filter(|s| !s.trim().is_empty())
                .map(SecretString::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
