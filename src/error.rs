//! Error types for courier.

use std::time::Duration;

/// Top-level error type for the dispatcher and its services.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Content type error: {0}")]
    MimeType(#[from] MimeTypeError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Dispatcher has been stopped")]
    Stopped,
}

impl Error {
    /// Whether this error was caused by user input and should be answered
    /// with a reply instead of being logged as a failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::NotFound(_) | Self::Validation(_) | Self::Token(_)
        )
    }

    /// Reply text for user-facing errors, without the category prefix.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            Self::Request(e) => Some(e.to_string()),
            Self::NotFound(e) => Some(e.to_string()),
            Self::Validation(e) => Some(e.to_string()),
            Self::Token(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A required construction value was missing or an immutable field changed.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required value: {field}")]
    MissingValue { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("field {field} is immutable (is {current}, attempted {attempted})")]
    ImmutableField {
        field: &'static str,
        current: String,
        attempted: String,
    },
}

/// Config or data failed structural validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid {entity}: {reason}")]
    Invalid { entity: String, reason: String },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transform output is malformed: {reason}")]
    MalformedOutput { reason: String },
}

/// A parser or transform received a content type it does not handle.
#[derive(Debug, thiserror::Error)]
#[error("{service} does not support content type {mime}")]
pub struct MimeTypeError {
    pub service: String,
    pub mime: String,
}

/// A service, fragment, user or other entity lookup missed.
#[derive(Debug, thiserror::Error)]
#[error("{kind} {id} not found")]
pub struct NotFoundError {
    pub kind: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: id.to_string(),
        }
    }
}

/// User-input class errors, always answered with a reply.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("a session is required, please log in first")]
    SessionRequired,

    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("permission denied")]
    PermissionDenied { required: Vec<String> },
}

/// Token issuing and verification errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to issue token: {0}")]
    Issue(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::Invalid("invalid signature".into()),
            ErrorKind::InvalidIssuer => Self::Invalid("issuer mismatch".into()),
            ErrorKind::InvalidAudience => Self::Invalid("audience mismatch".into()),
            ErrorKind::InvalidSubject => Self::Invalid("subject mismatch".into()),
            ErrorKind::InvalidToken => Self::Invalid("malformed token".into()),
            _ => Self::Invalid(err.to_string()),
        }
    }
}

/// An external call exceeded its time budget.
#[derive(Debug, thiserror::Error)]
#[error("{operation} timed out after {timeout:?}")]
pub struct TimeoutError {
    pub operation: String,
    pub timeout: Duration,
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Listener (source/sink) errors.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Listener {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on listener {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to fetch messages from listener {name}: {reason}")]
    FetchFailed { name: String, reason: String },
}

/// A subprocess could not be run.
#[derive(Debug, thiserror::Error)]
#[error("{command}: {reason}")]
pub struct ProcessError {
    pub command: String,
    pub reason: String,
}

/// Result type alias for courier.
pub type Result<T> = std::result::Result<T, Error>;
