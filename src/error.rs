use thiserror::Error;

/// Main error type for the signal pipeline
#[derive(Error, Debug)]
pub enum PostSignalError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Pipeline component errors
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Order submission already in flight for status {0}")]
    AlreadyInFlight(String),

    // Crypto/signing errors
    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PostSignalError
pub type Result<T> = std::result::Result<T, PostSignalError>;

/// A raw post could not be turned into a `Status`.
///
/// Never fatal: the record is skipped and the cycle continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Raw post is not an object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors from the post fetch transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch transport error: {0}")]
    Transport(String),

    #[error("Fetch authentication error: {0}")]
    Auth(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Errors from the classification provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Classification failed (retryable: {retryable}): {message}")]
pub struct ClassificationError {
    pub retryable: bool,
    pub message: String,
}

impl ClassificationError {
    /// Rate limiting, timeouts, provider hiccups
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// Malformed response, policy rejection
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ClassificationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClassificationError::permanent(err.to_string())
        } else {
            ClassificationError::retryable(err.to_string())
        }
    }
}

/// Errors from the order execution provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Order execution failed (retryable: {retryable}): {message}")]
pub struct ExecutionError {
    pub retryable: bool,
    pub message: String,
}

impl ExecutionError {
    /// Network timeout, rate limit, exchange busy
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// Invalid parameters, insufficient balance, rejected order
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ExecutionError::permanent(err.to_string())
        } else {
            ExecutionError::retryable(err.to_string())
        }
    }
}

/// Notification delivery failed. Always swallowed by callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotificationError(pub String);

/// The cursor could not be read or durably written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cursor persistence failed for {account}: {message}")]
pub struct PersistenceError {
    pub account: String,
    pub message: String,
}

impl PersistenceError {
    pub fn new(account: &str, message: impl Into<String>) -> Self {
        Self {
            account: account.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_retryability() {
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::Auth("401".into()).is_retryable());
    }

    #[test]
    fn component_errors_convert_into_main_error() {
        let err: PostSignalError = ExecutionError::permanent("insufficient balance").into();
        assert!(matches!(err, PostSignalError::Execution(ref e) if !e.retryable));
        assert!(err.to_string().contains("insufficient balance"));

        let err: PostSignalError = PersistenceError::new("alice", "disk full").into();
        assert_eq!(
            err.to_string(),
            "Cursor persistence failed for alice: disk full"
        );
    }
}
