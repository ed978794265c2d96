//! Error types for the push pipeline
//!
//! [`PushError`] is the taxonomy every collaborator reports in. The
//! orchestrator wraps it into a [`PushFailure`] naming the stage that failed
//! and the reference it was working on.

pub mod handlers;

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    /// Caller supplied a name that is not a valid image reference
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    /// Local storage could not be opened or read
    #[error("environment error: {0}")]
    Environment(String),
    /// Collaborator handles cannot work together
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No local image or blob matches
    #[error("not found: {0}")]
    NotFound(String),
    /// Registry rejected credentials or permissions
    #[error("authorization error: {0}")]
    Authorization(String),
    /// Transport level failure
    #[error("network error: {0}")]
    Network(String),
    /// Registry rejected the operation
    #[error("registry error (status {status}): {message}")]
    Registry { status: u16, message: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl PushError {
    pub fn registry(status: u16, message: impl Into<String>) -> Self {
        PushError::Registry {
            status,
            message: message.into(),
        }
    }

    /// Whether re-running the whole push may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Environment(_) | PushError::Network(_) => true,
            PushError::Registry { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Prefix the message with context, keeping the kind.
    pub fn context(self, context: impl fmt::Display) -> Self {
        match self {
            PushError::InvalidReference(msg) => {
                PushError::InvalidReference(format!("{}: {}", context, msg))
            }
            PushError::Environment(msg) => PushError::Environment(format!("{}: {}", context, msg)),
            PushError::Configuration(msg) => {
                PushError::Configuration(format!("{}: {}", context, msg))
            }
            PushError::NotFound(msg) => PushError::NotFound(format!("{}: {}", context, msg)),
            PushError::Authorization(msg) => {
                PushError::Authorization(format!("{}: {}", context, msg))
            }
            PushError::Network(msg) => PushError::Network(format!("{}: {}", context, msg)),
            PushError::Registry { status, message } => PushError::Registry {
                status,
                message: format!("{}: {}", context, message),
            },
            PushError::Cancelled => PushError::Cancelled,
        }
    }
}

impl From<std::io::Error> for PushError {
    fn from(err: std::io::Error) -> Self {
        PushError::Environment(err.to_string())
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "registry request")
    }
}

impl From<url::ParseError> for PushError {
    fn from(err: url::ParseError) -> Self {
        PushError::Configuration(format!("invalid registry URL: {}", err))
    }
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Normalize,
    BuildContext,
    CreateWriter,
    CreatePusher,
    Resolve,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Normalize => "parsing image name",
            Stage::BuildContext => "creating worker context",
            Stage::CreateWriter => "creating image writer",
            Stage::CreatePusher => "creating image pusher",
            Stage::Resolve => "resolving image",
            Stage::Export => "exporting image",
        };
        f.write_str(s)
    }
}

/// A push that stopped at `stage` while handling `reference`.
#[derive(Debug, Clone, Error)]
#[error("{stage} {reference} failed: {source}")]
pub struct PushFailure {
    pub stage: Stage,
    pub reference: String,
    #[source]
    pub source: PushError,
}

impl PushFailure {
    pub fn new(stage: Stage, reference: impl Into<String>, source: PushError) -> Self {
        Self {
            stage,
            reference: reference.into(),
            source,
        }
    }

    pub fn kind(&self) -> &PushError {
        &self.source
    }
}
