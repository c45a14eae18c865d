use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::id::{JobId, MarketId};
use crate::domain::job::AttemptRecord;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Ledger connectivity and consistency errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("ledger unreachable: {0}")]
    Connectivity(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("event stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("reorg at block {block} is deeper than {confirmations} confirmations")]
    ReorgBeyondConfirmations { block: u64, confirmations: u64 },
}

/// Outbound transaction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("invalid transaction input: {0}")]
    InvalidInput(String),

    #[error("transaction underpriced: {0}")]
    Underpriced(String),

    #[error("transaction already known: {0}")]
    AlreadyKnown(String),

    #[error("job {job_id} failed after {} attempts: {last_error}", .history.len())]
    RetryExhausted {
        job_id: JobId,
        market_id: MarketId,
        last_error: String,
        history: Vec<AttemptRecord>,
    },

    #[error("queue full: depth {depth} reached limit {max_depth}")]
    QueueFull { depth: usize, max_depth: usize },

    #[error("job {job_id} cannot be cancelled while {state}")]
    NotCancellable { job_id: JobId, state: &'static str },

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("state conflict on {key} after {attempts} attempts")]
    StateConflict { key: String, attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Transient failures surface only as latency; everything else is
    /// reported to the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Chain(err) => !matches!(err, ChainError::ReorgBeyondConfirmations { .. }),
            Self::Transaction(err) => matches!(
                err,
                TransactionError::Underpriced(_) | TransactionError::AlreadyKnown(_)
            ),
            Self::StateConflict { .. }
            | Self::WebSocket(_)
            | Self::Http(_)
            | Self::Io(_)
            | Self::Connection(_)
            | Self::Database(_) => true,
            Self::Config(_)
            | Self::Validation(_)
            | Self::NotFound(_)
            | Self::Json(_)
            | Self::Url(_)
            | Self::Parse(_) => false,
        }
    }

    /// Timeout wrapper used around every network call.
    #[must_use]
    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Chain(ChainError::Timeout {
            operation,
            timeout_ms,
        })
    }
}
