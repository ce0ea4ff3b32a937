//! Ensemble error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while routing, executing or propagating commands
///
/// The enum is serializable so a failure raised on a remote node travels
/// back to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsembleError {
    /// No known route satisfies the query (unknown cluster, empty node set)
    #[error("Missing route: {0}")]
    MissingRoute(String),

    /// Transport-level failure talking to a remote node
    #[error("Communication error: {0}")]
    Communication(String),

    /// Failure while executing a command against its target
    #[error("Processing error: {0}")]
    Processing(String),

    /// Invalid configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error classification, used by retry allowlists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingRoute,
    Communication,
    Processing,
    Config,
}

impl EnsembleError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnsembleError::MissingRoute(_) => ErrorKind::MissingRoute,
            EnsembleError::Communication(_) => ErrorKind::Communication,
            EnsembleError::Processing(_) => ErrorKind::Processing,
            EnsembleError::Config(_) => ErrorKind::Config,
        }
    }

    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            EnsembleError::MissingRoute(_) => "missing_route",
            EnsembleError::Communication(_) => "communication",
            EnsembleError::Processing(_) => "processing",
            EnsembleError::Config(_) => "config",
        }
    }
}

impl From<std::io::Error> for EnsembleError {
    fn from(err: std::io::Error) -> Self {
        EnsembleError::Communication(err.to_string())
    }
}

impl From<tarpc::client::RpcError> for EnsembleError {
    fn from(err: tarpc::client::RpcError) -> Self {
        EnsembleError::Communication(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EnsembleError>;
