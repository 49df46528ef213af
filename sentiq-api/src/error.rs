//! Error types for the caller side

use sentiq_common::{BridgeError, ErrorKind};
use thiserror::Error;

/// Failure of a client call
#[derive(Debug, Error)]
pub enum ClientError {
    /// Publish failed or no reply arrived in time
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The worker answered with an error response
    #[error("{message}")]
    Remote {
        /// `error_kind` of the response; `None` if the worker sent none or an unrecognised one
        kind: Option<ErrorKind>,
        message: String,
    },

    /// The reply lacks the field carrying the result
    #[error("Worker response has no '{0}' field")]
    MissingField(&'static str),

    /// The result field is present but has the wrong shape
    #[error("Worker response field '{field}' is malformed: {message}")]
    MalformedResponse { field: &'static str, message: String },

    /// Caller input rejected before anything was sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Bridge(e) if e.is_timeout())
    }

    /// Taxonomy entry of a worker-reported error
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => *kind,
            _ => None,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
