//! Error types for sentiq-worker
//!
//! Handler failures never leave the worker as Rust errors: the dispatch loop
//! turns them into error responses, using [`HandlerError::kind`] for the
//! `error_kind` field.

use sentiq_common::ErrorKind;
use thiserror::Error;

/// Failure of a model load or inference call
#[derive(Debug, Error)]
pub enum ModelError {
    /// Requested model/checkpoint is not available
    #[error("Requested checkpoint '{requested}' is not available. Available: {available:?}")]
    Unavailable {
        requested: String,
        available: Vec<String>,
    },

    /// Model files exist but could not be loaded
    #[error("Failed to load model {source_name}: {message}")]
    Load { source_name: String, message: String },

    /// Model loaded but inference failed
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Failure of a task handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload is missing a field or has the wrong shape
    #[error("Invalid payload: {0}")]
    Validation(String),

    /// Model could not be resolved or loaded
    #[error("{0}")]
    Model(#[from] ModelError),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Taxonomy entry reported in the response's `error_kind`
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Validation(_) => ErrorKind::Validation,
            HandlerError::Model(ModelError::Unavailable { .. })
            | HandlerError::Model(ModelError::Load { .. }) => ErrorKind::ModelUnavailable,
            HandlerError::Model(ModelError::Inference(_)) => ErrorKind::Internal,
            HandlerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Validation(e.to_string())
    }
}
