//! Task and Response messages exchanged over the transport
//!
//! Both travel as UTF-8 JSON objects. Envelope fields (`type`,
//! `correlation_id`, `reply_to`) sit next to the payload fields on the wire,
//! which is why the payloads are flattened maps rather than typed structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Task type strings understood by the worker
pub mod task_types {
    pub const PREPARE_DATASET: &str = "prepare_dataset";
    pub const PREDICT_TEXT: &str = "predict_text";
    pub const PREDICT_FILE: &str = "predict_file";
    pub const PREDICT_TEXT_ENSEMBLE: &str = "predict_text_ensemble";
    pub const PREDICT_FILE_ENSEMBLE: &str = "predict_file_ensemble";
}

/// Message returned for tasks whose type has no registered handler
pub const UNKNOWN_TASK_TYPE: &str = "Unknown task type";

/// Opaque token pairing a task with its reply
///
/// Minted as a random UUIDv4 rendered as text. Whatever JSON value arrives
/// on the wire is kept as-is and echoed back untouched, so a sender using
/// numbers or other non-string ids still sees its own id in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Value);

impl CorrelationId {
    /// Mint a fresh identifier for one call
    pub fn generate() -> Self {
        Self(Value::String(Uuid::new_v4().to_string()))
    }

    /// The id as text, when it was sent as a JSON string
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<Value> for CorrelationId {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Unit of work sent from a caller to the worker
///
/// Decoding accepts any JSON object. A `type` or `reply_to` that is missing
/// or not a string reads as empty / absent, so every object-shaped task can
/// still be answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Declared task type; empty when the sender omitted it
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    /// Topic the worker should publish the reply to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Type-specific payload fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Task {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            correlation_id: None,
            reply_to: None,
            payload: Map::new(),
        }
    }

    /// Build a task from any serializable payload
    ///
    /// The payload must serialize to a JSON object.
    pub fn with_payload<P: Serialize>(kind: impl Into<String>, payload: &P) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => {
                let mut task = Self::new(kind);
                task.payload = map;
                Ok(task)
            }
            other => Err(Error::InvalidInput(format!(
                "task payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Split a wire object into envelope and payload
    pub fn from_object(mut object: Map<String, Value>) -> Self {
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        let correlation_id = match object.remove("correlation_id") {
            None | Some(Value::Null) => None,
            Some(id) => Some(CorrelationId(id)),
        };
        let reply_to = match object.remove("reply_to") {
            Some(Value::String(topic)) => Some(topic),
            _ => None,
        };
        Self {
            kind,
            correlation_id,
            reply_to,
            payload: object,
        }
    }

    /// Set a single payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Map::deserialize(deserializer).map(Task::from_object)
    }
}

/// Error taxonomy carried in error responses (`error_kind`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Payload missing a field or carrying the wrong shape
    Validation,
    /// Requested model or checkpoint cannot be loaded
    ModelUnavailable,
    /// No handler registered for the task type
    UnknownTaskType,
    /// Anything else, including handler panics
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::UnknownTaskType => "unknown_task_type",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work result sent from the worker back to a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the originating task's id (null if the task had none)
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,

    /// Result fields, or `error` / `error_kind`
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    pub fn success(correlation_id: Option<CorrelationId>, body: Map<String, Value>) -> Self {
        Self { correlation_id, body }
    }

    pub fn failure(
        correlation_id: Option<CorrelationId>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(message.into()));
        body.insert("error_kind".to_string(), Value::String(kind.as_str().to_string()));
        Self { correlation_id, body }
    }

    /// True when this response answers the call identified by `id`
    pub fn answers(&self, id: &CorrelationId) -> bool {
        self.correlation_id.as_ref() == Some(id)
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    /// Error kind, if present and recognised
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.body
            .get("error_kind")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_error(&self) -> bool {
        self.body.contains_key("error")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Remove and return a result field
    pub fn take(&mut self, field: &str) -> Option<Value> {
        self.body.remove(field)
    }
}

/// JSON type name used in validation messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
