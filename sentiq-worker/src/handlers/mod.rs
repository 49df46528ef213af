//! Task handlers
//!
//! One [`TaskHandler`] per task type. The [`HandlerRegistry`] is the dispatch
//! table: a type string either names exactly one handler or is unknown.

pub mod dataset;
pub mod ensemble;
pub mod inference;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use sentiq_common::config::{InferenceConfig, TopicConfig};

use crate::error::{HandlerError, ModelError};
use crate::models::registry::ModelRegistry;

/// Payload or result object of a task
pub type Fields = Map<String, Value>;

/// Handles one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Type string this handler is registered under
    fn task_type(&self) -> &'static str;

    /// Topic used when the task carries no `reply_to`
    fn default_reply_topic(&self) -> &str;

    /// Turn a task payload into result fields
    ///
    /// Envelope fields (`type`, `correlation_id`, `reply_to`) are not part
    /// of `payload`, and must not be set in the result.
    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError>;
}

/// Dispatch table from task type to handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in handler, wired to a shared model registry
    pub fn standard(
        models: Arc<ModelRegistry>,
        topics: &TopicConfig,
        inference: &InferenceConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(dataset::PrepareDatasetHandler::new(&topics.dataset_response));
        registry.register(inference::PredictTextHandler::new(
            models.clone(),
            inference.clone(),
            &topics.inference_response,
        ));
        registry.register(inference::PredictFileHandler::new(
            models.clone(),
            inference.clone(),
            &topics.inference_response,
        ));
        registry.register(ensemble::PredictTextEnsembleHandler::new(
            models.clone(),
            inference.clone(),
            &topics.inference_response,
        ));
        registry.register(ensemble::PredictFileEnsembleHandler::new(
            models,
            inference.clone(),
            &topics.inference_response,
        ));
        registry
    }

    /// Add a handler, replacing any handler for the same type
    pub fn register<H: TaskHandler + 'static>(&mut self, handler: H) -> &mut Self {
        let task_type = handler.task_type().to_string();
        debug!("Registering handler for {}", task_type);
        self.handlers.insert(task_type, Arc::new(handler));
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Registered type strings, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Decode a payload into its typed request
pub(crate) fn decode_payload<T: DeserializeOwned>(payload: Fields) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(Value::Object(payload))?)
}

/// Result object with a single field
pub(crate) fn single_field<T: Serialize>(name: &str, value: &T) -> Result<Fields, HandlerError> {
    let value = serde_json::to_value(value)
        .map_err(|e| HandlerError::Internal(format!("Encode {} failed: {}", name, e)))?;
    let mut fields = Map::new();
    fields.insert(name.to_string(), value);
    Ok(fields)
}

/// Run model work on the blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, HandlerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ModelError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => Ok(result?),
        Err(e) if e.is_panic() => Err(HandlerError::Internal("Inference panicked".to_string())),
        Err(e) => Err(HandlerError::Internal(format!("Inference task failed: {}", e))),
    }
}
