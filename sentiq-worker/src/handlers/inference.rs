//! Single-model inference handlers: `predict_text` and `predict_file`
//!
//! `model_name` selects a checkpoint; `checkpoint` is accepted under the same
//! meaning. Without either, the default model is used.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use sentiq_common::config::InferenceConfig;
use sentiq_common::message::task_types;
use sentiq_common::text::truncate_chars;

use super::{decode_payload, run_blocking, single_field, Fields, TaskHandler};
use crate::error::HandlerError;
use crate::models::registry::ModelRegistry;

#[derive(Debug, Deserialize)]
struct PredictTextRequest {
    text: String,
    #[serde(default, alias = "checkpoint")]
    model_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictFileRequest {
    texts: Vec<String>,
    #[serde(default, alias = "checkpoint")]
    model_name: Option<String>,
}

pub struct PredictTextHandler {
    models: Arc<ModelRegistry>,
    options: InferenceConfig,
    reply_topic: String,
}

impl PredictTextHandler {
    pub fn new(models: Arc<ModelRegistry>, options: InferenceConfig, reply_topic: impl Into<String>) -> Self {
        Self { models, options, reply_topic: reply_topic.into() }
    }
}

#[async_trait]
impl TaskHandler for PredictTextHandler {
    fn task_type(&self) -> &'static str {
        task_types::PREDICT_TEXT
    }

    fn default_reply_topic(&self) -> &str {
        &self.reply_topic
    }

    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError> {
        let request: PredictTextRequest = decode_payload(payload)?;
        let models = self.models.clone();
        let max_length = self.options.max_length;

        let prediction = run_blocking(move || {
            let model = models.resolve(request.model_name.as_deref())?;
            model.predict(truncate_chars(&request.text, max_length))
        })
        .await?;

        single_field("result", &prediction)
    }
}

pub struct PredictFileHandler {
    models: Arc<ModelRegistry>,
    options: InferenceConfig,
    reply_topic: String,
}

impl PredictFileHandler {
    pub fn new(models: Arc<ModelRegistry>, options: InferenceConfig, reply_topic: impl Into<String>) -> Self {
        Self { models, options, reply_topic: reply_topic.into() }
    }
}

#[async_trait]
impl TaskHandler for PredictFileHandler {
    fn task_type(&self) -> &'static str {
        task_types::PREDICT_FILE
    }

    fn default_reply_topic(&self) -> &str {
        &self.reply_topic
    }

    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError> {
        let request: PredictFileRequest = decode_payload(payload)?;
        let models = self.models.clone();
        let InferenceConfig { max_length, batch_size } = self.options;

        let predictions = run_blocking(move || {
            let model = models.resolve(request.model_name.as_deref())?;
            let texts: Vec<String> = request
                .texts
                .iter()
                .map(|text| truncate_chars(text, max_length).to_string())
                .collect();

            let mut predictions = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(batch_size.max(1)) {
                predictions.extend(model.predict_batch(chunk)?);
            }
            Ok(predictions)
        })
        .await?;

        single_field("results", &predictions)
    }
}
