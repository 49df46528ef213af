//! Ensemble inference handlers: `predict_text_ensemble` and `predict_file_ensemble`
//!
//! Results are sentiment letters (`B`, `G`, `N`) wrapped as `{label}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sentiq_common::config::InferenceConfig;
use sentiq_common::message::task_types;
use sentiq_common::text::truncate_chars;

use super::{decode_payload, run_blocking, single_field, Fields, TaskHandler};
use crate::error::HandlerError;
use crate::models::ensemble::SentimentClass;
use crate::models::registry::ModelRegistry;

#[derive(Debug, Deserialize)]
struct EnsembleTextRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EnsembleFileRequest {
    texts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LetterLabel {
    label: &'static str,
}

impl From<SentimentClass> for LetterLabel {
    fn from(class: SentimentClass) -> Self {
        Self { label: class.letter() }
    }
}

pub struct PredictTextEnsembleHandler {
    models: Arc<ModelRegistry>,
    options: InferenceConfig,
    reply_topic: String,
}

impl PredictTextEnsembleHandler {
    pub fn new(models: Arc<ModelRegistry>, options: InferenceConfig, reply_topic: impl Into<String>) -> Self {
        Self { models, options, reply_topic: reply_topic.into() }
    }
}

#[async_trait]
impl TaskHandler for PredictTextEnsembleHandler {
    fn task_type(&self) -> &'static str {
        task_types::PREDICT_TEXT_ENSEMBLE
    }

    fn default_reply_topic(&self) -> &str {
        &self.reply_topic
    }

    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError> {
        let request: EnsembleTextRequest = decode_payload(payload)?;
        let models = self.models.clone();
        let max_length = self.options.max_length;

        let class = run_blocking(move || {
            let ensemble = models.ensemble()?;
            ensemble.predict(truncate_chars(&request.text, max_length))
        })
        .await?;

        single_field("result", &LetterLabel::from(class))
    }
}

pub struct PredictFileEnsembleHandler {
    models: Arc<ModelRegistry>,
    options: InferenceConfig,
    reply_topic: String,
}

impl PredictFileEnsembleHandler {
    pub fn new(models: Arc<ModelRegistry>, options: InferenceConfig, reply_topic: impl Into<String>) -> Self {
        Self { models, options, reply_topic: reply_topic.into() }
    }
}

#[async_trait]
impl TaskHandler for PredictFileEnsembleHandler {
    fn task_type(&self) -> &'static str {
        task_types::PREDICT_FILE_ENSEMBLE
    }

    fn default_reply_topic(&self) -> &str {
        &self.reply_topic
    }

    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError> {
        let request: EnsembleFileRequest = decode_payload(payload)?;
        let models = self.models.clone();
        let max_length = self.options.max_length;

        let classes = run_blocking(move || {
            let ensemble = models.ensemble()?;
            let texts: Vec<String> = request
                .texts
                .iter()
                .map(|text| truncate_chars(text, max_length).to_string())
                .collect();
            ensemble.predict_batch(&texts)
        })
        .await?;

        let labels: Vec<LetterLabel> = classes.into_iter().map(LetterLabel::from).collect();
        single_field("results", &labels)
    }
}
