//! Caller-facing client
//!
//! Each method builds one task, sends it through the [`CorrelationBridge`]
//! and blocks until the matching reply arrives or the timeout passes. Error
//! replies become [`ClientError::Remote`] with the worker's error kind.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use sentiq_common::config::{SentiqConfig, TopicConfig};
use sentiq_common::message::{task_types, Response, Task};
use sentiq_common::transport::Transport;
use sentiq_common::CorrelationBridge;

use crate::dataset::{prepare_records, Record};
use crate::error::{ClientError, ClientResult};
use crate::sentiment::{ensemble_letter, sentiment_letter};

/// Label object inside `result` / `results`
#[derive(Debug, Deserialize)]
struct LabelResult {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Clone)]
pub struct SentimentClient {
    bridge: CorrelationBridge,
    topics: TopicConfig,
    timeout: Duration,
}

impl SentimentClient {
    pub fn new(bridge: CorrelationBridge, topics: TopicConfig, timeout: Duration) -> Self {
        Self { bridge, topics, timeout }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &SentiqConfig) -> Self {
        Self::new(
            CorrelationBridge::new(transport),
            config.topics.clone(),
            config.bridge.timeout(),
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sentiment letter for one text, optionally using a named checkpoint
    pub async fn predict_text(&self, text: &str, checkpoint: Option<&str>) -> ClientResult<String> {
        let mut task = Task::new(task_types::PREDICT_TEXT).with_field("text", text);
        if let Some(checkpoint) = checkpoint {
            task = task.with_field("model_name", checkpoint);
        }

        let mut response = self.inference(task).await?;
        let result: LabelResult = take_field(&mut response, "result")?;
        Ok(sentiment_letter(&result.label).to_string())
    }

    /// Sentiment letters for several texts, in input order
    pub async fn predict_texts(
        &self,
        texts: &[String],
        checkpoint: Option<&str>,
    ) -> ClientResult<Vec<String>> {
        let mut task = Task::new(task_types::PREDICT_FILE).with_field("texts", texts.to_vec());
        if let Some(checkpoint) = checkpoint {
            task = task.with_field("model_name", checkpoint);
        }

        let mut response = self.inference(task).await?;
        let results: Vec<LabelResult> = take_field(&mut response, "results")?;
        check_count(texts.len(), results.len())?;
        Ok(results
            .iter()
            .map(|r| sentiment_letter(&r.label).to_string())
            .collect())
    }

    /// Ensemble letter for one text
    pub async fn predict_text_ensemble(&self, text: &str) -> ClientResult<String> {
        let task = Task::new(task_types::PREDICT_TEXT_ENSEMBLE).with_field("text", text);
        let mut response = self.inference(task).await?;
        let result: LabelResult = take_field(&mut response, "result")?;
        Ok(ensemble_letter(&result.label).to_string())
    }

    /// Ensemble letters for several texts, in input order
    pub async fn predict_texts_ensemble(&self, texts: &[String]) -> ClientResult<Vec<String>> {
        let task = Task::new(task_types::PREDICT_FILE_ENSEMBLE).with_field("texts", texts.to_vec());
        let mut response = self.inference(task).await?;
        let results: Vec<LabelResult> = take_field(&mut response, "results")?;
        check_count(texts.len(), results.len())?;
        Ok(results
            .iter()
            .map(|r| ensemble_letter(&r.label).to_string())
            .collect())
    }

    /// Prepare a labelled dataset: select and clean the columns here, let the
    /// worker process the records, return what it produced
    pub async fn prepare_dataset(
        &self,
        records: &[Record],
        text_column: &str,
        sentiment_column: &str,
    ) -> ClientResult<Vec<Record>> {
        let prepared = prepare_records(records, text_column, sentiment_column)?;
        let data: Vec<Value> = prepared.into_iter().map(Value::Object).collect();
        let task = Task::new(task_types::PREPARE_DATASET).with_field("data", data);

        let mut response = self
            .send(task, &self.topics.dataset_request, &self.topics.dataset_response)
            .await?;
        take_field(&mut response, "processed_data")
    }

    async fn inference(&self, task: Task) -> ClientResult<Response> {
        self.send(task, &self.topics.inference_request, &self.topics.inference_response)
            .await
    }

    async fn send(&self, task: Task, request_topic: &str, response_topic: &str) -> ClientResult<Response> {
        let task_type = task.kind.clone();
        let response = self
            .bridge
            .call(task, request_topic, response_topic, self.timeout)
            .await?;

        if let Some(message) = response.error() {
            debug!(task_type = %task_type, "Worker returned an error: {}", message);
            return Err(ClientError::Remote {
                kind: response.error_kind(),
                message: message.to_string(),
            });
        }
        Ok(response)
    }
}

fn take_field<T: serde::de::DeserializeOwned>(
    response: &mut Response,
    field: &'static str,
) -> ClientResult<T> {
    let value = match response.take(field) {
        None | Some(Value::Null) => return Err(ClientError::MissingField(field)),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| ClientError::MalformedResponse {
        field,
        message: e.to_string(),
    })
}

fn check_count(expected: usize, actual: usize) -> ClientResult<()> {
    if expected != actual {
        return Err(ClientError::MalformedResponse {
            field: "results",
            message: format!("expected {} results, got {}", expected, actual),
        });
    }
    Ok(())
}
