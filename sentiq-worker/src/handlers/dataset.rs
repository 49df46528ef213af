//! `prepare_dataset` handler
//!
//! Column selection and HTML cleaning happen on the calling side; the worker
//! hands the records back unchanged as `processed_data`.

use async_trait::async_trait;
use serde_json::Value;

use sentiq_common::message::task_types;

use super::{Fields, TaskHandler};
use crate::error::HandlerError;

pub struct PrepareDatasetHandler {
    reply_topic: String,
}

impl PrepareDatasetHandler {
    pub fn new(reply_topic: impl Into<String>) -> Self {
        Self { reply_topic: reply_topic.into() }
    }
}

#[async_trait]
impl TaskHandler for PrepareDatasetHandler {
    fn task_type(&self) -> &'static str {
        task_types::PREPARE_DATASET
    }

    fn default_reply_topic(&self) -> &str {
        &self.reply_topic
    }

    async fn handle(&self, mut payload: Fields) -> Result<Fields, HandlerError> {
        let records = match payload.remove("data") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(HandlerError::Validation(format!(
                    "data must be an array of records, got {}",
                    sentiq_common::message::json_type_name(&other)
                )))
            }
            None => return Err(HandlerError::Validation("data is required".to_string())),
        };

        let mut result = Fields::new();
        result.insert("processed_data".to_string(), Value::Array(records));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[tokio::test]
    async fn test_records_pass_through_unchanged() {
        let records = json!([
            {"TextAnalyze": "  <b>hi</b>  ", "Sentiment": 1},
            {"TextAnalyze": "Отличный товар", "Sentiment": "G"},
            {"TextAnalyze": "", "Sentiment": null, "extra": [1, 2]}
        ]);
        let handler = PrepareDatasetHandler::new("dataset_response");
        let result = handler.handle(payload(json!({"data": records.clone()}))).await.unwrap();

        assert_eq!(result.get("processed_data"), Some(&records));
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_or_mistyped_data_is_validation_error() {
        let handler = PrepareDatasetHandler::new("dataset_response");

        let missing = handler.handle(Fields::new()).await.unwrap_err();
        assert!(matches!(missing, HandlerError::Validation(_)));

        let wrong = handler.handle(payload(json!({"data": "rows"}))).await.unwrap_err();
        assert!(wrong.to_string().contains("string"));
    }
}
