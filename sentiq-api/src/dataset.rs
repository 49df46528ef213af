//! Dataset preparation on the calling side
//!
//! Keeps the text and sentiment columns of every record, renames them to
//! [`TEXT_COLUMN`] and [`SENTIMENT_COLUMN`] and strips HTML from the text.

use serde_json::{Map, Value};

use sentiq_common::text::clean_value;

use crate::error::{ClientError, ClientResult};

pub const TEXT_COLUMN: &str = "TextAnalyze";
pub const SENTIMENT_COLUMN: &str = "Sentiment";

/// One row of a tabular dataset
pub type Record = Map<String, Value>;

/// Column names across all records, in order of first appearance
pub fn available_columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Select, rename and clean the two dataset columns
pub fn prepare_records(
    records: &[Record],
    text_column: &str,
    sentiment_column: &str,
) -> ClientResult<Vec<Record>> {
    if text_column.trim().is_empty() || sentiment_column.trim().is_empty() {
        return Err(ClientError::InvalidInput(
            "text_column and sentiment_column are required".to_string(),
        ));
    }

    let present_everywhere = |column: &str| {
        !records.is_empty() && records.iter().all(|record| record.contains_key(column))
    };
    if !present_everywhere(text_column) || !present_everywhere(sentiment_column) {
        return Err(ClientError::InvalidInput(format!(
            "Columns '{}' and '{}' must exist in every record. Available: {:?}",
            text_column,
            sentiment_column,
            available_columns(records)
        )));
    }

    Ok(records
        .iter()
        .map(|record| {
            let mut prepared = Record::new();
            prepared.insert(TEXT_COLUMN.to_string(), clean_value(&record[text_column]));
            prepared.insert(SENTIMENT_COLUMN.to_string(), record[sentiment_column].clone());
            prepared
        })
        .collect())
}
