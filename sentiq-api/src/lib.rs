//! sentiq-api library
//!
//! Caller side of the service: [`SentimentClient`] turns typed requests into
//! bridge calls and maps replies onto sentiment letters. [`LocalService`]
//! runs broker, worker and client in one process.

pub mod client;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod sentiment;
pub mod service;

pub use crate::client::SentimentClient;
pub use crate::dataset::{prepare_records, Record};
pub use crate::error::{ClientError, ClientResult};
pub use crate::sentiment::{ensemble_letter, sentiment_letter};
pub use crate::service::LocalService;
