//! Sentiment models
//!
//! Models are strategies behind [`SentimentModel`]; the worker never knows
//! which inference backend sits behind one. [`ModelLoader`] builds a model
//! from a [`ModelSource`], and [`registry::ModelRegistry`] caches the results.

pub mod ensemble;
pub mod lexicon;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ModelError;

/// Labels produced by the sentiment models
pub mod labels {
    pub const POSITIVE: &str = "POSITIVE";
    pub const NEGATIVE: &str = "NEGATIVE";
    pub const NEUTRAL: &str = "NEUTRAL";
}

/// One classification result, shaped like a pipeline output (`{label, score}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self { label: label.into(), score }
    }
}

/// A loaded sentiment classifier
pub trait SentimentModel: Send + Sync {
    /// Classify a single text
    fn predict(&self, text: &str) -> Result<Prediction, ModelError>;

    /// Classify several texts, preserving order
    fn predict_batch(&self, texts: &[String]) -> Result<Vec<Prediction>, ModelError> {
        texts.iter().map(|text| self.predict(text)).collect()
    }
}

/// Where a model comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelSource {
    /// The configured default model, by name
    Default(String),
    /// A fine-tuned checkpoint file
    Checkpoint(PathBuf),
}

impl ModelSource {
    /// Cache key for this source
    pub fn key(&self) -> String {
        match self {
            ModelSource::Default(name) => format!("default:{}", name),
            ModelSource::Checkpoint(path) => format!("checkpoint:{}", path.display()),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Default(name) => f.write_str(name),
            ModelSource::Checkpoint(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Compute device a model is placed on (`models.device`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl Device {
    /// Negative indices mean CPU
    pub fn from_index(index: i32) -> Self {
        u32::try_from(index).map(Device::Gpu).unwrap_or(Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu(index) => write!(f, "gpu:{}", index),
        }
    }
}

/// Builds models from sources
pub trait ModelLoader: Send + Sync {
    fn load(&self, source: &ModelSource, device: Device)
        -> Result<Arc<dyn SentimentModel>, ModelError>;
}
