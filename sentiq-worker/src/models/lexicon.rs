//! Keyword-count sentiment model
//!
//! Stand-in for a transformer pipeline: counts tokens that start with a
//! positive or negative stem and picks the side with more hits. The built-in
//! lexicon covers Russian and English; checkpoints are TOML files:
//!
//! ```toml
//! positive = ["хорош", "great"]
//! negative = ["плох", "awful"]
//! ```

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{labels, Device, ModelLoader, ModelSource, Prediction, SentimentModel};
use crate::error::ModelError;

const BUILTIN_POSITIVE: &[&str] = &[
    "хорош", "отличн", "прекрасн", "замечательн", "великолепн", "нрав", "любл", "рад",
    "спасиб", "удобн", "восторг", "супер", "лучш", "класс",
    "good", "great", "excellent", "love", "like", "nice", "happy", "thank", "awesome", "best",
];

const BUILTIN_NEGATIVE: &[&str] = &[
    "плох", "ужасн", "отвратит", "ненавиж", "разочаров", "груст", "зл", "худш", "проблем",
    "медленн", "кошмар", "обман",
    "bad", "awful", "terribl", "hate", "poor", "sad", "worst", "angry", "broken", "slow",
];

/// Lexicon file layout
#[derive(Debug, Deserialize)]
struct LexiconFile {
    #[serde(default)]
    positive: Vec<String>,
    #[serde(default)]
    negative: Vec<String>,
}

/// Stem-prefix keyword classifier
#[derive(Debug, Clone)]
pub struct LexiconModel {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl LexiconModel {
    pub fn new(positive: Vec<String>, negative: Vec<String>) -> Self {
        let normalize = |stems: Vec<String>| {
            stems
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            positive: normalize(positive),
            negative: normalize(negative),
        }
    }

    /// Model using the compiled-in lexicon
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_POSITIVE.iter().map(|s| s.to_string()).collect(),
            BUILTIN_NEGATIVE.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Load a TOML lexicon file
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let load_error = |message: String| ModelError::Load {
            source_name: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let file: LexiconFile = toml::from_str(&content).map_err(|e| load_error(e.to_string()))?;
        if file.positive.is_empty() && file.negative.is_empty() {
            return Err(load_error("lexicon has no positive or negative stems".to_string()));
        }
        Ok(Self::new(file.positive, file.negative))
    }

    fn hits(stems: &[String], token: &str) -> bool {
        stems.iter().any(|stem| token.starts_with(stem.as_str()))
    }
}

impl SentimentModel for LexiconModel {
    fn predict(&self, text: &str) -> Result<Prediction, ModelError> {
        let lowered = text.to_lowercase();
        let (mut positive, mut negative) = (0u32, 0u32);
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            if Self::hits(&self.positive, token) {
                positive += 1;
            } else if Self::hits(&self.negative, token) {
                negative += 1;
            }
        }

        let total = positive + negative;
        let prediction = if total == 0 {
            Prediction::new(labels::NEUTRAL, 1.0)
        } else if positive > negative {
            Prediction::new(labels::POSITIVE, positive as f32 / total as f32)
        } else if negative > positive {
            Prediction::new(labels::NEGATIVE, negative as f32 / total as f32)
        } else {
            Prediction::new(labels::NEUTRAL, 0.5)
        };
        Ok(prediction)
    }
}

/// Loader building [`LexiconModel`]s
///
/// The default source uses the built-in lexicon regardless of its name;
/// checkpoint sources are read as TOML lexicon files.
#[derive(Debug, Clone, Default)]
pub struct LexiconLoader;

impl ModelLoader for LexiconLoader {
    fn load(
        &self,
        source: &ModelSource,
        device: Device,
    ) -> Result<Arc<dyn SentimentModel>, ModelError> {
        if device != Device::Cpu {
            debug!("Lexicon models run on cpu; ignoring {}", device);
        }
        match source {
            ModelSource::Default(name) => {
                debug!("Using built-in lexicon for default model {}", name);
                Ok(Arc::new(LexiconModel::builtin()))
            }
            ModelSource::Checkpoint(path) => {
                let model = LexiconModel::from_file(path)?;
                info!("Loaded lexicon checkpoint {}", path.display());
                Ok(Arc::new(model))
            }
        }
    }
}
