//! Configuration loading
//!
//! One TOML bootstrap file, every field optional. Resolution order for the
//! file itself:
//! 1. Command-line argument (highest priority)
//! 2. `SENTIQ_CONFIG` environment variable
//! 3. User config directory (`~/.config/sentiq/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing default file is not an error: a warning is logged and the
//! compiled defaults are used. A file named explicitly (CLI or environment)
//! must exist and parse.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SENTIQ_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentiqConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub bridge: BridgeConfig,
    pub worker: WorkerConfig,
    pub models: ModelConfig,
    pub inference: InferenceConfig,
    pub logging: LoggingConfig,
}

/// In-memory broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Messages retained per topic before the oldest are dropped
    pub retention: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { retention: crate::transport::DEFAULT_RETENTION }
    }
}

/// Topic names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub dataset_request: String,
    pub dataset_response: String,
    pub inference_request: String,
    pub inference_response: String,
    /// Reply destination for unknown task types sent without `reply_to`
    pub unknown_response: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            dataset_request: "dataset_preparation".to_string(),
            dataset_response: "dataset_response".to_string(),
            inference_request: "inference_request".to_string(),
            inference_response: "inference_response".to_string(),
            unknown_response: "unknown_response".to_string(),
        }
    }
}

impl TopicConfig {
    /// Topics the worker consumes
    pub fn request_topics(&self) -> Vec<String> {
        vec![self.dataset_request.clone(), self.inference_request.clone()]
    }
}

/// Caller-side bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Dispatch loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consumer group used on the request topics
    pub group: String,
    /// How long one idle wait lasts before the loop re-checks for shutdown
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            group: "sentiq-worker".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// When loaded models are dropped from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Keep every model for the life of the worker
    #[default]
    LoadOnce,
    /// Drop a model not used for this many seconds
    EvictOnIdle(u64),
    /// Build a fresh model on every request
    AlwaysReload,
}

/// Model selection and storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model used when a task names no checkpoint
    pub default_model: String,
    /// Where downloaded models and ensemble parts live
    pub cache_dir: PathBuf,
    /// Where fine-tuned checkpoints (`*.ckpt`) live
    pub checkpoints_dir: PathBuf,
    pub cache_policy: CachePolicy,
    /// -1 for CPU, 0.. for a GPU index
    pub device: i32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: "blanchefort/rubert-base-cased-sentiment-rusentiment".to_string(),
            cache_dir: PathBuf::from("./models"),
            checkpoints_dir: PathBuf::from("./checkpoints"),
            cache_policy: CachePolicy::LoadOnce,
            device: -1,
        }
    }
}

/// Options applied to every inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Inputs longer than this (in characters) are truncated
    pub max_length: usize,
    /// Chunk size for batch inference
    pub batch_size: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { max_length: 512, batch_size: 16 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl SentiqConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load the configuration following the priority order above
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            info!("Loading config from command line: {}", path.display());
            return Self::from_path(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                info!("Loading config from {}: {}", CONFIG_ENV_VAR, path);
                return Self::from_path(Path::new(&path));
            }
        }

        // Priority 3: User config directory
        if let Some(path) = default_config_path() {
            if path.exists() {
                info!("Loading config from {}", path.display());
                return Self::from_path(&path);
            }
        }

        // Priority 4: Compiled defaults
        warn!("No config file found, using compiled defaults");
        Ok(Self::default())
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.broker.retention == 0 {
            return Err(Error::Config("broker.retention must be at least 1".to_string()));
        }
        if self.bridge.timeout_secs == 0 {
            return Err(Error::Config("bridge.timeout_secs must be at least 1".to_string()));
        }
        if self.inference.batch_size == 0 {
            return Err(Error::Config("inference.batch_size must be at least 1".to_string()));
        }
        if self.inference.max_length == 0 {
            return Err(Error::Config("inference.max_length must be at least 1".to_string()));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(Error::Config("worker.poll_interval_ms must be at least 1".to_string()));
        }
        let topics = [
            &self.topics.dataset_request,
            &self.topics.dataset_response,
            &self.topics.inference_request,
            &self.topics.inference_response,
            &self.topics.unknown_response,
        ];
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config("topic names must not be empty".to_string()));
        }
        Ok(())
    }
}

/// `<user config dir>/sentiq/config.toml`, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sentiq").join("config.toml"))
}
