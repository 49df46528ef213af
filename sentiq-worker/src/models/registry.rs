//! Model registry
//!
//! Owned by the worker and shared with the handlers through an `Arc`. Models
//! are keyed by [`ModelSource::key`] and kept according to the configured
//! [`CachePolicy`]:
//!
//! - `load_once`: a model is built on first use and kept for the life of the worker
//! - `evict_on_idle(secs)`: models unused for `secs` are dropped on the next lookup
//! - `always_reload`: nothing is cached
//!
//! Loading happens while the cache lock is held. The dispatch loop is
//! sequential, so lookups never contend in practice.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use sentiq_common::config::{CachePolicy, ModelConfig};

use super::ensemble::{EnsembleLoader, EnsembleModel, LexiconEnsembleLoader};
use super::lexicon::LexiconLoader;
use super::{Device, ModelLoader, ModelSource, SentimentModel};
use crate::error::ModelError;

/// Extension identifying checkpoint files
pub const CHECKPOINT_EXTENSION: &str = ".ckpt";

/// Checkpoint file names in `dir`, sorted; a missing directory yields none
pub fn list_available_checkpoints(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No checkpoints in {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(CHECKPOINT_EXTENSION))
        .collect();
    names.sort();
    names
}

struct CachedModel {
    model: Arc<dyn SentimentModel>,
    last_used: Instant,
}

struct CachedEnsemble {
    model: Arc<EnsembleModel>,
    last_used: Instant,
}

#[derive(Default)]
struct Cache {
    models: HashMap<String, CachedModel>,
    ensemble: Option<CachedEnsemble>,
}

pub struct ModelRegistry {
    config: ModelConfig,
    loader: Arc<dyn ModelLoader>,
    ensemble_loader: Arc<dyn EnsembleLoader>,
    cache: Mutex<Cache>,
}

impl ModelRegistry {
    /// Registry using the lexicon loaders
    pub fn new(config: ModelConfig) -> Self {
        Self::with_loaders(
            config,
            Arc::new(LexiconLoader),
            Arc::new(LexiconEnsembleLoader),
        )
    }

    pub fn with_loaders(
        config: ModelConfig,
        loader: Arc<dyn ModelLoader>,
        ensemble_loader: Arc<dyn EnsembleLoader>,
    ) -> Self {
        Self {
            config,
            loader,
            ensemble_loader,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Checkpoints currently present in `models.checkpoints_dir`
    pub fn available_checkpoints(&self) -> Vec<String> {
        list_available_checkpoints(&self.config.checkpoints_dir)
    }

    /// Map a requested model name onto a source
    ///
    /// No name means the default model. A name must be one of the available
    /// checkpoints.
    pub fn source_for(&self, requested: Option<&str>) -> Result<ModelSource, ModelError> {
        let requested = match requested.map(str::trim) {
            None | Some("") => return Ok(ModelSource::Default(self.config.default_model.clone())),
            Some(name) => name,
        };

        let available = self.available_checkpoints();
        if !available.iter().any(|name| name == requested) {
            return Err(ModelError::Unavailable {
                requested: requested.to_string(),
                available,
            });
        }
        Ok(ModelSource::Checkpoint(self.config.checkpoints_dir.join(requested)))
    }

    /// Model for a request, loading it if the cache policy requires
    pub fn resolve(&self, requested: Option<&str>) -> Result<Arc<dyn SentimentModel>, ModelError> {
        let source = self.source_for(requested)?;

        if self.config.cache_policy == CachePolicy::AlwaysReload {
            debug!("Loading {} (always_reload)", source);
            return self.loader.load(&source, self.device());
        }

        let now = Instant::now();
        let mut cache = self.lock();
        self.evict_expired(&mut cache, now);

        let key = source.key();
        if let Some(cached) = cache.models.get_mut(&key) {
            cached.last_used = now;
            return Ok(cached.model.clone());
        }

        info!("Loading model {} on {}", source, self.device());
        let model = self.loader.load(&source, self.device())?;
        cache.models.insert(key, CachedModel { model: model.clone(), last_used: now });
        Ok(model)
    }

    /// The ensemble, built around the default model
    pub fn ensemble(&self) -> Result<Arc<EnsembleModel>, ModelError> {
        if self.config.cache_policy == CachePolicy::AlwaysReload {
            return self.build_ensemble();
        }

        let now = Instant::now();
        {
            let mut cache = self.lock();
            self.evict_expired(&mut cache, now);
            if let Some(cached) = cache.ensemble.as_mut() {
                cached.last_used = now;
                return Ok(cached.model.clone());
            }
        }

        // Built outside the lock; resolving the primary model takes it again.
        let model = self.build_ensemble()?;
        let mut cache = self.lock();
        let cached = cache.ensemble.get_or_insert(CachedEnsemble { model, last_used: now });
        Ok(cached.model.clone())
    }

    /// Drop models idle longer than the `evict_on_idle` window
    ///
    /// Returns how many entries were dropped. A no-op for other policies.
    pub fn evict_idle(&self) -> usize {
        let mut cache = self.lock();
        self.evict_expired(&mut cache, Instant::now())
    }

    /// Cache keys of the loaded models, sorted
    pub fn loaded_models(&self) -> Vec<String> {
        let cache = self.lock();
        let mut keys: Vec<String> = cache.models.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn ensemble_loaded(&self) -> bool {
        self.lock().ensemble.is_some()
    }

    fn device(&self) -> Device {
        Device::from_index(self.config.device)
    }

    fn build_ensemble(&self) -> Result<Arc<EnsembleModel>, ModelError> {
        let primary = self.resolve(None)?;
        let ensemble = self.ensemble_loader.load(&self.config.cache_dir, primary)?;
        Ok(Arc::new(ensemble))
    }

    fn evict_expired(&self, cache: &mut Cache, now: Instant) -> usize {
        let CachePolicy::EvictOnIdle(secs) = self.config.cache_policy else {
            return 0;
        };
        let idle = Duration::from_secs(secs);
        let expired = |last_used: Instant| now.saturating_duration_since(last_used) >= idle;

        let before = cache.models.len();
        cache.models.retain(|key, cached| {
            let keep = !expired(cached.last_used);
            if !keep {
                info!("Evicting idle model {}", key);
            }
            keep
        });
        let mut evicted = before - cache.models.len();

        if cache.ensemble.as_ref().is_some_and(|e| expired(e.last_used)) {
            info!("Evicting idle ensemble");
            cache.ensemble = None;
            evicted += 1;
        }
        evicted
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        // Entries are independent; a poisoned lock is still usable.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field("loaded", &self.loaded_models())
            .finish()
    }
}
