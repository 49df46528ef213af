//! In-process deployment
//!
//! One broker, one worker loop on a background task and a client, all
//! sharing the same configuration. Used by the `sentiq` binary.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sentiq_common::config::SentiqConfig;
use sentiq_common::transport::{MemoryBroker, Transport};
use sentiq_worker::{ModelRegistry, StatsSnapshot, Worker, WorkerStats};

use crate::client::SentimentClient;

pub struct LocalService {
    broker: MemoryBroker,
    client: SentimentClient,
    models: Arc<ModelRegistry>,
    stats: Arc<WorkerStats>,
    shutdown: CancellationToken,
    worker: JoinHandle<sentiq_common::Result<()>>,
}

impl LocalService {
    /// Start the worker loop; must be called inside a Tokio runtime
    pub fn start(config: &SentiqConfig) -> Self {
        let broker = MemoryBroker::new(config.broker.retention);
        let transport: Arc<dyn Transport> = Arc::new(broker.clone());

        let models = Arc::new(ModelRegistry::new(config.models.clone()));
        let worker = Worker::with_model_registry(transport.clone(), config, models.clone());
        let stats = worker.stats();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let worker = tokio::spawn(async move { worker.run(token).await });
        info!("In-process worker started");

        Self {
            broker,
            client: SentimentClient::from_config(transport, config),
            models,
            stats,
            shutdown,
            worker,
        }
    }

    pub fn client(&self) -> &SentimentClient {
        &self.client
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the worker and wait for its loop to exit
    pub async fn shutdown(self) -> Result<StatsSnapshot> {
        self.shutdown.cancel();
        self.worker
            .await
            .context("Worker task failed")?
            .context("Worker loop failed")?;
        let stats = self.stats.snapshot();
        info!(processed = stats.processed, failed = stats.failed, "In-process worker stopped");
        Ok(stats)
    }
}
