//! Worker dispatch loop
//!
//! Reads tasks from the request topics as one consumer group, one at a time:
//! decode, look up the handler, run it, publish exactly one response, commit.
//! A task is fully answered before the next one is read.
//!
//! Failures stay inside the task that caused them. Handler errors and panics
//! become error responses. Any JSON object is answered, even one whose `type`
//! is missing or not a string; only payloads that are not JSON objects are
//! logged and skipped. Only transport failures end the loop.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentiq_common::config::{SentiqConfig, TopicConfig, WorkerConfig};
use sentiq_common::message::{ErrorKind, Response, Task, UNKNOWN_TASK_TYPE};
use sentiq_common::transport::{Delivery, SubscribeOptions, Transport};
use sentiq_common::Result;

use crate::handlers::HandlerRegistry;
use crate::models::registry::ModelRegistry;
use crate::stats::WorkerStats;

/// Sequential task worker
pub struct Worker {
    transport: Arc<dyn Transport>,
    handlers: HandlerRegistry,
    topics: TopicConfig,
    options: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
        topics: TopicConfig,
        options: WorkerConfig,
    ) -> Self {
        Self {
            transport,
            handlers,
            topics,
            options,
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// Worker with every built-in handler, sharing one model registry
    pub fn from_config(transport: Arc<dyn Transport>, config: &SentiqConfig) -> Self {
        let models = Arc::new(ModelRegistry::new(config.models.clone()));
        Self::with_model_registry(transport, config, models)
    }

    pub fn with_model_registry(
        transport: Arc<dyn Transport>,
        config: &SentiqConfig,
        models: Arc<ModelRegistry>,
    ) -> Self {
        let handlers = HandlerRegistry::standard(models, &config.topics, &config.inference);
        Self::new(transport, handlers, config.topics.clone(), config.worker.clone())
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// Cancellation is observed between tasks; a task being handled is
    /// always answered first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let topics = self.topics.request_topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let options = SubscribeOptions::earliest().with_group(self.options.group.clone());
        let mut subscription = self.transport.subscribe(&topic_refs, options).await?;

        info!(
            group = %self.options.group,
            topics = ?topics,
            handlers = ?self.handlers.task_types(),
            "Worker started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = subscription.next(self.options.poll_interval()) => next?,
            };

            let Some(delivery) = next else {
                continue;
            };

            self.process_delivery(&delivery).await?;
            subscription.commit().await?;
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Answer one delivered message
    ///
    /// Returns the topic the response went to, or `None` when the message
    /// is not a JSON object.
    pub async fn process_delivery(&self, delivery: &Delivery) -> Result<Option<String>> {
        let task: Task = match serde_json::from_str(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    "Skipping undecodable message: {}",
                    e
                );
                self.stats.record_undecodable();
                return Ok(None);
            }
        };

        debug!(
            topic = %delivery.topic,
            offset = delivery.offset,
            task_type = %task.kind,
            "Received task"
        );

        let (reply_topic, response) = self.dispatch(task).await;
        let payload = serde_json::to_string(&response)?;
        self.transport.publish(&reply_topic, payload).await?;
        Ok(Some(reply_topic))
    }

    /// Run the handler for a task and build its response
    ///
    /// Returns the reply topic with the response. Never fails: every outcome
    /// of the handler, including a panic, is a response.
    pub async fn dispatch(&self, task: Task) -> (String, Response) {
        let Task {
            kind,
            correlation_id,
            reply_to,
            payload,
        } = task;
        let reply_to = reply_to.filter(|topic| !topic.trim().is_empty());

        let Some(handler) = self.handlers.get(&kind) else {
            warn!(task_type = %kind, "Unknown task type");
            self.stats.record_unknown();
            let topic = reply_to.unwrap_or_else(|| self.topics.unknown_response.clone());
            let response =
                Response::failure(correlation_id, ErrorKind::UnknownTaskType, UNKNOWN_TASK_TYPE);
            return (topic, response);
        };

        let topic = reply_to.unwrap_or_else(|| handler.default_reply_topic().to_string());
        let outcome = AssertUnwindSafe(handler.handle(payload)).catch_unwind().await;

        let response = match outcome {
            Ok(Ok(body)) => {
                self.stats.record_success();
                Response::success(correlation_id, body)
            }
            Ok(Err(e)) => {
                warn!(task_type = %kind, kind = %e.kind(), "Task failed: {}", e);
                self.stats.record_failure();
                Response::failure(correlation_id, e.kind(), e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task_type = %kind, "Handler panicked: {}", message);
                self.stats.record_failure();
                Response::failure(
                    correlation_id,
                    ErrorKind::Internal,
                    format!("Handler panicked: {}", message),
                )
            }
        };
        (topic, response)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::{Fields, TaskHandler};
    use async_trait::async_trait;
    use sentiq_common::message::CorrelationId;
    use sentiq_common::transport::MemoryBroker;
    use serde_json::json;

    struct Panics;

    #[async_trait]
    impl TaskHandler for Panics {
        fn task_type(&self) -> &'static str {
            "explode"
        }

        fn default_reply_topic(&self) -> &str {
            "explode_response"
        }

        async fn handle(&self, _payload: Fields) -> std::result::Result<Fields, HandlerError> {
            panic!("kaboom");
        }
    }

    fn worker(handlers: HandlerRegistry) -> Worker {
        Worker::new(
            Arc::new(MemoryBroker::new(100)),
            handlers,
            TopicConfig::default(),
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_type_goes_to_unknown_response_topic() {
        let worker = worker(HandlerRegistry::new());
        let id = CorrelationId::generate();
        let mut task = Task::new("train_model");
        task.correlation_id = Some(id.clone());

        let (topic, response) = worker.dispatch(task).await;
        assert_eq!(topic, "unknown_response");
        assert!(response.answers(&id));
        assert_eq!(response.error(), Some(UNKNOWN_TASK_TYPE));
        assert_eq!(response.error_kind(), Some(ErrorKind::UnknownTaskType));
        assert_eq!(worker.stats().snapshot().unknown, 1);
    }

    #[tokio::test]
    async fn test_reply_to_overrides_default_topic() {
        let worker = worker(HandlerRegistry::new());
        let mut task = Task::new("nope");
        task.reply_to = Some("mine".to_string());
        assert_eq!(worker.dispatch(task).await.0, "mine");

        let mut blank = Task::new("nope");
        blank.reply_to = Some(String::new());
        assert_eq!(worker.dispatch(blank).await.0, "unknown_response");
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_error() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Panics);
        let worker = worker(handlers);

        let (topic, response) = worker.dispatch(Task::new("explode")).await;
        assert_eq!(topic, "explode_response");
        assert_eq!(response.error_kind(), Some(ErrorKind::Internal));
        assert!(response.error().unwrap().contains("kaboom"));
        assert_eq!(worker.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped_without_reply() {
        let broker = MemoryBroker::new(100);
        let worker = Worker::new(
            Arc::new(broker.clone()),
            HandlerRegistry::new(),
            TopicConfig::default(),
            WorkerConfig::default(),
        );

        for payload in ["not json", "[1, 2]", "\"text\""] {
            let delivery = Delivery {
                topic: "inference_request".to_string(),
                offset: 0,
                payload: payload.to_string(),
            };
            assert_eq!(worker.process_delivery(&delivery).await.unwrap(), None);
        }
        assert_eq!(broker.end_offset("unknown_response"), 0);
        assert_eq!(worker.stats().snapshot().undecodable, 3);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(json!(1));
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
