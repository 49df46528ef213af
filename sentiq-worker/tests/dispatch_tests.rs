//! Worker loop integration tests against the in-memory broker
//!
//! Tests cover:
//! - Every registered type reaches its handler; unknown types get the standard error reply
//! - Tasks with a missing or non-string `type` are still answered
//! - A failing task does not stop the loop from answering the next one
//! - `prepare_dataset` returns its records unchanged through the bridge
//! - Committed progress survives a worker restart
//! - Cancellation stops the loop

use async_trait::async_trait;
use serde_json::{json, Value};
use sentiq_common::config::{SentiqConfig, TopicConfig, WorkerConfig};
use sentiq_common::message::{task_types, ErrorKind, Response, Task, UNKNOWN_TASK_TYPE};
use sentiq_common::transport::{Delivery, MemoryBroker, SubscribeOptions, Subscription, Transport};
use sentiq_common::CorrelationBridge;
use sentiq_worker::handlers::Fields;
use sentiq_worker::{HandlerError, HandlerRegistry, ModelRegistry, TaskHandler, Worker};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const REPLIES: &str = "test_replies";

/// Test helper: echoes its payload back under `echo`
struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    fn task_type(&self) -> &'static str {
        "echo"
    }

    fn default_reply_topic(&self) -> &str {
        "echo_response"
    }

    async fn handle(&self, payload: Fields) -> Result<Fields, HandlerError> {
        let mut result = Fields::new();
        result.insert("echo".to_string(), Value::Object(payload));
        Ok(result)
    }
}

/// Test helper: always rejects its payload
struct Reject;

#[async_trait]
impl TaskHandler for Reject {
    fn task_type(&self) -> &'static str {
        "reject"
    }

    fn default_reply_topic(&self) -> &str {
        "echo_response"
    }

    async fn handle(&self, _payload: Fields) -> Result<Fields, HandlerError> {
        Err(HandlerError::Validation("rejected".to_string()))
    }
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 20,
        ..WorkerConfig::default()
    }
}

fn echo_worker(broker: &MemoryBroker) -> Worker {
    let mut handlers = HandlerRegistry::new();
    handlers.register(Echo).register(Reject);
    Worker::new(
        Arc::new(broker.clone()),
        handlers,
        TopicConfig::default(),
        fast_worker_config(),
    )
}

/// Test helper: run a worker in the background until the returned token is cancelled
fn spawn_worker(worker: Worker) -> (CancellationToken, tokio::task::JoinHandle<sentiq_common::Result<()>>) {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });
    (shutdown, handle)
}

async fn publish_task(broker: &MemoryBroker, task: &Task) {
    broker
        .publish("inference_request", serde_json::to_string(task).unwrap())
        .await
        .unwrap();
}

async fn read_replies(broker: &MemoryBroker, topic: &str, count: usize) -> Vec<Response> {
    let mut sub = broker.subscribe(&[topic], SubscribeOptions::earliest()).await.unwrap();
    let mut replies = Vec::new();
    while replies.len() < count {
        let delivery = sub
            .next(Duration::from_secs(3))
            .await
            .unwrap()
            .expect("reply within timeout");
        replies.push(serde_json::from_str(&delivery.payload).unwrap());
    }
    replies
}

#[tokio::test]
async fn test_failed_task_does_not_block_the_next_one() {
    let broker = MemoryBroker::new(100);
    let (shutdown, handle) = spawn_worker(echo_worker(&broker));

    let mut bad = Task::new("no_such_type");
    bad.reply_to = Some(REPLIES.to_string());
    let mut rejected = Task::new("reject");
    rejected.reply_to = Some(REPLIES.to_string());
    let mut good = Task::new("echo").with_field("n", 1);
    good.reply_to = Some(REPLIES.to_string());

    publish_task(&broker, &bad).await;
    broker.publish("inference_request", "{broken".to_string()).await.unwrap();
    publish_task(&broker, &rejected).await;
    publish_task(&broker, &good).await;

    let replies = read_replies(&broker, REPLIES, 3).await;
    assert_eq!(replies[0].error(), Some(UNKNOWN_TASK_TYPE));
    assert_eq!(replies[1].error_kind(), Some(ErrorKind::Validation));
    assert!(!replies[2].is_error());
    assert_eq!(replies[2].get("echo"), Some(&json!({"n": 1})));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tasks_with_odd_envelopes_are_answered() {
    let broker = MemoryBroker::new(100);
    let worker = echo_worker(&broker);

    let payloads = [
        r#"{"type": 7, "correlation_id": "c1", "reply_to": "test_replies"}"#,
        r#"{"type": null, "correlation_id": "c2", "reply_to": "test_replies"}"#,
        r#"{"type": "x", "correlation_id": 42, "reply_to": "test_replies"}"#,
        r#"{"correlation_id": "c4", "reply_to": 5}"#,
    ];
    for (offset, payload) in payloads.iter().enumerate() {
        let delivery = Delivery {
            topic: "inference_request".to_string(),
            offset: offset as u64,
            payload: payload.to_string(),
        };
        worker.process_delivery(&delivery).await.unwrap();
    }

    let replies = read_replies(&broker, REPLIES, 3).await;
    for reply in &replies {
        assert_eq!(reply.error(), Some(UNKNOWN_TASK_TYPE));
        assert_eq!(reply.error_kind(), Some(ErrorKind::UnknownTaskType));
    }
    let ids: Vec<Value> = replies
        .iter()
        .map(|reply| serde_json::to_value(reply).unwrap()["correlation_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("c1"), json!("c2"), json!(42)]);

    let fallback = read_replies(&broker, "unknown_response", 1).await;
    assert_eq!(serde_json::to_value(&fallback[0]).unwrap()["correlation_id"], json!("c4"));
    assert_eq!(worker.stats().snapshot().unknown, 4);
    assert_eq!(worker.stats().snapshot().undecodable, 0);
}

#[tokio::test]
async fn test_replies_default_to_handler_topic() {
    let broker = MemoryBroker::new(100);
    let (shutdown, handle) = spawn_worker(echo_worker(&broker));

    publish_task(&broker, &Task::new("echo")).await;
    publish_task(&broker, &Task::new("mystery")).await;

    assert!(!read_replies(&broker, "echo_response", 1).await[0].is_error());
    assert_eq!(
        read_replies(&broker, "unknown_response", 1).await[0].error_kind(),
        Some(ErrorKind::UnknownTaskType)
    );

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_standard_worker_answers_every_known_type() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("classic.toml"), "positive = [\"good\"]\nnegative = [\"bad\"]\n").unwrap();
    let mut config = SentiqConfig::default();
    config.worker = fast_worker_config();
    config.models.cache_dir = dir.path().to_path_buf();
    config.models.checkpoints_dir = dir.path().join("checkpoints");

    let broker = MemoryBroker::new(100);
    let (shutdown, handle) = spawn_worker(Worker::from_config(Arc::new(broker.clone()), &config));
    let bridge = CorrelationBridge::new(Arc::new(broker));
    let timeout = Duration::from_secs(3);

    let cases = [
        (task_types::PREPARE_DATASET, json!({"data": []}), "processed_data"),
        (task_types::PREDICT_TEXT, json!({"text": "good"}), "result"),
        (task_types::PREDICT_FILE, json!({"texts": ["good", "bad"]}), "results"),
        (task_types::PREDICT_TEXT_ENSEMBLE, json!({"text": "good"}), "result"),
        (task_types::PREDICT_FILE_ENSEMBLE, json!({"texts": ["bad"]}), "results"),
    ];
    for (task_type, payload, field) in cases {
        let request_topic = if task_type == task_types::PREPARE_DATASET {
            &config.topics.dataset_request
        } else {
            &config.topics.inference_request
        };
        let task = Task::with_payload(task_type, &payload).unwrap();
        let response = bridge
            .call(task, request_topic, &config.topics.inference_response, timeout)
            .await
            .unwrap();
        assert!(!response.is_error(), "{task_type} failed: {:?}", response.error());
        assert!(response.get(field).is_some(), "{task_type} missing {field}");
    }

    let unknown = bridge
        .call(Task::new("train_model"), &config.topics.inference_request, "unknown_replies", timeout)
        .await
        .unwrap();
    assert_eq!(unknown.error(), Some(UNKNOWN_TASK_TYPE));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_prepare_dataset_round_trip_is_identity() {
    let broker = MemoryBroker::new(100);
    let config = SentiqConfig {
        worker: fast_worker_config(),
        ..SentiqConfig::default()
    };
    let models = Arc::new(ModelRegistry::new(config.models.clone()));
    let worker = Worker::with_model_registry(Arc::new(broker.clone()), &config, models);
    let (shutdown, handle) = spawn_worker(worker);

    let records = json!([
        {"TextAnalyze": "  <b>hi</b>  ", "Sentiment": 1},
        {"TextAnalyze": "Хороший товар", "Sentiment": "G"},
        {"TextAnalyze": "", "Sentiment": null}
    ]);
    let task = Task::new(task_types::PREPARE_DATASET).with_field("data", records.clone());
    let response = CorrelationBridge::new(Arc::new(broker))
        .call(
            task,
            &config.topics.dataset_request,
            &config.topics.dataset_response,
            Duration::from_secs(3),
        )
        .await
        .unwrap();

    assert_eq!(response.get("processed_data"), Some(&records));
    let first = &response.get("processed_data").unwrap()[0];
    assert_eq!(first["TextAnalyze"].as_str(), Some("  <b>hi</b>  "));
    assert_eq!(first["Sentiment"].as_u64(), Some(1));
    assert_eq!(first.as_object().unwrap().len(), 2);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_restarted_worker_resumes_after_committed_tasks() {
    let broker = MemoryBroker::new(100);
    let mut first = Task::new("echo").with_field("n", 1);
    first.reply_to = Some(REPLIES.to_string());
    publish_task(&broker, &first).await;

    let (shutdown, handle) = spawn_worker(echo_worker(&broker));
    read_replies(&broker, REPLIES, 1).await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(broker.committed_offset("sentiq-worker", "inference_request"), Some(1));

    let mut second = Task::new("echo").with_field("n", 2);
    second.reply_to = Some(REPLIES.to_string());
    publish_task(&broker, &second).await;

    let (shutdown, handle) = spawn_worker(echo_worker(&broker));
    let replies = read_replies(&broker, REPLIES, 2).await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(replies[1].get("echo"), Some(&json!({"n": 2})));
    // Give a late duplicate a chance to show up before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.end_offset(REPLIES), 2);
}

#[tokio::test]
async fn test_cancelled_worker_stops_promptly() {
    let broker = MemoryBroker::new(100);
    let worker = Worker::new(
        Arc::new(broker),
        HandlerRegistry::new(),
        TopicConfig::default(),
        WorkerConfig {
            poll_interval_ms: 60_000,
            ..WorkerConfig::default()
        },
    );
    let (shutdown, handle) = spawn_worker(worker);

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(result.is_ok(), "worker ignored cancellation");
}
