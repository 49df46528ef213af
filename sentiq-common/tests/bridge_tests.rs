//! Correlation bridge integration tests against the in-memory broker
//!
//! Tests cover:
//! - Replies are joined on correlation id only
//! - A reply published before the listener attaches is still delivered
//! - Timeout is raised after (and shortly after) the configured window
//! - Concurrent callers sharing one response topic never see each other's reply

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sentiq_common::message::{CorrelationId, Response, Task};
use sentiq_common::transport::{Delivery, MemoryBroker, SubscribeOptions, Subscription, Transport};
use sentiq_common::{BridgeError, CorrelationBridge};
use std::sync::Arc;
use std::time::{Duration, Instant};

const REQUESTS: &str = "requests";
const REPLIES: &str = "replies";

/// Test helper: spawn a responder that answers every task with `{echo: <payload>}`
fn spawn_echo_responder(broker: MemoryBroker) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = broker
            .subscribe(&[REQUESTS], SubscribeOptions::earliest())
            .await
            .expect("subscribe requests");
        while let Ok(Some(delivery)) = sub.next(Duration::from_secs(5)).await {
            let task: Task = serde_json::from_str(&delivery.payload).expect("decode task");
            let reply_to = task.reply_to.clone().expect("bridge sets reply_to");
            let mut body = Map::new();
            body.insert("echo".to_string(), Value::Object(task.payload.clone()));
            let response = Response::success(task.correlation_id.clone(), body);
            broker
                .publish(&reply_to, serde_json::to_string(&response).unwrap())
                .await
                .expect("publish reply");
        }
    })
}

#[tokio::test]
async fn test_call_returns_matching_response() {
    let broker = MemoryBroker::new(100);
    let _responder = spawn_echo_responder(broker.clone());
    let bridge = CorrelationBridge::new(Arc::new(broker.clone()));

    let task = Task::new("echo").with_field("n", 7);
    let response = bridge
        .call(task, REQUESTS, REPLIES, Duration::from_secs(2))
        .await
        .expect("call should succeed");

    assert_eq!(response.get("echo"), Some(&json!({"n": 7})));
    assert!(response.correlation_id.is_some());
}

#[tokio::test]
async fn test_call_stamps_correlation_id_and_reply_to() {
    let broker = MemoryBroker::new(100);
    let _responder = spawn_echo_responder(broker.clone());
    let bridge = CorrelationBridge::new(Arc::new(broker.clone()));

    let mut task = Task::new("echo");
    task.reply_to = Some("ignored".to_string());
    task.correlation_id = Some(CorrelationId::from("stale"));
    let response = bridge
        .call(task, REQUESTS, REPLIES, Duration::from_secs(2))
        .await
        .unwrap();

    let mut sub = broker.subscribe(&[REQUESTS], SubscribeOptions::earliest()).await.unwrap();
    let sent: Task = serde_json::from_str(&sub.next(Duration::from_millis(50)).await.unwrap().unwrap().payload).unwrap();
    assert_eq!(sent.reply_to.as_deref(), Some(REPLIES));
    assert_ne!(sent.correlation_id, Some(CorrelationId::from("stale")));
    assert_eq!(sent.correlation_id, response.correlation_id);
}

#[tokio::test]
async fn test_stale_replies_for_other_calls_are_skipped() {
    let broker = MemoryBroker::new(100);
    for n in 0..3 {
        let stale = Response::success(Some(CorrelationId::generate()), Map::new());
        let mut stale_json = serde_json::to_value(&stale).unwrap();
        stale_json["n"] = json!(n);
        broker.publish(REPLIES, stale_json.to_string()).await.unwrap();
    }
    broker.publish(REPLIES, "garbage".to_string()).await.unwrap();

    let _responder = spawn_echo_responder(broker.clone());
    let bridge = CorrelationBridge::new(Arc::new(broker.clone()));

    let response = bridge
        .call(Task::new("echo"), REQUESTS, REPLIES, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(response.get("n").is_none());
    assert!(response.get("echo").is_some());
}

#[tokio::test]
async fn test_handler_error_fields_are_passed_through() {
    let broker = MemoryBroker::new(100);
    let responder = broker.clone();
    tokio::spawn(async move {
        let mut sub = responder.subscribe(&[REQUESTS], SubscribeOptions::earliest()).await.unwrap();
        let delivery = sub.next(Duration::from_secs(5)).await.unwrap().unwrap();
        let task: Task = serde_json::from_str(&delivery.payload).unwrap();
        let response = Response::failure(
            task.correlation_id,
            sentiq_common::ErrorKind::Validation,
            "text is required",
        );
        responder
            .publish(REPLIES, serde_json::to_string(&response).unwrap())
            .await
            .unwrap();
    });

    let bridge = CorrelationBridge::new(Arc::new(broker));
    let response = bridge
        .call(Task::new("predict_text"), REQUESTS, REPLIES, Duration::from_secs(2))
        .await
        .expect("error responses are still responses");

    assert_eq!(response.error(), Some("text is required"));
    assert_eq!(response.error_kind(), Some(sentiq_common::ErrorKind::Validation));
}

#[tokio::test]
async fn test_timeout_is_not_early_and_not_late() {
    let broker = MemoryBroker::new(100);
    let bridge = CorrelationBridge::new(Arc::new(broker.clone()));
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let err = bridge
        .call(Task::new("echo"), REQUESTS, REPLIES, timeout)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert!(elapsed >= timeout, "timed out early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(500), "timed out late after {elapsed:?}");

    // The task stays published; nothing is retracted.
    assert_eq!(broker.end_offset(REQUESTS), 1);
}

#[tokio::test]
async fn test_timeout_holds_even_with_unrelated_traffic() {
    let broker = MemoryBroker::new(1000);
    let noise = broker.clone();
    let noise_task = tokio::spawn(async move {
        for _ in 0..40 {
            let other = Response::success(Some(CorrelationId::generate()), Map::new());
            noise.publish(REPLIES, serde_json::to_string(&other).unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let bridge = CorrelationBridge::new(Arc::new(broker));
    let timeout = Duration::from_millis(150);
    let started = Instant::now();
    let err = bridge.call(Task::new("echo"), REQUESTS, REPLIES, timeout).await.unwrap_err();

    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert!(started.elapsed() < timeout + Duration::from_millis(500));
    noise_task.abort();
}

/// Transport wrapper that answers a request synchronously inside `publish`,
/// so the reply exists before the bridge has opened its listener.
struct ReplyBeforeListen {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for ReplyBeforeListen {
    async fn publish(&self, topic: &str, payload: String) -> sentiq_common::Result<u64> {
        let offset = self.broker.publish(topic, payload.clone()).await?;
        if topic == REQUESTS {
            let task: Task = serde_json::from_str(&payload)?;
            let mut body = Map::new();
            body.insert("early".to_string(), Value::Bool(true));
            let response = Response::success(task.correlation_id, body);
            let reply_to = task.reply_to.unwrap_or_else(|| REPLIES.to_string());
            self.broker.publish(&reply_to, serde_json::to_string(&response)?).await?;
        }
        Ok(offset)
    }

    async fn subscribe(
        &self,
        topics: &[&str],
        options: SubscribeOptions,
    ) -> sentiq_common::Result<Box<dyn Subscription>> {
        self.broker.subscribe(topics, options).await
    }
}

#[tokio::test]
async fn test_reply_published_before_listener_attaches_is_delivered() {
    let broker = MemoryBroker::new(100);
    let transport = ReplyBeforeListen { broker: broker.clone() };
    let bridge = CorrelationBridge::new(Arc::new(transport));

    let response = bridge
        .call(Task::new("echo"), REQUESTS, REPLIES, Duration::from_millis(500))
        .await
        .expect("early reply must not be missed");

    assert_eq!(response.get("early"), Some(&Value::Bool(true)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_receive_only_their_own_reply() {
    let broker = MemoryBroker::new(100);

    // Responder waits for both tasks, then answers in reverse order so the
    // replies are interleaved relative to the calls.
    let responder = broker.clone();
    tokio::spawn(async move {
        let mut sub = responder.subscribe(&[REQUESTS], SubscribeOptions::earliest()).await.unwrap();
        let mut tasks: Vec<Delivery> = Vec::new();
        while tasks.len() < 2 {
            if let Some(delivery) = sub.next(Duration::from_secs(5)).await.unwrap() {
                tasks.push(delivery);
            }
        }
        for delivery in tasks.into_iter().rev() {
            let task: Task = serde_json::from_str(&delivery.payload).unwrap();
            let mut body = Map::new();
            body.insert("who".to_string(), task.payload["who"].clone());
            let response = Response::success(task.correlation_id, body);
            responder.publish(REPLIES, serde_json::to_string(&response).unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let bridge = CorrelationBridge::new(Arc::new(broker));
    let alice = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .call(Task::new("echo").with_field("who", "alice"), REQUESTS, REPLIES, Duration::from_secs(3))
                .await
        })
    };
    let bob = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .call(Task::new("echo").with_field("who", "bob"), REQUESTS, REPLIES, Duration::from_secs(3))
                .await
        })
    };

    let alice = alice.await.unwrap().expect("alice reply");
    let bob = bob.await.unwrap().expect("bob reply");

    assert_eq!(alice.get("who"), Some(&json!("alice")));
    assert_eq!(bob.get("who"), Some(&json!("bob")));
    assert_ne!(alice.correlation_id, bob.correlation_id);
}
