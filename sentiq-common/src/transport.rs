//! Publish/subscribe transport
//!
//! [`Transport`] is the black-box contract the bridge and the worker rely on:
//! named topics, append-only delivery, independent subscriptions that can
//! start from the earliest retained message or from the end, and optional
//! consumer-group offset tracking.
//!
//! [`MemoryBroker`] is the in-process implementation. Each topic is a bounded
//! log; subscribers are woken through a `tokio::sync::watch` generation
//! counter, so a publish racing with a subscriber's scan is never missed.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Where a subscription without a committed group offset begins reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartFrom {
    /// Oldest message still retained by the topic
    #[default]
    Earliest,
    /// Only messages published after the subscription is opened
    Latest,
}

/// Options for [`Transport::subscribe`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub start: StartFrom,
    /// Consumer group; a committed group offset takes precedence over `start`
    pub group: Option<String>,
}

impl SubscribeOptions {
    pub fn earliest() -> Self {
        Self { start: StartFrom::Earliest, group: None }
    }

    pub fn latest() -> Self {
        Self { start: StartFrom::Latest, group: None }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// A message handed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub offset: u64,
    /// UTF-8 JSON text as published
    pub payload: String,
}

/// Publish/subscribe transport contract
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append `payload` to `topic`, returning the offset it was stored at
    async fn publish(&self, topic: &str, payload: String) -> Result<u64>;

    /// Open a new, independent subscription on one or more topics
    async fn subscribe(
        &self,
        topics: &[&str],
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>>;
}

/// An open subscription, consumed one message at a time
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message
    ///
    /// Returns `Ok(None)` when nothing arrives within `idle_timeout`.
    /// Cancel-safe: a message is only consumed when it is returned.
    async fn next(&mut self, idle_timeout: Duration) -> Result<Option<Delivery>>;

    /// Record the current position for the subscription's consumer group
    async fn commit(&mut self) -> Result<()>;
}

/// Default number of messages retained per topic
pub const DEFAULT_RETENTION: usize = 10_000;

/// In-process broker
///
/// Cloning is cheap; clones share the same topics.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    generation: watch::Sender<u64>,
    retention: usize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// (group, topic) -> next offset to read
    committed: HashMap<(String, String), u64>,
}

#[derive(Default)]
struct TopicLog {
    /// Offset of `messages[0]`
    base_offset: u64,
    messages: VecDeque<Arc<str>>,
}

impl TopicLog {
    fn end_offset(&self) -> u64 {
        self.base_offset + self.messages.len() as u64
    }

    fn get(&self, offset: u64) -> Option<Arc<str>> {
        let index = offset.checked_sub(self.base_offset)?;
        self.messages.get(index as usize).cloned()
    }

    fn append(&mut self, payload: Arc<str>, retention: usize) -> u64 {
        let offset = self.end_offset();
        self.messages.push_back(payload);
        while self.messages.len() > retention {
            self.messages.pop_front();
            self.base_offset += 1;
        }
        offset
    }
}

impl MemoryBroker {
    /// Creates a broker keeping at most `retention` messages per topic
    pub fn new(retention: usize) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                generation,
                retention: retention.max(1),
            }),
        }
    }

    pub fn retention(&self) -> usize {
        self.inner.retention
    }

    /// Offset the next message published to `topic` will get
    pub fn end_offset(&self, topic: &str) -> u64 {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(TopicLog::end_offset)
            .unwrap_or(0)
    }

    /// Number of messages currently retained by `topic`
    pub fn retained(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|log| log.messages.len())
            .unwrap_or(0)
    }

    /// Committed offset of `group` on `topic`, if any
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<u64> {
        self.inner
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // Every critical section leaves the logs consistent; poisoning is ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<u64> {
        let offset = {
            let mut state = self.inner.lock();
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .append(Arc::from(payload), self.inner.retention)
        };
        self.inner.generation.send_modify(|generation| *generation += 1);
        debug!(topic, offset, "Published message");
        Ok(offset)
    }

    async fn subscribe(
        &self,
        topics: &[&str],
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        if topics.is_empty() {
            return Err(Error::InvalidInput("subscription needs at least one topic".to_string()));
        }

        // Take the receiver before reading offsets: anything published after
        // this point bumps a generation the receiver has not seen yet.
        let changes = self.inner.generation.subscribe();

        let cursors = {
            let state = self.inner.lock();
            topics
                .iter()
                .map(|topic| {
                    let committed = options.group.as_ref().and_then(|group| {
                        state
                            .committed
                            .get(&(group.clone(), topic.to_string()))
                            .copied()
                    });
                    let log = state.topics.get(*topic);
                    let start = committed.unwrap_or_else(|| match options.start {
                        StartFrom::Earliest => log.map(|l| l.base_offset).unwrap_or(0),
                        StartFrom::Latest => log.map(TopicLog::end_offset).unwrap_or(0),
                    });
                    (topic.to_string(), start)
                })
                .collect::<Vec<_>>()
        };

        debug!(?cursors, group = ?options.group, "Opened subscription");

        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            cursors,
            group: options.group,
            changes,
            next_topic: 0,
        }))
    }
}

/// Subscription handed out by [`MemoryBroker`]
struct MemorySubscription {
    inner: Arc<BrokerInner>,
    /// (topic, next offset to read)
    cursors: Vec<(String, u64)>,
    group: Option<String>,
    changes: watch::Receiver<u64>,
    /// Round-robin start index so one busy topic cannot starve the others
    next_topic: usize,
}

impl MemorySubscription {
    fn poll_ready(&mut self) -> Option<Delivery> {
        let state = self.inner.lock();
        let count = self.cursors.len();

        for step in 0..count {
            let index = (self.next_topic + step) % count;
            let (topic, cursor) = &mut self.cursors[index];
            let Some(log) = state.topics.get(topic.as_str()) else {
                continue;
            };

            if *cursor < log.base_offset {
                warn!(
                    topic = topic.as_str(),
                    skipped = log.base_offset - *cursor,
                    "Subscriber fell behind retention; skipping dropped messages"
                );
                *cursor = log.base_offset;
            }

            if let Some(payload) = log.get(*cursor) {
                let delivery = Delivery {
                    topic: topic.clone(),
                    offset: *cursor,
                    payload: payload.to_string(),
                };
                *cursor += 1;
                self.next_topic = (index + 1) % count;
                return Some(delivery);
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self, idle_timeout: Duration) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + idle_timeout;
        loop {
            if let Some(delivery) = self.poll_ready() {
                return Ok(Some(delivery));
            }
            match tokio::time::timeout_at(deadline, self.changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(Error::Transport("broker closed".to_string())),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(group) = &self.group else {
            return Err(Error::Transport("commit requires a consumer group".to_string()));
        };
        let mut state = self.inner.lock();
        for (topic, cursor) in &self.cursors {
            state.committed.insert((group.clone(), topic.clone()), *cursor);
        }
        Ok(())
    }
}
