//! Correlation bridge: synchronous request/response over pub/sub
//!
//! A call mints a fresh [`CorrelationId`], stamps it and the reply topic on
//! the task, publishes the task, then opens a dedicated subscription on the
//! reply topic starting at the earliest retained offset and scans until a
//! response carrying the same id shows up or the timeout elapses.
//!
//! Reading from the earliest offset means a reply published before the
//! listener attached is still found, at the cost of re-scanning older
//! replies still retained by the topic.
//!
//! The wait itself is the [`PendingCall`] state machine
//! (`Idle → Listening → Matched | TimedOut`), kept separate from the I/O so
//! the timeout edges can be tested on their own.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::message::{CorrelationId, Response, Task};
use crate::transport::{SubscribeOptions, Transport};

/// Errors surfaced to the caller of [`CorrelationBridge::call`]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No matching response arrived in time
    ///
    /// The task has already been published and is not retracted; a late
    /// reply may still land on the response topic.
    #[error("Timeout waiting for response {correlation_id} after {waited:?}")]
    Timeout {
        correlation_id: CorrelationId,
        waited: Duration,
    },

    /// The transport failed to publish or subscribe
    #[error("Transport error: {0}")]
    Transport(#[source] crate::Error),

    /// The task could not be serialized
    #[error("Failed to encode task: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

/// State of one in-flight call
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    /// Task not yet published / listener not yet attached
    Idle,
    /// Scanning the response topic
    Listening,
    /// Matching response found
    Matched(Response),
    /// Deadline passed without a match
    TimedOut,
}

/// Wait-for-reply state machine for a single correlation id
#[derive(Debug)]
pub struct PendingCall {
    correlation_id: CorrelationId,
    timeout: Duration,
    deadline: Option<Instant>,
    state: CallState,
}

impl PendingCall {
    pub fn new(correlation_id: CorrelationId, timeout: Duration) -> Self {
        Self {
            correlation_id,
            timeout,
            deadline: None,
            state: CallState::Idle,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, CallState::Matched(_) | CallState::TimedOut)
    }

    /// Idle → Listening; the deadline starts counting at `now`
    pub fn listen(&mut self, now: Instant) {
        if self.state == CallState::Idle {
            self.deadline = Some(now + self.timeout);
            self.state = CallState::Listening;
        }
    }

    /// Time left before the deadline (zero unless listening)
    pub fn remaining(&self, now: Instant) -> Duration {
        match (&self.state, self.deadline) {
            (CallState::Listening, Some(deadline)) => deadline.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Feed one raw message from the response topic
    ///
    /// Listening → Matched when the message is a response for this call.
    /// Anything else (other ids, undecodable payloads) is ignored.
    /// Returns true if the call is now matched.
    pub fn observe(&mut self, payload: &str) -> bool {
        if self.state != CallState::Listening {
            return matches!(self.state, CallState::Matched(_));
        }
        match serde_json::from_str::<Response>(payload) {
            Ok(response) if response.answers(&self.correlation_id) => {
                self.state = CallState::Matched(response);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(correlation_id = %self.correlation_id, "Skipping undecodable reply: {}", e);
                false
            }
        }
    }

    /// Listening → TimedOut once `now` has reached the deadline
    ///
    /// Returns true if the call is now timed out.
    pub fn expire(&mut self, now: Instant) -> bool {
        let due = self.deadline.is_some_and(|deadline| now >= deadline);
        if self.state == CallState::Listening && due {
            self.state = CallState::TimedOut;
        }
        self.state == CallState::TimedOut
    }

    /// Final outcome of the call
    pub fn finish(self) -> Result<Response, BridgeError> {
        match self.state {
            CallState::Matched(response) => Ok(response),
            _ => Err(BridgeError::Timeout {
                correlation_id: self.correlation_id,
                waited: self.timeout,
            }),
        }
    }
}

/// Turns the fire-and-forget transport into a blocking call
#[derive(Clone)]
pub struct CorrelationBridge {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for CorrelationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationBridge").finish_non_exhaustive()
    }
}

impl CorrelationBridge {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Publish `task` to `request_topic` and wait for its reply on `response_topic`
    ///
    /// Any `correlation_id` / `reply_to` already on the task are overwritten.
    /// The matching response is returned as-is, including an `error` field
    /// if the worker reported one; only a missing reply is an error here.
    pub async fn call(
        &self,
        mut task: Task,
        request_topic: &str,
        response_topic: &str,
        timeout: Duration,
    ) -> Result<Response, BridgeError> {
        let correlation_id = CorrelationId::generate();
        task.correlation_id = Some(correlation_id.clone());
        task.reply_to = Some(response_topic.to_string());

        let payload = serde_json::to_string(&task)?;
        let mut call = PendingCall::new(correlation_id.clone(), timeout);

        self.transport
            .publish(request_topic, payload)
            .await
            .map_err(BridgeError::Transport)?;
        debug!(
            %correlation_id,
            task_type = task.kind.as_str(),
            request_topic,
            "Task published"
        );

        let mut subscription = self
            .transport
            .subscribe(&[response_topic], SubscribeOptions::earliest())
            .await
            .map_err(BridgeError::Transport)?;
        call.listen(Instant::now());

        while !call.is_finished() {
            let remaining = call.remaining(Instant::now());
            if remaining.is_zero() {
                call.expire(Instant::now());
                continue;
            }
            match subscription
                .next(remaining)
                .await
                .map_err(BridgeError::Transport)?
            {
                Some(delivery) => {
                    call.observe(&delivery.payload);
                }
                None => {
                    call.expire(Instant::now());
                }
            }
        }

        match call.finish() {
            Ok(response) => {
                info!(%correlation_id, response_topic, "Response received");
                Ok(response)
            }
            Err(e) => {
                warn!(%correlation_id, response_topic, ?timeout, "No response before timeout");
                Err(e)
            }
        }
    }
}
