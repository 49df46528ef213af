//! # Sentiq Common Library
//!
//! Shared code for the sentiq worker and its callers:
//! - Error types
//! - Configuration loading
//! - Task / Response message types and correlation identifiers
//! - Transport trait and the in-memory broker
//! - The correlation bridge (synchronous calls over pub/sub)
//! - Text cleaning helpers

pub mod bridge;
pub mod config;
pub mod error;
pub mod message;
pub mod text;
pub mod transport;

pub use bridge::{BridgeError, CorrelationBridge};
pub use error::{Error, Result};
pub use message::{CorrelationId, ErrorKind, Response, Task};
pub use transport::{MemoryBroker, StartFrom, SubscribeOptions, Subscription, Transport};
