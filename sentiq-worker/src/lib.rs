//! sentiq-worker library
//!
//! The worker side of the service:
//! - [`dispatch::Worker`]: sequential dispatch loop over the request topics
//! - [`handlers`]: one handler per task type, looked up in a [`handlers::HandlerRegistry`]
//! - [`models`]: model traits, the model registry/cache and the lexicon stand-in
//! - [`stats::WorkerStats`]: counters readable while the loop runs

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod models;
pub mod stats;

pub use crate::dispatch::Worker;
pub use crate::error::{HandlerError, ModelError};
pub use crate::handlers::{HandlerRegistry, TaskHandler};
pub use crate::models::registry::ModelRegistry;
pub use crate::stats::{StatsSnapshot, WorkerStats};
