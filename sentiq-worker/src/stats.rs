//! Worker counters
//!
//! Updated by the dispatch loop, readable from any task through
//! [`WorkerStats::snapshot`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const NEVER: i64 = i64::MIN;

#[derive(Debug)]
pub struct WorkerStats {
    started_at: DateTime<Utc>,
    processed: AtomicU64,
    failed: AtomicU64,
    unknown: AtomicU64,
    undecodable: AtomicU64,
    /// Milliseconds since the epoch, `NEVER` until the first task
    last_task_ms: AtomicI64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    /// Tasks answered (successes and errors)
    pub processed: u64,
    /// Tasks whose handler returned an error or panicked
    pub failed: u64,
    /// Tasks with an unregistered type
    pub unknown: u64,
    /// Messages skipped because they could not be decoded
    pub undecodable: u64,
    pub last_task_at: Option<DateTime<Utc>>,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            undecodable: AtomicU64::new(0),
            last_task_ms: AtomicI64::new(NEVER),
        }
    }

    pub(crate) fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_failure(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_unknown(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.unknown.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_undecodable(&self) {
        self.undecodable.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        self.last_task_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_task_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            started_at: self.started_at,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            last_task_at: if last == NEVER {
                None
            } else {
                DateTime::from_timestamp_millis(last)
            },
        }
    }
}
