//! Process-wide router counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cheap always-on counters; read via [`RouterMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct RouterMetrics {
    commands_run: AtomicU64,
    shard_requests: AtomicU64,
    stale_retries: AtomicU64,
    failed_commands: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commands_run: u64,
    pub shard_requests: u64,
    pub stale_retries: u64,
    pub failed_commands: u64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command(&self) {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shard_requests(&self, n: u64) {
        self.shard_requests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_stale_retry(&self) {
        self.stale_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_run: self.commands_run.load(Ordering::Relaxed),
            shard_requests: self.shard_requests.load(Ordering::Relaxed),
            stale_retries: self.stale_retries.load(Ordering::Relaxed),
            failed_commands: self.failed_commands.load(Ordering::Relaxed),
        }
    }
}
