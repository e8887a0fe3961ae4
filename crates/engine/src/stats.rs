//! Execution statistics.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counters returned by `get_execution_stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_executions: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean wall-clock duration of finished executions, in milliseconds.
    pub average_execution_time_ms: f64,
    /// Nodes currently sitting in ready queues across live executions.
    pub queue_size: usize,
}

/// Live gauge of ready-but-not-started nodes, shared with every scheduler.
#[derive(Clone, Default)]
pub struct QueueGauge {
    ready: Arc<AtomicI64>,
}

impl QueueGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.ready.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn sub(&self, n: usize) {
        self.ready.fetch_sub(n as i64, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.ready.load(Ordering::Relaxed).max(0) as usize
    }
}
