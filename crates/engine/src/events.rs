//! In-process event bus — fan-out of execution events to subscribers.
//!
//! Per-execution-id events reach each subscriber in emission order.
//! Delivery is best-effort: a slow subscriber may miss a coalesced
//! `execution-progress` event, never a lifecycle event (those apply
//! backpressure instead).  On `execution-completed` every subscriber for
//! that execution is closed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use db::models::ExecutionStatus;

/// Per-subscriber buffer; progress events are dropped (coalesced) when full.
const SUBSCRIBER_BUFFER: usize = 256;

/// Everything the engine announces while driving an execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        started_at: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
        /// Output payload, grouped by port.
        data: Option<serde_json::Value>,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
    NodeCancelled {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionProgress {
        execution_id: Uuid,
        total_nodes: usize,
        completed_nodes: usize,
        failed_nodes: usize,
        current_node_ids: Vec<String>,
        status: ExecutionStatus,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    },
    /// A node exhausted its retries in a workflow with an error workflow
    /// configured.  Submitting that workflow is the orchestrator's job.
    FailureEscalation {
        execution_id: Uuid,
        error_workflow_id: Uuid,
        node_id: String,
        error: String,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::NodeCancelled { execution_id, .. }
            | Self::NodeSkipped { execution_id, .. }
            | Self::ExecutionProgress { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::FailureEscalation { execution_id, .. } => *execution_id,
        }
    }

    /// Topic string, e.g. `node-completed`.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution-started",
            Self::NodeStarted { .. } => "node-started",
            Self::NodeCompleted { .. } => "node-completed",
            Self::NodeFailed { .. } => "node-failed",
            Self::NodeCancelled { .. } => "node-cancelled",
            Self::NodeSkipped { .. } => "node-skipped",
            Self::ExecutionProgress { .. } => "execution-progress",
            Self::ExecutionCompleted { .. } => "execution-completed",
            Self::FailureEscalation { .. } => "failure-escalation",
        }
    }

    fn is_coalescable(&self) -> bool {
        matches!(self, Self::ExecutionProgress { .. })
    }
}

enum Filter {
    Execution(Uuid),
    /// Topic prefix match: `node-` subscribes to every node event.
    Topic(String),
}

struct Subscriber {
    filter: Filter,
    tx: mpsc::Sender<ExecutionEvent>,
}

impl Subscriber {
    fn matches(&self, event: &ExecutionEvent) -> bool {
        match &self.filter {
            Filter::Execution(id) => event.execution_id() == *id,
            Filter::Topic(prefix) => event.topic().starts_with(prefix.as_str()),
        }
    }
}

/// Receiving half of a subscription.
pub struct EventStream {
    rx: mpsc::Receiver<ExecutionEvent>,
}

impl EventStream {
    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }
}

/// In-process multicast bus.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event of one execution.
    pub async fn subscribe_execution(&self, execution_id: Uuid) -> EventStream {
        self.subscribe(Filter::Execution(execution_id)).await
    }

    /// Subscribe to a topic prefix (`node-`, `execution-`, or a full topic
    /// such as `execution-completed`).
    pub async fn subscribe_topic(&self, prefix: &str) -> EventStream {
        self.subscribe(Filter::Topic(prefix.to_owned())).await
    }

    async fn subscribe(&self, filter: Filter) -> EventStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().await.push(Subscriber { filter, tx });
        EventStream { rx }
    }

    /// Deliver `event` to every matching subscriber, in order.
    pub async fn publish(&self, event: ExecutionEvent) {
        let mut subscribers = self.subscribers.lock().await;

        let mut closed: Vec<usize> = Vec::new();
        for (index, subscriber) in subscribers.iter().enumerate() {
            if !subscriber.matches(&event) {
                continue;
            }
            if event.is_coalescable() {
                // Progress may be dropped for a slow subscriber; it will see
                // a newer progress event instead.
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    subscriber.tx.try_send(event.clone())
                {
                    closed.push(index);
                }
            } else if subscriber.tx.send(event.clone()).await.is_err() {
                closed.push(index);
            }
        }
        for index in closed.into_iter().rev() {
            subscribers.swap_remove(index);
        }

        // Terminal event: tear down this execution's subscribers.
        if let ExecutionEvent::ExecutionCompleted { execution_id, .. } = &event {
            let before = subscribers.len();
            subscribers.retain(|s| !matches!(s.filter, Filter::Execution(id) if id == *execution_id));
            debug!(
                %execution_id,
                closed = before - subscribers.len(),
                "closed execution subscribers"
            );
        }
    }
}
