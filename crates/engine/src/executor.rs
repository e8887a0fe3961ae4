//! The execution engine — submission API and the per-execution scheduler.
//!
//! One scheduler task owns all per-execution state (ready set, remaining
//! counts, output cache); workers communicate with it exclusively through a
//! bounded channel of [`NodeCompletion`] messages.  No mutex is held across
//! a node invocation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use credentials::CredentialStore;
use db::models::{
    ExecutionPatch, ExecutionRecord, ExecutionStatus, NodeExecutionPatch, NodeExecutionRecord,
    NodeExecutionStatus,
};
use db::{DbError, Repository};
use nodes::item::{main_port, Item};
use nodes::{Helpers, NodeRegistry, PortData};

use crate::config::{EngineConfig, FailureKind, RetryPolicy};
use crate::dag::Topology;
use crate::events::{EventBus, EventStream, ExecutionEvent};
use crate::invoker::{self, NodeCompletion, NodeInvocation, NodeOutcome};
use crate::models::{ExecutionMode, SaveDataMode, Workflow};
use crate::stats::{QueueGauge, StatsSnapshot};
use crate::EngineError;

/// Cancellation tokens of live executions, shared with every scheduler.
type RunningMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Progress summary returned by `get_execution_progress`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub current_node_ids: Vec<String>,
    pub status: ExecutionStatus,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
}

/// The central orchestrator: drives workflows from submission to terminal
/// state.
pub struct ExecutionEngine {
    repository: Arc<dyn Repository>,
    registry: Arc<NodeRegistry>,
    credentials: Arc<CredentialStore>,
    events: EventBus,
    config: EngineConfig,
    helpers: Helpers,
    queue_gauge: QueueGauge,
    running: RunningMap,
}

impl ExecutionEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<NodeRegistry>,
        credentials: Arc<CredentialStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let helpers = Helpers::new(credentials.registry());
        Arc::new(Self {
            repository,
            registry,
            credentials,
            events: EventBus::new(),
            config,
            helpers,
            queue_gauge: QueueGauge::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to one execution's event stream.
    pub async fn subscribe(&self, execution_id: Uuid) -> EventStream {
        self.events.subscribe_execution(execution_id).await
    }

    // -----------------------------------------------------------------------
    // Submission API
    // -----------------------------------------------------------------------

    /// Submit a workflow for execution and return the new execution id.
    ///
    /// The workflow is snapshotted at this point; later edits do not affect
    /// the run.  A cycle in the graph creates the execution and immediately
    /// marks it `ERROR`; lookup and trigger problems surface without
    /// creating anything.
    #[instrument(skip(self, trigger_data), fields(workflow_id = %workflow_id))]
    pub async fn submit(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
        mode: ExecutionMode,
    ) -> Result<Uuid, EngineError> {
        let record = match self.repository.load_workflow(workflow_id).await {
            Ok(record) => record,
            Err(DbError::NotFound) => {
                return Err(EngineError::NotFound(format!("workflow {workflow_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let workflow: Workflow = serde_json::from_value(record.definition)?;

        let analyzed = Topology::analyze(&workflow, &self.registry, mode);
        let topology = match analyzed {
            Ok(topology) => topology,
            Err(EngineError::Cycle { nodes }) => {
                // The execution exists and fails before any node runs.
                return self
                    .record_cycle_failure(&workflow, trigger_data, mode, nodes)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let execution = self
            .repository
            .create_execution(ExecutionRecord {
                id: Uuid::new_v4(),
                workflow_id: workflow.id,
                user_id: workflow.user_id,
                snapshot: serde_json::to_value(&workflow)?,
                trigger_data: trigger_data.clone(),
                mode: mode.as_str().to_owned(),
                status: ExecutionStatus::Running,
                started_at: now,
                finished_at: None,
                error: None,
            })
            .await?;

        // One QUEUED row per enabled reachable node, in deterministic order.
        let mut reachable: Vec<&String> = topology.reachable.iter().collect();
        reachable.sort_unstable();
        for node_id in reachable {
            self.repository
                .create_node_execution(NodeExecutionRecord {
                    execution_id: execution.id,
                    node_id: node_id.clone(),
                    status: NodeExecutionStatus::Queued,
                    started_at: None,
                    finished_at: None,
                    input_data: None,
                    output_data: None,
                    error: None,
                    attempt_count: 0,
                })
                .await?;
        }

        let cancel = CancellationToken::new();
        self.running
            .lock()
            .expect("running map lock")
            .insert(execution.id, cancel.clone());

        info!(execution_id = %execution.id, nodes = topology.reachable.len(), "execution submitted");

        let scheduler = Scheduler {
            repository: Arc::clone(&self.repository),
            registry: Arc::clone(&self.registry),
            credentials: Arc::clone(&self.credentials),
            events: self.events.clone(),
            config: self.config.clone(),
            helpers: self.helpers.clone(),
            queue_gauge: self.queue_gauge.clone(),
            running: Arc::clone(&self.running),
            workflow: Arc::new(workflow),
            topology,
            execution_id: execution.id,
            mode,
            trigger_data,
            cancel,
            ready: VecDeque::new(),
            remaining: HashMap::new(),
            outputs: HashMap::new(),
            completion_rank: HashMap::new(),
            next_rank: 0,
            terminal: HashMap::new(),
            in_flight: HashSet::new(),
            first_failure: None,
            cancel_seen: false,
            timed_out: false,
        };
        tokio::spawn(scheduler.run());

        Ok(execution.id)
    }

    async fn record_cycle_failure(
        &self,
        workflow: &Workflow,
        trigger_data: Value,
        mode: ExecutionMode,
        nodes: Vec<String>,
    ) -> Result<Uuid, EngineError> {
        let now = Utc::now();
        let message = EngineError::Cycle { nodes }.to_string();
        let execution = self
            .repository
            .create_execution(ExecutionRecord {
                id: Uuid::new_v4(),
                workflow_id: workflow.id,
                user_id: workflow.user_id,
                snapshot: serde_json::to_value(workflow)?,
                trigger_data,
                mode: mode.as_str().to_owned(),
                status: ExecutionStatus::Error,
                started_at: now,
                finished_at: Some(now),
                error: Some(message.clone()),
            })
            .await?;

        error!(execution_id = %execution.id, "workflow rejected: {message}");
        self.events
            .publish(ExecutionEvent::ExecutionStarted {
                execution_id: execution.id,
                workflow_id: workflow.id,
                started_at: now,
            })
            .await;
        self.events
            .publish(ExecutionEvent::ExecutionCompleted {
                execution_id: execution.id,
                status: ExecutionStatus::Error,
                finished_at: now,
                error: Some(message),
            })
            .await;
        Ok(execution.id)
    }

    /// Request cooperative cancellation.  Resolves immediately; the
    /// execution transitions to `CANCELLED` asynchronously once the last
    /// in-flight worker returns.  A second cancel is a no-op.
    pub async fn cancel(&self, execution_id: Uuid, user_id: Uuid) -> Result<(), EngineError> {
        let record = self.load_authorized(execution_id, user_id).await?;
        if record.status != ExecutionStatus::Running {
            return Ok(());
        }
        if let Some(token) = self
            .running
            .lock()
            .expect("running map lock")
            .get(&execution_id)
        {
            info!(%execution_id, "cancellation requested");
            token.cancel();
        }
        Ok(())
    }

    pub async fn get_execution(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<(ExecutionRecord, Vec<NodeExecutionRecord>), EngineError> {
        let record = self.load_authorized(execution_id, user_id).await?;
        let node_executions = self.repository.list_node_executions(execution_id).await?;
        Ok((record, node_executions))
    }

    pub async fn get_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
        user_id: Uuid,
    ) -> Result<NodeExecutionRecord, EngineError> {
        self.load_authorized(execution_id, user_id).await?;
        self.repository
            .get_node_execution(execution_id, node_id)
            .await
            .map_err(|e| match e {
                DbError::NotFound => {
                    EngineError::NotFound(format!("node execution {execution_id}/{node_id}"))
                }
                other => other.into(),
            })
    }

    pub async fn get_execution_progress(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<ExecutionProgress, EngineError> {
        let record = self.load_authorized(execution_id, user_id).await?;
        let rows = self.repository.list_node_executions(execution_id).await?;

        let completed = rows
            .iter()
            .filter(|r| r.status == NodeExecutionStatus::Success)
            .count();
        let failed = rows
            .iter()
            .filter(|r| r.status == NodeExecutionStatus::Error)
            .count();
        let current: Vec<String> = rows
            .iter()
            .filter(|r| r.status == NodeExecutionStatus::Running)
            .map(|r| r.node_id.clone())
            .collect();

        Ok(ExecutionProgress {
            execution_id,
            total_nodes: rows.len(),
            completed_nodes: completed,
            failed_nodes: failed,
            current_node_ids: current,
            status: record.status,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }

    /// Aggregate counters, optionally scoped to one submitting user.
    pub async fn get_execution_stats(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<StatsSnapshot, EngineError> {
        let executions = self.repository.list_executions(user_id).await?;

        let mut snapshot = StatsSnapshot {
            total_executions: executions.len(),
            queue_size: self.queue_gauge.get(),
            ..StatsSnapshot::default()
        };
        let mut duration_sum_ms = 0f64;
        let mut duration_count = 0usize;

        for execution in &executions {
            match execution.status {
                ExecutionStatus::Running => snapshot.running += 1,
                ExecutionStatus::Success => snapshot.completed += 1,
                ExecutionStatus::Error => snapshot.failed += 1,
                ExecutionStatus::Cancelled => snapshot.cancelled += 1,
            }
            if let Some(finished_at) = execution.finished_at {
                duration_sum_ms += (finished_at - execution.started_at).num_milliseconds() as f64;
                duration_count += 1;
            }
        }
        if duration_count > 0 {
            snapshot.average_execution_time_ms = duration_sum_ms / duration_count as f64;
        }
        Ok(snapshot)
    }

    /// Re-submit the original's trigger data as a brand-new execution.
    pub async fn retry_execution(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<Uuid, EngineError> {
        let original = self.load_authorized(execution_id, user_id).await?;
        let mode = original
            .mode
            .parse::<ExecutionMode>()
            .unwrap_or(ExecutionMode::Manual);
        self.submit(original.workflow_id, original.trigger_data, mode)
            .await
    }

    async fn load_authorized(
        &self,
        execution_id: Uuid,
        user_id: Uuid,
    ) -> Result<ExecutionRecord, EngineError> {
        let record = match self.repository.load_execution(execution_id).await {
            Ok(record) => record,
            Err(DbError::NotFound) => {
                return Err(EngineError::NotFound(format!("execution {execution_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        if record.user_id != user_id {
            return Err(EngineError::NotFound(format!("execution {execution_id}")));
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns all per-execution state; runs as a single task per execution.
struct Scheduler {
    repository: Arc<dyn Repository>,
    registry: Arc<NodeRegistry>,
    credentials: Arc<CredentialStore>,
    events: EventBus,
    config: EngineConfig,
    helpers: Helpers,
    queue_gauge: QueueGauge,
    running: RunningMap,

    workflow: Arc<Workflow>,
    topology: Topology,
    execution_id: Uuid,
    mode: ExecutionMode,
    trigger_data: Value,
    cancel: CancellationToken,

    ready: VecDeque<String>,
    /// Outstanding predecessor count per node.
    remaining: HashMap<String, usize>,
    /// Output cache of completed nodes.
    outputs: HashMap<String, PortData>,
    /// Completion order, used for deterministic input concatenation.
    completion_rank: HashMap<String, usize>,
    next_rank: usize,
    /// Terminal node states reached so far.
    terminal: HashMap<String, NodeExecutionStatus>,
    in_flight: HashSet<String>,
    first_failure: Option<(String, String)>,
    cancel_seen: bool,
    timed_out: bool,
}

impl Scheduler {
    async fn run(mut self) {
        let started_at = Utc::now();
        self.events
            .publish(ExecutionEvent::ExecutionStarted {
                execution_id: self.execution_id,
                workflow_id: self.workflow.id,
                started_at,
            })
            .await;

        for node_id in self.topology.reachable.iter() {
            let preds = self.topology.pred.get(node_id).map_or(0, HashSet::len);
            self.remaining.insert(node_id.clone(), preds);
        }
        let entries: Vec<String> = self.topology.entry.clone();
        for node_id in entries {
            self.enqueue_ready(node_id);
        }

        let (tx, mut rx) = mpsc::channel::<NodeCompletion>(self.config.worker_count.max(1));

        let timeout = self
            .workflow
            .settings
            .execution_timeout_ms
            .map(std::time::Duration::from_millis)
            .or(self.config.default_timeout);
        let timeout_fut = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout_fut);

        loop {
            self.spawn_ready(&tx);
            if self.in_flight.is_empty() && self.ready.is_empty() {
                break;
            }

            tokio::select! {
                Some(completion) = rx.recv() => {
                    self.on_completion(completion).await;
                }
                () = self.cancel.cancelled(), if !self.cancel_seen => {
                    self.cancel_seen = true;
                    let drained = self.ready.len();
                    self.ready.clear();
                    self.queue_gauge.sub(drained);
                    info!(execution_id = %self.execution_id, "cancellation observed by scheduler");
                }
                () = &mut timeout_fut, if timeout.is_some() && !self.timed_out && !self.cancel_seen => {
                    self.timed_out = true;
                    warn!(execution_id = %self.execution_id, "execution timeout reached");
                    self.cancel.cancel();
                }
            }
        }

        self.finish().await;
    }

    fn enqueue_ready(&mut self, node_id: String) {
        self.ready.push_back(node_id);
        self.queue_gauge.add(1);
    }

    /// Launch workers for ready nodes up to the pool bound.
    fn spawn_ready(&mut self, tx: &mpsc::Sender<NodeCompletion>) {
        while !self.cancel_seen && self.in_flight.len() < self.config.worker_count {
            let Some(node_id) = self.ready.pop_front() else {
                break;
            };
            self.queue_gauge.sub(1);

            let node = self
                .workflow
                .node(&node_id)
                .expect("scheduled node exists in snapshot")
                .clone();
            let node_impl = self
                .registry
                .get(&node.node_type)
                .expect("validated node type");

            let invocation = NodeInvocation {
                workflow: Arc::clone(&self.workflow),
                node,
                node_impl,
                execution_id: self.execution_id,
                mode: self.mode,
                input: self.assemble_input(&node_id),
                node_context: self.node_context(&node_id),
                policy: self.effective_policy(&node_id),
                repository: Arc::clone(&self.repository),
                credentials: Arc::clone(&self.credentials),
                events: self.events.clone(),
                helpers: self.helpers.clone(),
                cancel: self.cancel.clone(),
            };

            self.in_flight.insert(node_id);
            let tx = tx.clone();
            tokio::spawn(async move {
                let completion = invoker::invoke(invocation).await;
                let _ = tx.send(completion).await;
            });
        }
    }

    /// Concatenate, per input port, the items each incoming connection
    /// delivered — ordered by predecessor completion, ties broken by source
    /// node name.
    fn assemble_input(&self, node_id: &str) -> PortData {
        if self.topology.entry.iter().any(|e| e == node_id) {
            // Submissions wrap their payload under `data`; the bare trigger
            // envelope is forwarded when no payload is present.
            let seed = self
                .trigger_data
                .get("data")
                .cloned()
                .unwrap_or_else(|| self.trigger_data.clone());
            return main_port(vec![Item::from_json(seed)]);
        }

        let mut input = PortData::new();
        let Some(ports) = self.topology.incoming.get(node_id) else {
            return input;
        };
        for (port, sources) in ports {
            let mut ordered = sources.clone();
            ordered.sort_by_key(|source| {
                let rank = self
                    .completion_rank
                    .get(&source.node_id)
                    .copied()
                    .unwrap_or(usize::MAX);
                let name = self
                    .workflow
                    .node(&source.node_id)
                    .map_or_else(String::new, |n| n.name.clone());
                (rank, name)
            });

            let mut items = Vec::new();
            for source in ordered {
                if let Some(output) = self.outputs.get(&source.node_id) {
                    if let Some(port_items) = output.get(&source.port) {
                        items.extend(port_items.iter().cloned());
                    }
                }
            }
            input.insert(port.clone(), items);
        }
        input
    }

    /// `$node["Name"]` data for every completed ancestor.
    fn node_context(&self, node_id: &str) -> HashMap<String, Value> {
        let mut context = HashMap::new();
        for ancestor_id in self.topology.ancestors(node_id) {
            let Some(output) = self.outputs.get(&ancestor_id) else {
                continue;
            };
            let Some(node) = self.workflow.node(&ancestor_id) else {
                continue;
            };
            let items: Vec<Value> = output
                .get(nodes::MAIN_PORT)
                .map(|items| items.iter().map(|i| i.json.clone()).collect())
                .unwrap_or_default();
            let first = items.first().cloned().unwrap_or(Value::Null);
            context.insert(
                node.name.clone(),
                serde_json::json!({ "json": first, "items": items }),
            );
        }
        context
    }

    /// Engine-wide retry policy with per-node overrides applied.
    fn effective_policy(&self, node_id: &str) -> RetryPolicy {
        let mut policy = self.config.retry.clone();
        if let Some(node) = self.workflow.node(node_id) {
            if node.settings.retry_on_fail {
                policy.max_attempts = node.settings.max_tries.unwrap_or(3).max(1);
                if let Some(wait_ms) = node.settings.wait_between_tries_ms {
                    policy.initial_delay = std::time::Duration::from_millis(wait_ms);
                    policy.backoff_multiplier = 1.0;
                }
                if !policy.retries(FailureKind::NodeExecution) {
                    policy.retryable_kinds.push(FailureKind::NodeExecution);
                }
            }
        }
        policy
    }

    async fn on_completion(&mut self, completion: NodeCompletion) {
        let node_id = completion.node_id;
        self.in_flight.remove(&node_id);

        match completion.outcome {
            NodeOutcome::Success { output, attempts } => {
                self.record_success(&node_id, output, attempts).await;
            }
            NodeOutcome::Failed {
                kind,
                message,
                attempts,
            } => {
                let continue_on_fail = self
                    .workflow
                    .node(&node_id)
                    .is_some_and(|n| n.settings.continue_on_fail);
                if continue_on_fail {
                    // Forward an error item on the first output port instead
                    // of failing the branch.
                    let port = self
                        .workflow
                        .node(&node_id)
                        .and_then(|n| self.registry.get(&n.node_type))
                        .and_then(|t| t.descriptor().outputs.first().cloned())
                        .unwrap_or_else(|| nodes::MAIN_PORT.to_owned());
                    let mut output = PortData::new();
                    output.insert(
                        port,
                        vec![Item::from_json(serde_json::json!({ "error": message }))],
                    );
                    warn!(%node_id, "node failed but continue_on_fail is set: {message}");
                    self.record_success(&node_id, output, attempts).await;
                } else {
                    self.record_failure(&node_id, kind, message, attempts).await;
                }
            }
            NodeOutcome::Cancelled { attempts } => {
                self.record_cancelled(&node_id, attempts).await;
            }
        }
    }

    async fn record_success(&mut self, node_id: &str, output: PortData, attempts: u32) {
        let output_json = serde_json::to_value(&output).unwrap_or(Value::Null);
        self.persist_node(
            node_id,
            NodeExecutionPatch {
                status: Some(NodeExecutionStatus::Success),
                finished_at: Some(Utc::now()),
                output_data: Some(output_json.clone()),
                attempt_count: Some(attempts as i32),
                ..NodeExecutionPatch::default()
            },
        )
        .await;

        self.terminal
            .insert(node_id.to_owned(), NodeExecutionStatus::Success);
        self.completion_rank
            .insert(node_id.to_owned(), self.next_rank);
        self.next_rank += 1;
        self.outputs.insert(node_id.to_owned(), output);

        self.events
            .publish(ExecutionEvent::NodeCompleted {
                execution_id: self.execution_id,
                node_id: node_id.to_owned(),
                timestamp: Utc::now(),
                data: Some(output_json),
            })
            .await;
        self.emit_progress().await;

        if !self.cancel_seen {
            self.propagate_completion(node_id).await;
        }
    }

    async fn record_failure(
        &mut self,
        node_id: &str,
        kind: FailureKind,
        message: String,
        attempts: u32,
    ) {
        error!(node_id, ?kind, attempts, "node failed: {message}");

        let mut patch = NodeExecutionPatch {
            status: Some(NodeExecutionStatus::Error),
            finished_at: Some(Utc::now()),
            error: Some(message.clone()),
            attempt_count: Some(attempts.max(1) as i32),
            ..NodeExecutionPatch::default()
        };
        // The failing node's observed input was recorded at start; drop it
        // when the workflow opts out of error-data retention.
        if self.workflow.settings.save_data_error_execution == SaveDataMode::None {
            patch.input_data = Some(Value::Null);
        }
        self.persist_node(node_id, patch).await;

        self.terminal
            .insert(node_id.to_owned(), NodeExecutionStatus::Error);
        if self.first_failure.is_none() {
            self.first_failure = Some((node_id.to_owned(), message.clone()));
        }

        self.events
            .publish(ExecutionEvent::NodeFailed {
                execution_id: self.execution_id,
                node_id: node_id.to_owned(),
                timestamp: Utc::now(),
                error: message.clone(),
            })
            .await;

        if let Some(error_workflow_id) = self.workflow.settings.error_workflow_id {
            self.events
                .publish(ExecutionEvent::FailureEscalation {
                    execution_id: self.execution_id,
                    error_workflow_id,
                    node_id: node_id.to_owned(),
                    error: message,
                })
                .await;
        }
        self.emit_progress().await;

        if !self.cancel_seen {
            // No successor receives this node's outputs; the downstream
            // subtree is skipped outright.
            let successors: Vec<String> = self
                .topology
                .succ
                .get(node_id)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            self.skip_subtree(successors).await;
        }
    }

    async fn record_cancelled(&mut self, node_id: &str, attempts: u32) {
        self.persist_node(
            node_id,
            NodeExecutionPatch {
                status: Some(NodeExecutionStatus::Cancelled),
                finished_at: Some(Utc::now()),
                attempt_count: Some(attempts.max(1) as i32),
                ..NodeExecutionPatch::default()
            },
        )
        .await;
        self.terminal
            .insert(node_id.to_owned(), NodeExecutionStatus::Cancelled);
        self.events
            .publish(ExecutionEvent::NodeCancelled {
                execution_id: self.execution_id,
                node_id: node_id.to_owned(),
                timestamp: Utc::now(),
            })
            .await;
        self.emit_progress().await;
    }

    /// Decrement successors; nodes whose predecessors are all done become
    /// ready when data arrived, skipped when every connection stayed empty.
    async fn propagate_completion(&mut self, node_id: &str) {
        let successors: Vec<String> = self
            .topology
            .succ
            .get(node_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        let mut no_data: Vec<String> = Vec::new();
        for successor in successors {
            if self.terminal.contains_key(&successor) {
                continue;
            }
            let remaining = self
                .remaining
                .get_mut(&successor)
                .expect("reachable successor");
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                if self.any_items_arrived(&successor) {
                    self.enqueue_ready(successor);
                } else {
                    no_data.push(successor);
                }
            }
        }
        for successor in no_data {
            self.skip_no_data(successor).await;
        }
    }

    fn any_items_arrived(&self, node_id: &str) -> bool {
        let Some(ports) = self.topology.incoming.get(node_id) else {
            return false;
        };
        ports.values().flatten().any(|source| {
            self.outputs
                .get(&source.node_id)
                .and_then(|output| output.get(&source.port))
                .is_some_and(|items| !items.is_empty())
        })
    }

    /// A satisfied node whose every connection delivered zero items: mark it
    /// skipped and propagate as a completion that carries no data, so merge
    /// points with live branches still run.
    async fn skip_no_data(&mut self, node_id: String) {
        let mut worklist = VecDeque::from([node_id]);
        while let Some(current) = worklist.pop_front() {
            if self.terminal.contains_key(&current) {
                continue;
            }
            self.mark_skipped(&current).await;

            let successors: Vec<String> = self
                .topology
                .succ
                .get(&current)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            for successor in successors {
                if self.terminal.contains_key(&successor) {
                    continue;
                }
                let remaining = self
                    .remaining
                    .get_mut(&successor)
                    .expect("reachable successor");
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    if self.any_items_arrived(&successor) {
                        self.enqueue_ready(successor);
                    } else {
                        worklist.push_back(successor);
                    }
                }
            }
        }
    }

    /// Failure path: the whole downstream subtree transitions to SKIPPED.
    async fn skip_subtree(&mut self, start: Vec<String>) {
        let mut worklist: VecDeque<String> = start.into();
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(current) = worklist.pop_front() {
            if !seen.insert(current.clone()) || self.terminal.contains_key(&current) {
                continue;
            }
            self.mark_skipped(&current).await;
            if let Some(successors) = self.topology.succ.get(&current) {
                for successor in successors {
                    worklist.push_back(successor.clone());
                }
            }
        }
    }

    async fn mark_skipped(&mut self, node_id: &str) {
        self.persist_node(
            node_id,
            NodeExecutionPatch {
                status: Some(NodeExecutionStatus::Skipped),
                finished_at: Some(Utc::now()),
                ..NodeExecutionPatch::default()
            },
        )
        .await;
        self.terminal
            .insert(node_id.to_owned(), NodeExecutionStatus::Skipped);
        self.events
            .publish(ExecutionEvent::NodeSkipped {
                execution_id: self.execution_id,
                node_id: node_id.to_owned(),
                timestamp: Utc::now(),
            })
            .await;
        self.emit_progress().await;
    }

    async fn persist_node(&self, node_id: &str, patch: NodeExecutionPatch) {
        if let Err(e) = self
            .repository
            .update_node_execution(self.execution_id, node_id, patch)
            .await
        {
            error!(node_id, "failed to persist node transition: {e}");
        }
    }

    async fn emit_progress(&self) {
        let completed = self
            .terminal
            .values()
            .filter(|s| **s == NodeExecutionStatus::Success)
            .count();
        let failed = self
            .terminal
            .values()
            .filter(|s| **s == NodeExecutionStatus::Error)
            .count();
        let mut current: Vec<String> = self.in_flight.iter().cloned().collect();
        current.sort_unstable();

        self.events
            .publish(ExecutionEvent::ExecutionProgress {
                execution_id: self.execution_id,
                total_nodes: self.topology.reachable.len(),
                completed_nodes: completed,
                failed_nodes: failed,
                current_node_ids: current,
                status: ExecutionStatus::Running,
            })
            .await;
    }

    async fn finish(mut self) {
        // Any node that never started becomes SKIPPED at the terminal
        // transition.
        let mut unfinished: Vec<String> = self
            .topology
            .reachable
            .iter()
            .filter(|id| !self.terminal.contains_key(*id))
            .cloned()
            .collect();
        unfinished.sort_unstable();
        for node_id in unfinished {
            self.mark_skipped(&node_id).await;
        }

        let cancelled = self.cancel_seen
            || self
                .terminal
                .values()
                .any(|s| *s == NodeExecutionStatus::Cancelled);
        let (status, error) = if cancelled {
            let reason = if self.timed_out {
                EngineError::Timeout.to_string()
            } else {
                EngineError::Cancelled.to_string()
            };
            (ExecutionStatus::Cancelled, Some(reason))
        } else if let Some((node_id, message)) = self.first_failure.take() {
            let summary = EngineError::NodeExecution { node_id, message };
            (ExecutionStatus::Error, Some(summary.to_string()))
        } else {
            (ExecutionStatus::Success, None)
        };

        let finished_at = Utc::now();
        if let Err(e) = self
            .repository
            .update_execution(
                self.execution_id,
                ExecutionPatch {
                    status: Some(status),
                    finished_at: Some(finished_at),
                    error: error.clone(),
                },
            )
            .await
        {
            error!(execution_id = %self.execution_id, "failed to persist terminal state: {e}");
        }

        self.running
            .lock()
            .expect("running map lock")
            .remove(&self.execution_id);

        info!(
            execution_id = %self.execution_id,
            %status,
            "execution finished"
        );
        self.events
            .publish(ExecutionEvent::ExecutionCompleted {
                execution_id: self.execution_id,
                status,
                finished_at,
                error,
            })
            .await;
    }
}
