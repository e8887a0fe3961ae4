//! Integration tests for the execution engine.
//!
//! These run against the in-memory repository and the mock node, so no
//! external services are required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use credentials::types::CredentialTypeRegistry;
use credentials::{Cipher, CredentialStore, RequestDescriptor};
use db::models::{ExecutionRecord, ExecutionStatus, NodeExecutionStatus, WorkflowRecord};
use db::{MemoryRepository, Repository};
use nodes::descriptor::CredentialDefinition;
use nodes::item::{main_port, Item};
use nodes::mock::MockNode;
use nodes::{
    InvocationContext, NodeDescriptor, NodeError, NodeRegistry, NodeType, PortData,
};

use crate::config::{EngineConfig, FailureKind, RetryPolicy};
use crate::events::ExecutionEvent;
use crate::executor::ExecutionEngine;
use crate::models::{Connection, ExecutionMode, Node, Workflow};
use crate::EngineError;

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

struct Harness {
    engine: Arc<ExecutionEngine>,
    repository: Arc<MemoryRepository>,
    store: Arc<CredentialStore>,
}

fn harness_with(registry: NodeRegistry, config: EngineConfig) -> Harness {
    let repository = Arc::new(MemoryRepository::new());
    let store = Arc::new(CredentialStore::new(
        repository.clone(),
        Arc::new(CredentialTypeRegistry::with_core_types()),
        Cipher::from_hex_key(KEY_HEX).unwrap(),
    ));
    let engine = ExecutionEngine::new(
        repository.clone(),
        Arc::new(registry),
        store.clone(),
        config,
    );
    Harness {
        engine,
        repository,
        store,
    }
}

fn harness() -> Harness {
    harness_with(NodeRegistry::with_core_nodes(), EngineConfig::default())
}

async fn seed_workflow(repository: &Arc<MemoryRepository>, workflow: &Workflow) {
    repository
        .create_workflow(WorkflowRecord {
            id: workflow.id,
            user_id: workflow.user_id,
            name: workflow.name.clone(),
            definition: serde_json::to_value(workflow).unwrap(),
            active: workflow.active,
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
}

async fn wait_terminal(repository: &Arc<MemoryRepository>, execution_id: Uuid) -> ExecutionRecord {
    for _ in 0..500 {
        let record = repository.load_execution(execution_id).await.unwrap();
        if record.status != ExecutionStatus::Running {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} did not reach a terminal state");
}

async fn node_status(
    repository: &Arc<MemoryRepository>,
    execution_id: Uuid,
    node_id: &str,
) -> NodeExecutionStatus {
    repository
        .get_node_execution(execution_id, node_id)
        .await
        .unwrap()
        .status
}

fn manual_trigger(id: &str) -> Node {
    Node::new(id, id, "manualTrigger")
}

// ===========================================================================
// Scenario 1 — linear success
// ===========================================================================

#[tokio::test]
async fn linear_workflow_succeeds_in_order() {
    let h = harness();
    // a(trigger) → b(set) → c(jsonParse)
    let workflow = Workflow::new(
        "linear",
        vec![
            manual_trigger("a"),
            Node::new("b", "Seed", "set")
                .with_parameters(json!({ "fields": { "data": "{\"ok\":true}" } })),
            Node::new("c", "Parse", "jsonParse")
                .with_parameters(json!({ "property": "data" })),
        ],
        vec![Connection::new("a", "b"), Connection::new("b", "c")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let mut completed_events = h.engine.events().subscribe_topic("execution-completed").await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.error.is_none());

    let rows = h.repository.list_node_executions(execution_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.status == NodeExecutionStatus::Success));
    // Starts happened in topological order.
    let order: Vec<&str> = rows.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);

    // The parse node saw the set node's output and parsed it.
    let parse_row = h.repository.get_node_execution(execution_id, "c").await.unwrap();
    let output = parse_row.output_data.unwrap();
    assert_eq!(output["main"][0]["json"]["data"], json!({ "ok": true }));

    // Exactly one execution-completed event for this execution.
    let event = tokio::time::timeout(Duration::from_secs(1), completed_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.execution_id(), execution_id);
    assert!(matches!(
        event,
        ExecutionEvent::ExecutionCompleted { status: ExecutionStatus::Success, .. }
    ));
    assert!(
        tokio::time::timeout(Duration::from_millis(100), completed_events.recv())
            .await
            .is_err(),
        "only one execution-completed event may be emitted"
    );
}

// ===========================================================================
// Scenario 2 — deterministic failure
// ===========================================================================

#[tokio::test]
async fn failing_node_fails_the_execution_and_references_the_node() {
    let mut registry = NodeRegistry::with_core_nodes();
    let boom = Arc::new(MockNode::failing_fatal("boom", "something broke irreparably"));
    registry.register(boom.clone());
    let h = harness_with(registry, EngineConfig::default());

    let workflow = Workflow::new(
        "failing",
        vec![manual_trigger("a"), Node::new("b", "Boom", "boom")],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.error.unwrap().contains("'b'"));

    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    assert_eq!(row.status, NodeExecutionStatus::Error);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(boom.call_count(), 1);
    // The failing node's observed input was recorded.
    assert!(row.input_data.is_some());
}

// ===========================================================================
// Scenario 3 — conditional routing
// ===========================================================================

#[tokio::test]
async fn if_else_routes_one_branch_and_skips_the_other() {
    let h = harness();
    let workflow = Workflow::new(
        "routing",
        vec![
            manual_trigger("a"),
            Node::new("b", "Route", "ifElse").with_parameters(json!({
                "mode": "simple",
                "condition": { "key": "status", "expression": "equal", "value": "active" }
            })),
            Node::new("c", "Active", "noOp"),
            Node::new("d", "Inactive", "noOp"),
        ],
        vec![
            Connection::new("a", "b"),
            Connection::from_output("b", "true", "c"),
            Connection::from_output("b", "false", "d"),
        ],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(
            workflow.id,
            json!({ "trigger": "manual", "data": { "status": "active" } }),
            ExecutionMode::Manual,
        )
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(node_status(&h.repository, execution_id, "c").await, NodeExecutionStatus::Success);
    assert_eq!(node_status(&h.repository, execution_id, "d").await, NodeExecutionStatus::Skipped);
}

// ===========================================================================
// Scenario 4 — cancellation of a slow node
// ===========================================================================

#[tokio::test]
async fn cancelling_a_slow_execution_cancels_promptly() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(MockNode::sleeping("slow", Duration::from_secs(10))));
    let h = harness_with(registry, EngineConfig::default());

    let workflow = Workflow::new(
        "slow",
        vec![manual_trigger("a"), Node::new("b", "Slow", "slow")],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let started = std::time::Instant::now();
    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.engine.cancel(execution_id, workflow.user_id).await.unwrap();
    // A second cancel is a no-op.
    h.engine.cancel(execution_id, workflow.user_id).await.unwrap();

    let record = wait_terminal(&h.repository, execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(node_status(&h.repository, execution_id, "b").await, NodeExecutionStatus::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must not wait for the sleep to elapse"
    );
}

// ===========================================================================
// Scenario 5 — retry policy
// ===========================================================================

fn retrying_config(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
            retryable_kinds: vec![FailureKind::NodeExecution],
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn retries_exhaust_into_error_with_attempt_count() {
    let mut registry = NodeRegistry::with_core_nodes();
    let flaky = Arc::new(MockNode::failing_retryable("flaky", "transient failure"));
    registry.register(flaky.clone());
    let h = harness_with(registry, retrying_config(3));

    let workflow = Workflow::new(
        "flaky",
        vec![manual_trigger("a"), Node::new("b", "Flaky", "flaky")],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Error);
    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    assert_eq!(row.status, NodeExecutionStatus::Error);
    assert_eq!(row.attempt_count, 3);
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn a_flake_that_recovers_before_the_attempt_ceiling_succeeds() {
    let mut registry = NodeRegistry::with_core_nodes();
    let flaky = Arc::new(MockNode::flaky("flaky", 2, json!({ "recovered": true })));
    registry.register(flaky.clone());
    let h = harness_with(registry, retrying_config(3));

    let workflow = Workflow::new(
        "recovering",
        vec![manual_trigger("a"), Node::new("b", "Flaky", "flaky")],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    assert_eq!(row.attempt_count, 3);
    assert_eq!(flaky.call_count(), 3);
}

// ===========================================================================
// Scenario 6 — credential materialization and authenticated requests
// ===========================================================================

/// Test node that echoes the Authorization header its credential produces.
struct EchoAuth {
    descriptor: NodeDescriptor,
}

impl EchoAuth {
    fn new() -> Self {
        let descriptor = NodeDescriptor::new("echoAuth", "Echo Auth", 1).with_credentials(vec![
            CredentialDefinition {
                credential_type: "httpBasicAuth".into(),
                required: true,
            },
        ]);
        Self { descriptor }
    }
}

#[async_trait]
impl NodeType for EchoAuth {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let payload = ctx
            .credentials
            .get("httpBasicAuth")
            .ok_or_else(|| NodeError::Fatal("credential missing".into()))?;
        let registry = CredentialTypeRegistry::with_core_types();
        let definition = registry.get("httpBasicAuth").unwrap();
        let mut request = RequestDescriptor::new("GET", "https://x/y");
        credentials::auth::apply_authentication(&mut request, &definition, payload)
            .map_err(|e| NodeError::Fatal(e.to_string()))?;
        Ok(main_port(vec![Item::from_json(json!({
            "authorization": request.headers["Authorization"],
        }))]))
    }
}

#[tokio::test]
async fn credentials_are_materialized_and_applied() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(EchoAuth::new()));
    let h = harness_with(registry, EngineConfig::default());

    let mut workflow = Workflow::new(
        "authed",
        vec![manual_trigger("a"), Node::new("b", "Echo", "echoAuth")],
        vec![Connection::new("a", "b")],
    );

    let payload = json!({ "username": "alice", "password": "s3cret" })
        .as_object()
        .unwrap()
        .clone();
    let credential = h
        .store
        .create(workflow.user_id, "basic", "httpBasicAuth", payload, None)
        .await
        .unwrap();
    assert!(regex_lite_match(&credential.ciphertext));
    workflow.nodes[1].credential_ids = vec![credential.id];
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Success);

    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    let output = row.output_data.unwrap();
    let expected = format!("Basic {}", base64_of("alice:s3cret"));
    assert_eq!(output["main"][0]["json"]["authorization"], json!(expected));
}

/// `^[0-9a-f]{32}:[0-9a-f]+$` without pulling a regex into the test.
fn regex_lite_match(ciphertext: &str) -> bool {
    let Some((iv, ct)) = ciphertext.split_once(':') else {
        return false;
    };
    let lower_hex = |s: &str| !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    iv.len() == 32 && lower_hex(iv) && lower_hex(ct)
}

fn base64_of(text: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(text)
}

#[tokio::test]
async fn a_missing_required_credential_fails_the_node() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(EchoAuth::new()));
    let h = harness_with(registry, EngineConfig::default());

    let workflow = Workflow::new(
        "unauthed",
        vec![manual_trigger("a"), Node::new("b", "Echo", "echoAuth")],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Error);
    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    assert_eq!(row.status, NodeExecutionStatus::Error);
    assert!(row.error.unwrap().contains("httpBasicAuth"));
}

// ===========================================================================
// Expression binding across nodes
// ===========================================================================

#[tokio::test]
async fn expressions_bind_input_and_upstream_node_outputs() {
    let h = harness();
    let workflow = Workflow::new(
        "expressions",
        vec![
            manual_trigger("a"),
            Node::new("b", "Greet", "set")
                .with_parameters(json!({ "fields": { "greeting": "{{ 'hi ' + $json.name }}" } })),
            Node::new("c", "Wrap", "set").with_parameters(
                json!({ "fields": { "echo": "{{ $node[\"Greet\"].json.greeting }}", "index": "{{ $itemIndex }}" } }),
            ),
        ],
        vec![Connection::new("a", "b"), Connection::new("b", "c")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(
            workflow.id,
            json!({ "trigger": "manual", "data": { "name": "ada" } }),
            ExecutionMode::Manual,
        )
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Success);

    let row = h.repository.get_node_execution(execution_id, "c").await.unwrap();
    let output = row.output_data.unwrap();
    assert_eq!(output["main"][0]["json"]["echo"], json!("hi ada"));
    // A lone fragment keeps the raw typed value.
    assert_eq!(output["main"][0]["json"]["index"], json!(0));
}

#[tokio::test]
async fn a_broken_expression_fails_the_node() {
    let h = harness();
    let workflow = Workflow::new(
        "broken-expr",
        vec![
            manual_trigger("a"),
            Node::new("b", "Bad", "set")
                .with_parameters(json!({ "fields": { "x": "{{ process.exit() }}" } })),
        ],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Error);
    let row = h.repository.get_node_execution(execution_id, "b").await.unwrap();
    assert!(row.error.unwrap().contains("process"));
}

// ===========================================================================
// Graph-shape behaviours
// ===========================================================================

#[tokio::test]
async fn disabled_nodes_pass_data_through_and_get_no_rows() {
    let h = harness();
    let workflow = Workflow::new(
        "bypass",
        vec![
            manual_trigger("a"),
            Node::new("b", "Off", "set")
                .with_parameters(json!({ "fields": { "x": 1 } }))
                .disabled(),
            Node::new("c", "End", "noOp"),
        ],
        vec![Connection::new("a", "b"), Connection::new("b", "c")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(
            workflow.id,
            json!({ "trigger": "manual", "data": { "seed": true } }),
            ExecutionMode::Manual,
        )
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Success);

    let rows = h.repository.list_node_executions(execution_id).await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    // The disabled node's fields were never applied; c saw the trigger data.
    let row = h.repository.get_node_execution(execution_id, "c").await.unwrap();
    assert_eq!(row.output_data.unwrap()["main"][0]["json"], json!({ "seed": true }));
}

#[tokio::test]
async fn merge_points_run_when_any_branch_delivers_items() {
    let h = harness();
    // a → b(ifElse) → true:c / false:d, then c,d → e
    let workflow = Workflow::new(
        "diamond",
        vec![
            manual_trigger("a"),
            Node::new("b", "Route", "ifElse").with_parameters(json!({
                "mode": "simple",
                "condition": { "key": "go", "expression": "equal", "value": true }
            })),
            Node::new("c", "Taken", "noOp"),
            Node::new("d", "NotTaken", "noOp"),
            Node::new("e", "Merge", "noOp"),
        ],
        vec![
            Connection::new("a", "b"),
            Connection::from_output("b", "true", "c"),
            Connection::from_output("b", "false", "d"),
            Connection::new("c", "e"),
            Connection::new("d", "e"),
        ],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(
            workflow.id,
            json!({ "trigger": "manual", "data": { "go": true } }),
            ExecutionMode::Manual,
        )
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(node_status(&h.repository, execution_id, "d").await, NodeExecutionStatus::Skipped);
    assert_eq!(node_status(&h.repository, execution_id, "e").await, NodeExecutionStatus::Success);
}

#[tokio::test]
async fn failure_skips_the_downstream_subtree() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(MockNode::failing_fatal("boom", "kaput")));
    let h = harness_with(registry, EngineConfig::default());

    // a → b(fails) → c → d
    let workflow = Workflow::new(
        "subtree",
        vec![
            manual_trigger("a"),
            Node::new("b", "Boom", "boom"),
            Node::new("c", "After", "noOp"),
            Node::new("d", "Later", "noOp"),
        ],
        vec![
            Connection::new("a", "b"),
            Connection::new("b", "c"),
            Connection::new("c", "d"),
        ],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert_eq!(node_status(&h.repository, execution_id, "c").await, NodeExecutionStatus::Skipped);
    assert_eq!(node_status(&h.repository, execution_id, "d").await, NodeExecutionStatus::Skipped);

    // Universal invariant: terminal rows cover every enabled reachable node.
    let rows = h.repository.list_node_executions(execution_id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows
        .iter()
        .all(|r| r.status != NodeExecutionStatus::Queued && r.status != NodeExecutionStatus::Running));
}

#[tokio::test]
async fn continue_on_fail_forwards_an_error_item() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(MockNode::failing_fatal("boom", "kaput")));
    let h = harness_with(registry, EngineConfig::default());

    let mut failing = Node::new("b", "Boom", "boom");
    failing.settings.continue_on_fail = true;
    let workflow = Workflow::new(
        "continue",
        vec![manual_trigger("a"), failing, Node::new("c", "After", "noOp")],
        vec![Connection::new("a", "b"), Connection::new("b", "c")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    let row = h.repository.get_node_execution(execution_id, "c").await.unwrap();
    assert_eq!(
        row.output_data.unwrap()["main"][0]["json"],
        json!({ "error": "kaput" })
    );
}

// ===========================================================================
// Submission edge cases
// ===========================================================================

#[tokio::test]
async fn workflow_without_matching_trigger_is_rejected_without_an_execution() {
    let h = harness();
    let workflow = Workflow::new(
        "no-trigger",
        vec![Node::new("a", "Lonely", "noOp")],
        vec![],
    );
    seed_workflow(&h.repository, &workflow).await;

    let result = h
        .engine
        .submit(workflow.id, json!({}), ExecutionMode::Manual)
        .await;
    assert!(matches!(result, Err(EngineError::NoTriggerAvailable)));
    assert!(h.repository.list_executions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let h = harness();
    let result = h
        .engine
        .submit(Uuid::new_v4(), json!({}), ExecutionMode::Manual)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cyclic_workflow_records_an_errored_execution() {
    let h = harness();
    let workflow = Workflow::new(
        "cyclic",
        vec![
            manual_trigger("t"),
            Node::new("a", "A", "noOp"),
            Node::new("b", "B", "noOp"),
        ],
        vec![
            Connection::new("t", "a"),
            Connection::new("a", "b"),
            Connection::new("b", "a"),
        ],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({}), ExecutionMode::Manual)
        .await
        .unwrap();

    let record = h.repository.load_execution(execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.error.unwrap().contains("cycle"));
    // No node ran.
    assert!(h.repository.list_node_executions(execution_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_timeout_cancels_like_a_cancel_call() {
    let mut registry = NodeRegistry::with_core_nodes();
    registry.register(Arc::new(MockNode::sleeping("slow", Duration::from_secs(10))));
    let h = harness_with(registry, EngineConfig::default());

    let mut workflow = Workflow::new(
        "timeout",
        vec![manual_trigger("a"), Node::new("b", "Slow", "slow")],
        vec![Connection::new("a", "b")],
    );
    workflow.settings.execution_timeout_ms = Some(100);
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.error.unwrap().contains("timed out"));
    assert_eq!(node_status(&h.repository, execution_id, "b").await, NodeExecutionStatus::Cancelled);
}

// ===========================================================================
// Service surface
// ===========================================================================

#[tokio::test]
async fn progress_stats_and_retry_surface_work() {
    let h = harness();
    let workflow = Workflow::new(
        "surface",
        vec![
            manual_trigger("a"),
            Node::new("b", "Seed", "set").with_parameters(json!({ "fields": { "x": 1 } })),
        ],
        vec![Connection::new("a", "b")],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(workflow.id, json!({ "trigger": "manual" }), ExecutionMode::Manual)
        .await
        .unwrap();
    wait_terminal(&h.repository, execution_id).await;

    let progress = h
        .engine
        .get_execution_progress(execution_id, workflow.user_id)
        .await
        .unwrap();
    assert_eq!(progress.total_nodes, 2);
    assert_eq!(progress.completed_nodes, 2);
    assert_eq!(progress.failed_nodes, 0);
    assert_eq!(progress.status, ExecutionStatus::Success);

    // Retrying submits a distinct execution with the same trigger data.
    let retried = h
        .engine
        .retry_execution(execution_id, workflow.user_id)
        .await
        .unwrap();
    assert_ne!(retried, execution_id);
    let record = wait_terminal(&h.repository, retried).await;
    assert_eq!(record.status, ExecutionStatus::Success);

    let stats = h.engine.get_execution_stats(None).await.unwrap();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.completed, 2);
    assert!(stats.average_execution_time_ms >= 0.0);

    // Scoped to a stranger, the counters are empty.
    let stranger = h.engine.get_execution_stats(Some(Uuid::new_v4())).await.unwrap();
    assert_eq!(stranger.total_executions, 0);

    // Authorization: a stranger cannot read the execution.
    assert!(matches!(
        h.engine.get_execution(execution_id, Uuid::new_v4()).await,
        Err(EngineError::NotFound(_))
    ));
    let (_, rows) = h
        .engine
        .get_execution(execution_id, workflow.user_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn multiple_predecessors_concatenate_in_completion_order() {
    let mut registry = NodeRegistry::with_core_nodes();
    let fast = Arc::new(MockNode::returning("fast", json!({ "lane": "fast" })));
    let slow = Arc::new(MockNode::sleeping("slowish", Duration::from_millis(200)));
    registry.register(fast);
    registry.register(slow);
    let h = harness_with(registry, EngineConfig::default());

    // a → {b(fast), c(slow)} → d ; b completes first, so its items lead.
    let workflow = Workflow::new(
        "merge-order",
        vec![
            manual_trigger("a"),
            Node::new("b", "Fast", "fast"),
            Node::new("c", "Slow", "slowish"),
            Node::new("d", "Join", "noOp"),
        ],
        vec![
            Connection::new("a", "b"),
            Connection::new("a", "c"),
            Connection::new("b", "d"),
            Connection::new("c", "d"),
        ],
    );
    seed_workflow(&h.repository, &workflow).await;

    let execution_id = h
        .engine
        .submit(
            workflow.id,
            json!({ "trigger": "manual", "data": { "seed": 1 } }),
            ExecutionMode::Manual,
        )
        .await
        .unwrap();
    let record = wait_terminal(&h.repository, execution_id).await;
    assert_eq!(record.status, ExecutionStatus::Success);

    let row = h.repository.get_node_execution(execution_id, "d").await.unwrap();
    let input = row.input_data.unwrap();
    let first = &input["main"][0]["json"];
    // The fast branch's item arrives first in the concatenation.
    assert_eq!(first["node"], json!("fast"));
}
