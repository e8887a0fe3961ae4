//! Per-node invocation: parameter resolution, credential materialization,
//! the retry loop, and the completion message workers send back to the
//! scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use credentials::CredentialStore;
use db::models::{NodeExecutionPatch, NodeExecutionStatus};
use db::Repository;
use expression::{resolve_parameters, ExpressionContext};
use nodes::item::main_items;
use nodes::{Helpers, InvocationContext, NodeError, NodeType, PortData};

use crate::config::{FailureKind, RetryPolicy};
use crate::events::{EventBus, ExecutionEvent};
use crate::models::{ExecutionMode, Node, Workflow};
use crate::EngineError;

/// How one node invocation ended.
#[derive(Debug)]
pub(crate) enum NodeOutcome {
    Success { output: PortData, attempts: u32 },
    Failed {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },
    Cancelled { attempts: u32 },
}

/// Message a worker sends the scheduler over the completion channel.
#[derive(Debug)]
pub(crate) struct NodeCompletion {
    pub node_id: String,
    pub outcome: NodeOutcome,
}

/// Everything a worker needs to run one node.
pub(crate) struct NodeInvocation {
    pub workflow: Arc<Workflow>,
    pub node: Node,
    pub node_impl: Arc<dyn NodeType>,
    pub execution_id: Uuid,
    pub mode: ExecutionMode,
    /// Input items grouped by port, assembled by the scheduler.
    pub input: PortData,
    /// `$node["Name"]` entries for completed ancestors.
    pub node_context: HashMap<String, Value>,
    pub policy: RetryPolicy,
    pub repository: Arc<dyn Repository>,
    pub credentials: Arc<CredentialStore>,
    pub events: EventBus,
    pub helpers: Helpers,
    pub cancel: CancellationToken,
}

/// Run one node to an outcome.  Persists the RUNNING transition and the
/// attempt counter; terminal persistence belongs to the scheduler.
pub(crate) async fn invoke(invocation: NodeInvocation) -> NodeCompletion {
    let node_id = invocation.node.id.clone();
    let outcome = invoke_inner(&invocation).await;
    NodeCompletion { node_id, outcome }
}

async fn invoke_inner(inv: &NodeInvocation) -> NodeOutcome {
    let node_id = &inv.node.id;

    // ------------------------------------------------------------------
    // 1. Transition to RUNNING, record the observed input.
    // ------------------------------------------------------------------
    let input_json = serde_json::to_value(&inv.input).unwrap_or(Value::Null);
    let running = inv
        .repository
        .update_node_execution(
            inv.execution_id,
            node_id,
            NodeExecutionPatch {
                status: Some(NodeExecutionStatus::Running),
                started_at: Some(Utc::now()),
                input_data: Some(input_json),
                attempt_count: Some(1),
                ..NodeExecutionPatch::default()
            },
        )
        .await;
    if let Err(e) = running {
        return NodeOutcome::Failed {
            kind: FailureKind::NodeExecution,
            message: format!("failed to persist node start: {e}"),
            attempts: 0,
        };
    }

    inv.events
        .publish(ExecutionEvent::NodeStarted {
            execution_id: inv.execution_id,
            node_id: node_id.clone(),
            timestamp: Utc::now(),
        })
        .await;

    // ------------------------------------------------------------------
    // 2–3. Build the expression context, resolve parameter templates.
    // ------------------------------------------------------------------
    let context = expression_context(inv);
    let parameters = match resolve_parameters(&inv.node.parameters, &context) {
        Ok(parameters) => parameters,
        Err(e) => {
            return NodeOutcome::Failed {
                kind: FailureKind::Expression,
                message: EngineError::ExpressionFailed(e).to_string(),
                attempts: 1,
            };
        }
    };

    if let Err(e) = nodes::validate_parameters(inv.node_impl.descriptor(), &parameters) {
        return NodeOutcome::Failed {
            kind: FailureKind::Validation,
            message: e.to_string(),
            attempts: 1,
        };
    }

    // ------------------------------------------------------------------
    // 4. Materialize credentials for the declared types.
    // ------------------------------------------------------------------
    let credentials = match materialize_credentials(inv).await {
        Ok(credentials) => credentials,
        Err(message) => {
            return NodeOutcome::Failed {
                kind: FailureKind::Credential,
                message: EngineError::CredentialUnavailable(message).to_string(),
                attempts: 1,
            };
        }
    };

    // ------------------------------------------------------------------
    // 5. Invoke, retrying per policy.
    // ------------------------------------------------------------------
    let ctx = InvocationContext {
        workflow_id: inv.workflow.id,
        execution_id: inv.execution_id,
        node_id: node_id.clone(),
        input: inv.input.clone(),
        parameters,
        credentials,
        helpers: inv.helpers.clone(),
        cancel: inv.cancel.clone(),
    };

    let mut attempt: u32 = 1;
    loop {
        if inv.cancel.is_cancelled() {
            return NodeOutcome::Cancelled { attempts: attempt };
        }
        if attempt > 1 {
            let _ = inv
                .repository
                .update_node_execution(
                    inv.execution_id,
                    node_id,
                    NodeExecutionPatch {
                        attempt_count: Some(attempt as i32),
                        ..NodeExecutionPatch::default()
                    },
                )
                .await;
        }

        debug!(%node_id, attempt, "invoking node");
        match inv.node_impl.execute(&ctx).await {
            Ok(output) => {
                return NodeOutcome::Success {
                    output,
                    attempts: attempt,
                };
            }
            Err(NodeError::Cancelled) => {
                return NodeOutcome::Cancelled { attempts: attempt };
            }
            Err(NodeError::Retryable(message))
                if inv.policy.retries(FailureKind::NodeExecution)
                    && attempt < inv.policy.max_attempts =>
            {
                let delay = inv.policy.delay_before(attempt);
                warn!(
                    %node_id,
                    attempt,
                    max_attempts = inv.policy.max_attempts,
                    ?delay,
                    "retryable node error, backing off: {message}"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = inv.cancel.cancelled() => {
                        return NodeOutcome::Cancelled { attempts: attempt };
                    }
                }
                attempt += 1;
            }
            Err(NodeError::Retryable(message)) | Err(NodeError::Fatal(message)) => {
                return NodeOutcome::Failed {
                    kind: FailureKind::NodeExecution,
                    message,
                    attempts: attempt,
                };
            }
        }
    }
}

/// Build the `$`-root context for this invocation.
fn expression_context(inv: &NodeInvocation) -> ExpressionContext {
    let mut context = ExpressionContext::new(Utc::now())
        .with_workflow(json!({
            "id": inv.workflow.id,
            "name": inv.workflow.name,
            "active": inv.workflow.active,
        }))
        .with_execution(json!({
            "id": inv.execution_id,
            "mode": inv.mode.as_str(),
        }))
        .with_vars(Value::Object(inv.workflow.settings.vars.clone()));

    // `$json` is the first item on the main input port.
    if let Some(first) = main_items(&inv.input).first() {
        context = context.with_json(first.json.clone());
    }
    for (name, data) in &inv.node_context {
        context = context.with_node(name, data.clone());
    }
    context
}

/// Resolve each declared credential type to a decrypted, sanitized payload.
///
/// Fails (with a message suitable for `CredentialUnavailable`) when a
/// required type has no usable credential among the node's credential ids.
async fn materialize_credentials(
    inv: &NodeInvocation,
) -> Result<HashMap<String, Map<String, Value>>, String> {
    let declared = &inv.node_impl.descriptor().credentials;
    let mut materialized = HashMap::new();
    if declared.is_empty() {
        return Ok(materialized);
    }

    // Resolve each credential id to its type once.
    let mut by_type: HashMap<String, Uuid> = HashMap::new();
    for credential_id in &inv.node.credential_ids {
        match inv.repository.find_credential_by_id(*credential_id).await {
            Ok(Some(record)) => {
                by_type.entry(record.credential_type).or_insert(record.id);
            }
            Ok(None) => {}
            Err(e) => return Err(format!("credential lookup failed: {e}")),
        }
    }

    for definition in declared {
        let Some(credential_id) = by_type.get(&definition.credential_type) else {
            if definition.required {
                return Err(format!(
                    "node '{}' requires a credential of type '{}'",
                    inv.node.id, definition.credential_type
                ));
            }
            continue;
        };

        match inv
            .credentials
            .get_for_execution(*credential_id, inv.workflow.user_id)
            .await
        {
            Ok(Some(decrypted)) => {
                materialized.insert(definition.credential_type.clone(), decrypted.payload);
            }
            Ok(None) => {
                return Err(format!(
                    "credential {credential_id} is not accessible to the workflow owner"
                ));
            }
            Err(e) => {
                // Expired or undecryptable; the message never carries payload.
                return Err(format!("credential {credential_id}: {e}"));
            }
        }
    }

    Ok(materialized)
}
