//! `MockNode` — a test double for [`NodeType`].
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use credentials::types::CredentialTypeRegistry;

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, main_port, Item, PortData};
use crate::traits::{Helpers, InvocationContext, NodeType};
use crate::NodeError;

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return one item carrying the given JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail `Retryable` for the first N calls, then return the value.
    FailFirstN { failures: Mutex<u32>, then: Value },
    /// Sleep, observing cancellation, then forward the input.
    Sleep(Duration),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    descriptor: NodeDescriptor,
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<PortData>>>,
}

impl MockNode {
    fn with_behaviour(identifier: &str, behaviour: MockBehaviour) -> Self {
        Self {
            descriptor: NodeDescriptor::new(identifier, identifier, 1),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(identifier: &str, value: Value) -> Self {
        Self::with_behaviour(identifier, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(identifier: &str, msg: impl Into<String>) -> Self {
        Self::with_behaviour(identifier, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(identifier: &str, msg: impl Into<String>) -> Self {
        Self::with_behaviour(identifier, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails the first `failures` calls, then succeeds.
    pub fn flaky(identifier: &str, failures: u32, then: Value) -> Self {
        Self::with_behaviour(
            identifier,
            MockBehaviour::FailFirstN {
                failures: Mutex::new(failures),
                then,
            },
        )
    }

    /// Create a mock that sleeps for `duration` before forwarding its input.
    pub fn sleeping(identifier: &str, duration: Duration) -> Self {
        Self::with_behaviour(identifier, MockBehaviour::Sleep(duration))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeType for MockNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        self.calls.lock().unwrap().push(ctx.input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the node's own fields over a marker so tests can
                // trace the data flowing through the pipeline.
                let mut out = json!({ "node": self.descriptor.identifier });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(main_port(vec![Item::from_json(out)]))
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailFirstN { failures, then } => {
                let mut remaining = failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(NodeError::Retryable("transient mock failure".into()))
                } else {
                    Ok(main_port(vec![Item::from_json(then.clone())]))
                }
            }
            MockBehaviour::Sleep(duration) => {
                tokio::select! {
                    () = tokio::time::sleep(*duration) => {
                        Ok(main_port(main_items(&ctx.input).to_vec()))
                    }
                    () = ctx.cancel.cancelled() => Err(NodeError::Cancelled),
                }
            }
        }
    }
}

/// Build an [`InvocationContext`] for direct node tests.
pub fn invocation(parameters: Value, input: PortData) -> InvocationContext {
    InvocationContext {
        workflow_id: Uuid::new_v4(),
        execution_id: Uuid::new_v4(),
        node_id: "test-node".into(),
        input,
        parameters: parameters.as_object().cloned().unwrap_or_default(),
        credentials: HashMap::new(),
        helpers: Helpers::new(Arc::new(CredentialTypeRegistry::with_core_types())),
        cancel: CancellationToken::new(),
    }
}
