//! The `NodeType` trait — the uniform invoke contract every node fulfils.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use credentials::auth::apply_authentication;
use credentials::types::CredentialTypeRegistry;
use credentials::RequestDescriptor;

use crate::descriptor::NodeDescriptor;
use crate::item::PortData;
use crate::NodeError;

/// Everything a node sees during one invocation.
///
/// Parameters have already been run through the expression evaluator and
/// credentials are decrypted and sanitized; nodes never parse `{{ … }}` or
/// touch ciphertext themselves.
#[derive(Clone)]
pub struct InvocationContext {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    /// Items that arrived, grouped by input port.
    pub input: PortData,
    /// Resolved parameter values.
    pub parameters: Map<String, Value>,
    /// Decrypted payloads scoped to this invocation, keyed by credential type.
    pub credentials: HashMap<String, Map<String, Value>>,
    pub helpers: Helpers,
    /// Abort signal bound to the execution's cancellation token.
    pub cancel: CancellationToken,
}

impl InvocationContext {
    /// Fetch a string parameter, falling back to `default`.
    pub fn param_str(&self, name: &str, default: &str) -> String {
        self.parameters
            .get(name)
            .and_then(Value::as_str)
            .map_or_else(|| default.to_owned(), str::to_owned)
    }

    /// Fetch a required string parameter.
    pub fn require_str(&self, name: &str) -> Result<String, NodeError> {
        self.parameters
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| NodeError::Fatal(format!("parameter '{name}' is required")))
    }

    /// Fetch a numeric parameter, falling back to `default`.
    pub fn param_f64(&self, name: &str, default: f64) -> f64 {
        self.parameters
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }
}

/// Shared helper surface injected into every invocation.
#[derive(Clone)]
pub struct Helpers {
    credential_types: Arc<CredentialTypeRegistry>,
    client: reqwest::Client,
}

impl Helpers {
    pub fn new(credential_types: Arc<CredentialTypeRegistry>) -> Self {
        Self {
            credential_types,
            client: reqwest::Client::new(),
        }
    }

    /// Apply the credential type's authentication policy to `request`, then
    /// send it.  Cancellation is observed while the request is in flight.
    pub async fn request_with_authentication(
        &self,
        credential_type: &str,
        payload: &Map<String, Value>,
        mut request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value, NodeError> {
        let definition = self
            .credential_types
            .resolve(credential_type)
            .map_err(|e| NodeError::Fatal(e.to_string()))?;
        apply_authentication(&mut request, &definition, payload)
            .map_err(|e| NodeError::Fatal(e.to_string()))?;
        self.request(request, cancel).await
    }

    /// Send a request descriptor and return the response body (JSON when the
    /// body parses, a string otherwise).
    pub async fn request(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value, NodeError> {
        let method = request
            .method
            .parse::<reqwest::Method>()
            .map_err(|_| NodeError::Fatal(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            result = builder.send() => {
                result.map_err(|e| classify_reqwest_error(&e))?
            }
            () = cancel.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        let text = tokio::select! {
            result = response.text() => {
                result.map_err(|e| classify_reqwest_error(&e))?
            }
            () = cancel.cancelled() => return Err(NodeError::Cancelled),
        };

        if status.is_server_error() {
            return Err(NodeError::Retryable(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(NodeError::Fatal(format!("HTTP {status}")));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Connection-level failures are worth retrying; everything else is fatal.
fn classify_reqwest_error(err: &reqwest::Error) -> NodeError {
    if err.is_timeout() || err.is_connect() {
        NodeError::Retryable(err.to_string())
    } else {
        NodeError::Fatal(err.to_string())
    }
}

/// The core node trait.
///
/// All built-in nodes and plugins implement this; the engine dispatches
/// execution through the trait object.
#[async_trait]
pub trait NodeType: Send + Sync {
    /// The static descriptor (ports, properties, credentials, trigger kind).
    fn descriptor(&self) -> &NodeDescriptor;

    /// Execute the node and return items grouped by output port.
    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError>;
}
