//! Static description of a node type.

use serde::{Deserialize, Serialize};

use crate::item::MAIN_PORT;
use crate::properties::NodeProperty;

/// How a trigger-category node sources its executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Manual,
    Polling,
    WorkflowCalled,
    Error,
}

/// A credential a node may consume, keyed by credential-type name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDefinition {
    pub credential_type: String,
    #[serde(default)]
    pub required: bool,
}

/// Everything the registry knows about a node type before invoking it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Registry key, e.g. `ifElse`.
    pub identifier: String,
    pub display_name: String,
    /// Category tags, e.g. `["transform"]` or `["trigger"]`.
    pub group: Vec<String>,
    pub version: u32,
    /// Ordered named input ports.
    pub inputs: Vec<String>,
    /// Ordered named output ports.
    pub outputs: Vec<String>,
    /// Ports that consume a capability from a connected sibling rather than
    /// a data stream (agent-style nodes).
    #[serde(default)]
    pub service_inputs: Vec<String>,
    pub properties: Vec<NodeProperty>,
    #[serde(default)]
    pub credentials: Vec<CredentialDefinition>,
    /// Present only on trigger-category nodes.
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
}

impl NodeDescriptor {
    /// A descriptor with one `main` input and one `main` output.
    pub fn new(identifier: &str, display_name: &str, version: u32) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            group: vec![],
            version,
            inputs: vec![MAIN_PORT.into()],
            outputs: vec![MAIN_PORT.into()],
            service_inputs: vec![],
            properties: vec![],
            credentials: vec![],
            trigger_type: None,
        }
    }

    /// A trigger descriptor: no inputs, one `main` output.
    pub fn trigger(identifier: &str, display_name: &str, trigger_type: TriggerType) -> Self {
        Self {
            inputs: vec![],
            group: vec!["trigger".into()],
            trigger_type: Some(trigger_type),
            ..Self::new(identifier, display_name, 1)
        }
    }

    pub fn with_group(mut self, group: &[&str]) -> Self {
        self.group = group.iter().map(|g| (*g).to_owned()).collect();
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    pub fn with_properties(mut self, properties: Vec<NodeProperty>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_credentials(mut self, credentials: Vec<CredentialDefinition>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Whether this type belongs to the trigger category.
    pub fn is_trigger(&self) -> bool {
        self.trigger_type.is_some()
    }

    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|p| p == port) || self.service_inputs.iter().any(|p| p == port)
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|p| p == port)
    }
}
