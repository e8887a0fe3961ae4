//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory.  They serialize to/from the JSON `definition` column of the
//! workflows table and into the per-execution snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How an execution was submitted.  Trigger selection and `$execution.mode`
/// both derive from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Manual,
    Trigger,
    Webhook,
    Schedule,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Trigger => "trigger",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual"   => Ok(Self::Manual),
            "trigger"  => Ok(Self::Trigger),
            "webhook"  => Ok(Self::Webhook),
            "schedule" => Ok(Self::Schedule),
            other      => Err(format!("unknown execution mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Per-node behaviour overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Retry this node on failure, overriding the engine-wide policy.
    pub retry_on_fail: bool,
    /// Attempt ceiling when `retry_on_fail` is set.
    pub max_tries: Option<u32>,
    /// Fixed delay between tries when `retry_on_fail` is set.
    pub wait_between_tries_ms: Option<u64>,
    /// On failure, forward an error item instead of failing the branch.
    pub continue_on_fail: bool,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow (referenced by connections).
    pub id: String,
    /// Unique display name, used in expressions as `$node["name"]`.
    pub name: String,
    /// Maps to a registered node type.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Raw parameter values; string values may contain `{{ … }}` templates.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Credentials this node may use — at most one per credential type.
    #[serde(default)]
    pub credential_ids: Vec<Uuid>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub settings: NodeSettings,
}

impl Node {
    /// Convenience constructor for tests and builders.
    pub fn new(id: &str, name: &str, node_type: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            parameters: Map::new(),
            credential_ids: Vec::new(),
            disabled: false,
            settings: NodeSettings::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters.as_object().cloned().unwrap_or_default();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source_node_id: String,
    #[serde(default = "main_port_name")]
    pub source_output: String,
    pub target_node_id: String,
    #[serde(default = "main_port_name")]
    pub target_input: String,
}

fn main_port_name() -> String {
    nodes::MAIN_PORT.to_owned()
}

impl Connection {
    /// Main-port-to-main-port edge.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_node_id: source.into(),
            source_output: main_port_name(),
            target_node_id: target.into(),
            target_input: main_port_name(),
        }
    }

    /// Edge from a named output port.
    pub fn from_output(source: &str, output: &str, target: &str) -> Self {
        Self {
            source_output: output.into(),
            ..Self::new(source, target)
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Workflow-wide execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Bound on the whole execution; expiry cancels with reason `Timeout`.
    pub execution_timeout_ms: Option<u64>,
    /// Escalation target: failures emit an event carrying this workflow id.
    pub error_workflow_id: Option<Uuid>,
    /// Record full input data on failing nodes (`all`) or drop it (`none`).
    pub save_data_error_execution: SaveDataMode,
    /// Workflow-level variables exposed to expressions as `$vars`.
    pub vars: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveDataMode {
    #[default]
    All,
    None,
}

/// A complete workflow definition.
///
/// Immutable during an execution: the engine snapshots it at submission and
/// uses the snapshot for the life of the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub active: bool,
}

impl Workflow {
    /// Convenience constructor for tests.
    pub fn new(name: &str, nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            connections,
            settings: WorkflowSettings::default(),
            active: true,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
