//! Record structs that cross the [`Repository`](crate::Repository) boundary.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types (the workflow graph itself) live in the `engine` crate and
//! travel through here as opaque JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Full JSON workflow definition (nodes, connections, settings, …).
    pub definition: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// Terminal and in-flight statuses for a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "success"   => Ok(Self::Success),
            "error"     => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One dynamic run of a workflow.
///
/// Created when an execution is submitted, mutated once per terminal
/// transition, then immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: Uuid,
    /// Snapshot of the workflow definition taken at submission time.
    pub snapshot: serde_json::Value,
    /// Arbitrary structured value supplied by the caller.
    pub trigger_data: serde_json::Value,
    /// Submission mode (`manual`, `trigger`, `webhook`, `schedule`).
    pub mode: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Partial update applied at an execution's terminal transition.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// node executions
// ---------------------------------------------------------------------------

/// Per-node statuses within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeExecutionStatus {
    Queued,
    Running,
    Success,
    Error,
    Cancelled,
    Skipped,
}

impl std::fmt::Display for NodeExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for NodeExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued"    => Ok(Self::Queued),
            "running"   => Ok(Self::Running),
            "success"   => Ok(Self::Success),
            "error"     => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            "skipped"   => Ok(Self::Skipped),
            other       => Err(format!("unknown node execution status: {other}")),
        }
    }
}

/// One node's run within an execution, keyed by `(execution_id, node_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub execution_id: Uuid,
    pub node_id: String,
    pub status: NodeExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The actual input the node observed, grouped by input port.
    pub input_data: Option<serde_json::Value>,
    /// The payload the node produced, grouped by output port.
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempt_count: i32,
}

/// Partial update applied at every node status transition.
///
/// Carries the attempt count so concurrent writers keyed by
/// `(execution_id, node_id)` stay consistent.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutionPatch {
    pub status: Option<NodeExecutionStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempt_count: Option<i32>,
}

// ---------------------------------------------------------------------------
// credentials
// ---------------------------------------------------------------------------

/// An encrypted, named payload of secrets bound to a credential type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Unique per owning user.
    pub name: String,
    /// Matches a registered credential type.
    pub credential_type: String,
    /// `HEX(IV) ":" HEX(ciphertext)` — see the credentials crate.
    pub ciphertext: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who a credential is shared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ShareSubject {
    User(Uuid),
    Team(Uuid),
}

/// Permission level granted by a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SharePermission {
    Use,
    View,
    Edit,
}

/// A share row granting `subject` access to `credential_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialShareRecord {
    pub credential_id: Uuid,
    pub subject: ShareSubject,
    pub permission: SharePermission,
}
