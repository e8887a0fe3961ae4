//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
///
/// Messages never carry credential plaintext or key material.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Lookup errors ------

    /// Workflow or execution lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// The workflow has no trigger node matching the submission.
    #[error("workflow has no trigger available for this submission")]
    NoTriggerAvailable,

    // ------ Graph validation errors ------

    /// Two or more nodes share an ID or a name.
    #[error("duplicate node identity: '{0}'")]
    DuplicateNode(String),

    /// A connection references a node or port that doesn't exist.
    #[error("connection references unknown {side} '{reference}'")]
    UnknownReference {
        reference: String,
        side: &'static str,
    },

    /// A connection loops a node onto itself.
    #[error("self-loop on node '{0}'")]
    SelfLoop(String),

    /// The enabled subgraph is not acyclic.
    #[error("workflow graph contains a cycle through: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    // ------ Per-node failure kinds ------

    /// Node or credential parameter validation failed.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The expression evaluator rejected a parameter template.
    #[error(transparent)]
    ExpressionFailed(#[from] expression::ExpressionError),

    /// A declared credential is missing, expired, or unauthorized.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The node's `execute` failed.
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    // ------ Lifecycle ------

    /// The cancellation signal was observed.
    #[error("execution cancelled")]
    Cancelled,

    /// The execution timeout elapsed.
    #[error("execution timed out")]
    Timeout,

    // ------ Infrastructure ------

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// A workflow snapshot failed to (de)serialize.
    #[error("snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
}
