//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — re-invoked with exponential back-off, per policy.
/// - `Fatal`     — the node is immediately marked as failed.
/// - `Cancelled` — the abort signal was observed mid-flight.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the invocation.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node observed the cancellation signal and returned early.
    #[error("node execution cancelled")]
    Cancelled,
}
