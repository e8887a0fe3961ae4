//! `engine` crate — domain models, topology analysis, and the execution
//! engine.
//!
//! The engine drives a workflow from submission to terminal state: it
//! snapshots the workflow, analyzes the graph, schedules ready nodes onto a
//! bounded worker pool, resolves parameters through the expression
//! evaluator, materializes credentials, applies the retry policy, and emits
//! progress events while persisting every transition through the repository.

pub mod config;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod invoker;
pub mod models;
pub mod stats;

pub use config::{EngineConfig, RetryPolicy};
pub use dag::Topology;
pub use error::EngineError;
pub use events::{EventBus, EventStream, ExecutionEvent};
pub use executor::ExecutionEngine;
pub use models::{Connection, ExecutionMode, Node, NodeSettings, Workflow, WorkflowSettings};

#[cfg(test)]
mod executor_tests;
