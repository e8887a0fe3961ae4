//! Maps node-type identifiers to implementations.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::builtin;
use crate::properties::validate_parameters;
use crate::traits::NodeType;
use crate::NodeError;

/// Process-wide node-type registry.
///
/// Populated during the startup "register core + register plugins" phase and
/// read-only afterwards, so readers need no synchronization.
#[derive(Default)]
pub struct NodeRegistry {
    types: HashMap<String, Arc<dyn NodeType>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in node library.
    pub fn with_core_nodes() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtin::ManualTrigger::new()));
        registry.register(Arc::new(builtin::ScheduleTrigger::new()));
        registry.register(Arc::new(builtin::WebhookTrigger::new()));
        registry.register(Arc::new(builtin::Set::new()));
        registry.register(Arc::new(builtin::JsonParse::new()));
        registry.register(Arc::new(builtin::IfElse::new()));
        registry.register(Arc::new(builtin::HttpRequest::new()));
        registry.register(Arc::new(builtin::Delay::new()));
        registry.register(Arc::new(builtin::NoOp::new()));
        registry
    }

    pub fn register(&mut self, node_type: Arc<dyn NodeType>) {
        self.types
            .insert(node_type.descriptor().identifier.clone(), node_type);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn NodeType>> {
        self.types.get(identifier).cloned()
    }

    /// Resolve a type or fail with a fatal error naming it.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn NodeType>, NodeError> {
        self.get(identifier).ok_or_else(|| {
            NodeError::Fatal(format!("no node type registered for '{identifier}'"))
        })
    }

    /// Validate raw parameter values against a type's property schema.
    pub fn validate_parameters(
        &self,
        identifier: &str,
        values: &Map<String, Value>,
    ) -> Result<(), NodeError> {
        let node_type = self.resolve(identifier)?;
        validate_parameters(node_type.descriptor(), values)
    }

    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.types.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
