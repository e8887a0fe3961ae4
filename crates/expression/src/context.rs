//! The execution context expressions are bound against.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Everything a `{{ … }}` fragment may reference.
///
/// Built by the engine once per node invocation.  `now` is sampled when the
/// context is built, so repeated evaluation of `$now` inside one resolution
/// pass is stable.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    /// `$json` — the immediate input items of the current node.
    pub json: Value,
    /// `$node["Name"]` — output data of completed upstream nodes, keyed by
    /// node name.  Each value carries `json` (first item) and `items` (all
    /// items of the main port).
    pub nodes: HashMap<String, Value>,
    /// `$workflow` — `{id, name, active}`.
    pub workflow: Value,
    /// `$execution` — `{id, mode}`.
    pub execution: Value,
    /// `$vars` — workflow-level variables.
    pub vars: Value,
    /// `$itemIndex` — 0-based index in a per-item iteration.
    pub item_index: usize,
    /// `$now` — timestamp at evaluation start.
    pub now: DateTime<Utc>,
}

impl ExpressionContext {
    /// An empty context pinned to `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            json: Value::Null,
            nodes: HashMap::new(),
            workflow: json!({}),
            execution: json!({}),
            vars: json!({}),
            item_index: 0,
            now,
        }
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = json;
        self
    }

    pub fn with_node(mut self, name: &str, data: Value) -> Self {
        self.nodes.insert(name.to_owned(), data);
        self
    }

    pub fn with_vars(mut self, vars: Value) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_workflow(mut self, workflow: Value) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn with_execution(mut self, execution: Value) -> Self {
        self.execution = execution;
        self
    }

    /// ISO-8601 form of `$now`.
    pub fn now_iso(&self) -> String {
        self.now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// Date-only form of `$now`.
    pub fn today_iso(&self) -> String {
        self.now.date_naive().to_string()
    }

    /// `isExecuted(name)` — whether the named node has completed.
    pub fn is_executed(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// `hasData(name)` — whether the named node completed with at least one
    /// item on its main port.
    pub fn has_data(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .and_then(|data| data.get("items"))
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty())
    }

    /// `getNodeData(name, default)` — the node's data, or `default` when the
    /// node has not executed.
    pub fn get_node_data(&self, name: &str, default: Value) -> Value {
        self.nodes.get(name).cloned().unwrap_or(default)
    }

    /// `firstExecuted(names)` — the first name in `names` that has executed.
    pub fn first_executed<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Option<String> {
        names
            .into_iter()
            .find(|name| self.nodes.contains_key(*name))
            .map(str::to_owned)
    }
}
