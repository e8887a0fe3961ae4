//! Topology analysis — run before any node is scheduled.
//!
//! Rules enforced:
//! 1. Node IDs and node names must be unique within the workflow.
//! 2. Every connection must reference existing nodes and existing ports on
//!    the respective node types; self-loops are forbidden.
//! 3. Disabled nodes are bypassed as identity pass-throughs.
//! 4. Entry nodes are the trigger nodes matching the submission mode.
//! 5. The enabled subgraph must be acyclic (Kahn's algorithm).

use std::collections::{HashMap, HashSet, VecDeque};

use nodes::NodeRegistry;

use crate::models::{ExecutionMode, Workflow};
use crate::EngineError;
use nodes::TriggerType;

/// One end of an effective (disabled-bypassed) edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub node_id: String,
    pub port: String,
}

/// The analyzed graph the scheduler runs on.
#[derive(Debug, Default)]
pub struct Topology {
    /// `out[n]` — outgoing edges from `n`, grouped by source output port.
    pub out: HashMap<String, HashMap<String, Vec<Endpoint>>>,
    /// `incoming[n]` — incoming edges to `n`, grouped by target input port.
    /// Sources are `(source node, source output port)` in connection order.
    pub incoming: HashMap<String, HashMap<String, Vec<Endpoint>>>,
    /// `pred[n]` — the distinct nodes `n` waits on.
    pub pred: HashMap<String, HashSet<String>>,
    /// `succ[n]` — the distinct nodes waiting on `n`.
    pub succ: HashMap<String, HashSet<String>>,
    /// Trigger nodes selected as entry points for this submission.
    pub entry: Vec<String>,
    /// Enabled nodes reachable from the entry set.
    pub reachable: HashSet<String>,
}

impl Topology {
    /// Analyze `workflow` for a submission in `mode`.
    ///
    /// # Errors
    /// - [`EngineError::DuplicateNode`] for id or name collisions.
    /// - [`EngineError::UnknownReference`] for dangling nodes or ports.
    /// - [`EngineError::SelfLoop`] for a connection onto the same node.
    /// - [`EngineError::ValidationFailed`] for unregistered node types.
    /// - [`EngineError::NoTriggerAvailable`] when no trigger matches.
    /// - [`EngineError::Cycle`] when the enabled subgraph is not a DAG.
    pub fn analyze(
        workflow: &Workflow,
        registry: &NodeRegistry,
        mode: ExecutionMode,
    ) -> Result<Self, EngineError> {
        // ------------------------------------------------------------------
        // 1. Identity uniqueness
        // ------------------------------------------------------------------
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_names: HashSet<&str> = HashSet::new();
        for node in &workflow.nodes {
            if !seen_ids.insert(node.id.as_str()) {
                return Err(EngineError::DuplicateNode(node.id.clone()));
            }
            if !seen_names.insert(node.name.as_str()) {
                return Err(EngineError::DuplicateNode(node.name.clone()));
            }
        }

        // Resolve every node's descriptor once; unknown types fail early.
        let mut descriptors = HashMap::new();
        for node in &workflow.nodes {
            let node_type = registry.get(&node.node_type).ok_or_else(|| {
                EngineError::ValidationFailed(format!(
                    "node '{}' references unregistered type '{}'",
                    node.id, node.node_type
                ))
            })?;
            descriptors.insert(node.id.as_str(), node_type.descriptor().clone());
        }

        // ------------------------------------------------------------------
        // 2. Connection endpoints and ports
        // ------------------------------------------------------------------
        for connection in &workflow.connections {
            if connection.source_node_id == connection.target_node_id {
                return Err(EngineError::SelfLoop(connection.source_node_id.clone()));
            }
            let source = descriptors
                .get(connection.source_node_id.as_str())
                .ok_or_else(|| EngineError::UnknownReference {
                    reference: connection.source_node_id.clone(),
                    side: "source node",
                })?;
            if !source.has_output(&connection.source_output) {
                return Err(EngineError::UnknownReference {
                    reference: format!("{}:{}", connection.source_node_id, connection.source_output),
                    side: "output port",
                });
            }
            let target = descriptors
                .get(connection.target_node_id.as_str())
                .ok_or_else(|| EngineError::UnknownReference {
                    reference: connection.target_node_id.clone(),
                    side: "target node",
                })?;
            if !target.has_input(&connection.target_input) {
                return Err(EngineError::UnknownReference {
                    reference: format!("{}:{}", connection.target_node_id, connection.target_input),
                    side: "input port",
                });
            }
        }

        // ------------------------------------------------------------------
        // 3. Bypass disabled nodes (identity pass-through)
        // ------------------------------------------------------------------
        // Edge tuples: (source, source output, target, target input).
        let mut edges: Vec<(String, String, String, String)> = workflow
            .connections
            .iter()
            .map(|c| {
                (
                    c.source_node_id.clone(),
                    c.source_output.clone(),
                    c.target_node_id.clone(),
                    c.target_input.clone(),
                )
            })
            .collect();

        for disabled in workflow.nodes.iter().filter(|n| n.disabled) {
            let inbound: Vec<_> = edges
                .iter()
                .filter(|(_, _, t, _)| *t == disabled.id)
                .cloned()
                .collect();
            let outbound: Vec<_> = edges
                .iter()
                .filter(|(s, _, _, _)| *s == disabled.id)
                .cloned()
                .collect();
            edges.retain(|(s, _, t, _)| *s != disabled.id && *t != disabled.id);

            // Splice sources to targets, preserving the outer ports.
            for (s, sp, _, _) in &inbound {
                for (_, _, t, tp) in &outbound {
                    if s != t {
                        edges.push((s.clone(), sp.clone(), t.clone(), tp.clone()));
                    }
                }
            }
        }

        // ------------------------------------------------------------------
        // 4. Entry nodes — triggers matching the submission
        // ------------------------------------------------------------------
        let enabled: Vec<&crate::models::Node> =
            workflow.nodes.iter().filter(|n| !n.disabled).collect();

        let triggers: Vec<&crate::models::Node> = enabled
            .iter()
            .copied()
            .filter(|n| descriptors[n.id.as_str()].is_trigger())
            .collect();
        if triggers.is_empty() {
            return Err(EngineError::NoTriggerAvailable);
        }

        let entry: Vec<String> = triggers
            .iter()
            .filter(|n| {
                let trigger_type = descriptors[n.id.as_str()].trigger_type;
                match mode {
                    // Manual submissions fire every trigger.
                    ExecutionMode::Manual => true,
                    ExecutionMode::Trigger => true,
                    ExecutionMode::Webhook => trigger_type == Some(TriggerType::Webhook),
                    ExecutionMode::Schedule => trigger_type == Some(TriggerType::Schedule),
                }
            })
            .map(|n| n.id.clone())
            .collect();
        if entry.is_empty() {
            return Err(EngineError::NoTriggerAvailable);
        }

        // ------------------------------------------------------------------
        // 5. Adjacency, predecessor counts, acyclicity (Kahn)
        // ------------------------------------------------------------------
        let mut topology = Topology {
            entry,
            ..Topology::default()
        };

        for node in &enabled {
            topology.out.entry(node.id.clone()).or_default();
            topology.incoming.entry(node.id.clone()).or_default();
            topology.pred.entry(node.id.clone()).or_default();
            topology.succ.entry(node.id.clone()).or_default();
        }

        for (source, source_output, target, target_input) in &edges {
            topology
                .out
                .get_mut(source)
                .expect("enabled source")
                .entry(source_output.clone())
                .or_default()
                .push(Endpoint {
                    node_id: target.clone(),
                    port: target_input.clone(),
                });
            topology
                .incoming
                .get_mut(target)
                .expect("enabled target")
                .entry(target_input.clone())
                .or_default()
                .push(Endpoint {
                    node_id: source.clone(),
                    port: source_output.clone(),
                });
            topology
                .pred
                .get_mut(target)
                .expect("enabled target")
                .insert(source.clone());
            topology
                .succ
                .get_mut(source)
                .expect("enabled source")
                .insert(target.clone());
        }

        let mut in_degree: HashMap<&str, usize> = topology
            .pred
            .iter()
            .map(|(id, preds)| (id.as_str(), preds.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut visited = 0usize;

        while let Some(node_id) = queue.pop_front() {
            visited += 1;
            if let Some(successors) = topology.succ.get(node_id) {
                for successor in successors {
                    let degree = in_degree.get_mut(successor.as_str()).expect("enabled node");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(successor.as_str());
                    }
                }
            }
        }

        if visited != enabled.len() {
            let mut nodes: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_owned())
                .collect();
            nodes.sort_unstable();
            return Err(EngineError::Cycle { nodes });
        }

        // ------------------------------------------------------------------
        // 6. Reachability from the entry set
        // ------------------------------------------------------------------
        let mut frontier: VecDeque<&str> = topology.entry.iter().map(String::as_str).collect();
        while let Some(node_id) = frontier.pop_front() {
            if !topology.reachable.insert(node_id.to_owned()) {
                continue;
            }
            if let Some(successors) = topology.succ.get(node_id) {
                for successor in successors {
                    if !topology.reachable.contains(successor.as_str()) {
                        frontier.push_back(successor.as_str());
                    }
                }
            }
        }

        Ok(topology)
    }

    /// Transitive predecessors of `node_id` over the effective graph.
    pub fn ancestors(&self, node_id: &str) -> HashSet<String> {
        let mut ancestors = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::from([node_id]);
        while let Some(current) = frontier.pop_front() {
            if let Some(preds) = self.pred.get(current) {
                for pred in preds {
                    if ancestors.insert(pred.clone()) {
                        frontier.push_back(pred.as_str());
                    }
                }
            }
        }
        ancestors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connection, Node, Workflow};
    use nodes::NodeRegistry;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_core_nodes()
    }

    fn trigger(id: &str) -> Node {
        Node::new(id, id, "manualTrigger")
    }

    fn step(id: &str) -> Node {
        Node::new(id, id, "noOp")
    }

    #[test]
    fn linear_graph_analyzes() {
        // t → a → b
        let workflow = Workflow::new(
            "linear",
            vec![trigger("t"), step("a"), step("b")],
            vec![Connection::new("t", "a"), Connection::new("a", "b")],
        );
        let topology = Topology::analyze(&workflow, &registry(), ExecutionMode::Manual).unwrap();

        assert_eq!(topology.entry, vec!["t"]);
        assert_eq!(topology.pred["b"], HashSet::from(["a".to_owned()]));
        assert!(topology.reachable.contains("b"));
        assert_eq!(topology.ancestors("b"), HashSet::from(["t".to_owned(), "a".to_owned()]));
    }

    #[test]
    fn cycle_is_detected() {
        // t → a → b → a
        let workflow = Workflow::new(
            "cyclic",
            vec![trigger("t"), step("a"), step("b")],
            vec![
                Connection::new("t", "a"),
                Connection::new("a", "b"),
                Connection::new("b", "a"),
            ],
        );
        let err = Topology::analyze(&workflow, &registry(), ExecutionMode::Manual).unwrap_err();
        assert!(matches!(err, EngineError::Cycle { ref nodes } if nodes == &["a", "b"]));
    }

    #[test]
    fn self_loop_is_rejected() {
        let workflow = Workflow::new(
            "loopy",
            vec![trigger("t"), step("a")],
            vec![Connection::new("t", "a"), Connection::new("a", "a")],
        );
        assert!(matches!(
            Topology::analyze(&workflow, &registry(), ExecutionMode::Manual),
            Err(EngineError::SelfLoop(_))
        ));
    }

    #[test]
    fn unknown_port_is_rejected() {
        let workflow = Workflow::new(
            "badport",
            vec![trigger("t"), step("a")],
            vec![Connection::from_output("t", "sideband", "a")],
        );
        assert!(matches!(
            Topology::analyze(&workflow, &registry(), ExecutionMode::Manual),
            Err(EngineError::UnknownReference { side: "output port", .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut duplicate = step("b");
        duplicate.name = "a".into();
        let workflow = Workflow::new(
            "dupe",
            vec![trigger("t"), Node::new("a", "a", "noOp"), duplicate],
            vec![],
        );
        assert!(matches!(
            Topology::analyze(&workflow, &registry(), ExecutionMode::Manual),
            Err(EngineError::DuplicateNode(_))
        ));
    }

    #[test]
    fn workflow_without_triggers_has_no_entry() {
        let workflow = Workflow::new("untriggered", vec![step("a"), step("b")], vec![
            Connection::new("a", "b"),
        ]);
        assert!(matches!(
            Topology::analyze(&workflow, &registry(), ExecutionMode::Manual),
            Err(EngineError::NoTriggerAvailable)
        ));
    }

    #[test]
    fn webhook_submission_selects_only_webhook_triggers() {
        let workflow = Workflow::new(
            "multi-trigger",
            vec![
                trigger("manual"),
                Node::new("hook", "hook", "webhookTrigger"),
                step("a"),
            ],
            vec![Connection::new("manual", "a"), Connection::new("hook", "a")],
        );

        let topology = Topology::analyze(&workflow, &registry(), ExecutionMode::Webhook).unwrap();
        assert_eq!(topology.entry, vec!["hook"]);

        let topology = Topology::analyze(&workflow, &registry(), ExecutionMode::Manual).unwrap();
        assert_eq!(topology.entry.len(), 2);
    }

    #[test]
    fn disabled_nodes_are_bypassed_with_port_preservation() {
        // t → d(disabled) → a   becomes   t → a
        let workflow = Workflow::new(
            "bypass",
            vec![trigger("t"), step("d").disabled(), step("a")],
            vec![Connection::new("t", "d"), Connection::new("d", "a")],
        );
        let topology = Topology::analyze(&workflow, &registry(), ExecutionMode::Manual).unwrap();

        assert!(!topology.pred.contains_key("d"));
        assert_eq!(topology.pred["a"], HashSet::from(["t".to_owned()]));
        let outs = &topology.out["t"][nodes::MAIN_PORT];
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].node_id, "a");
    }
}
