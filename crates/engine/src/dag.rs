//! DAG validation: run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//! 3. The directed graph must be acyclic (topological sort must succeed).
//! 4. A configured error-handler node must exist.
//!
//! Returns a topologically-sorted list of node IDs on success. Ties are
//! broken by declaration order so the result is deterministic.

use std::collections::{HashMap, HashSet, VecDeque};

use nodes::NodeRegistry;

use crate::{models::WorkflowDefinition, EngineError};

/// Validate the workflow's DAG and return nodes in topological execution order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
/// - [`EngineError::UnknownErrorHandler`] if the error handler is missing.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        for (node_id, side) in [(&edge.source, "source"), (&edge.target, "target")] {
            if !seen_ids.contains(node_id.as_str()) {
                return Err(EngineError::UnknownNodeReference {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                    side,
                });
            }
        }
    }

    if let Some(handler) = &workflow.error_handling.error_handler_node_id {
        if !seen_ids.contains(handler.as_str()) {
            return Err(EngineError::UnknownErrorHandler(handler.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &workflow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for edge in &workflow.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    // Seed the queue with nodes that have no incoming edges.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != workflow.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

/// Check that every node type resolves in `registry`.
pub fn validate_node_types(
    workflow: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<(), EngineError> {
    for node in &workflow.nodes {
        if !registry.contains(node.node_type(), node.integration_type()) {
            return Err(EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.step_type(),
            });
        }
    }
    Ok(())
}

/// Full save-time validation: graph shape plus node types.
pub fn validate_workflow(
    workflow: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<Vec<String>, EngineError> {
    let order = validate_dag(workflow)?;
    validate_node_types(workflow, registry)?;
    Ok(order)
}

// ---------------------------------------------------------------------------
// Graph index
// ---------------------------------------------------------------------------

/// Edge lookups by node, as indices into `WorkflowDefinition::edges`.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    pub order: Vec<String>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
}

impl GraphIndex {
    /// Validates the graph and indexes its edges.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, EngineError> {
        let order = validate_dag(workflow)?;
        let mut index = Self { order, ..Default::default() };
        for (i, edge) in workflow.edges.iter().enumerate() {
            index.outgoing.entry(edge.source.clone()).or_default().push(i);
            index.incoming.entry(edge.target.clone()).or_default().push(i);
        }
        Ok(index)
    }

    pub fn incoming(&self, node_id: &str) -> &[usize] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, node_id: &str) -> &[usize] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `roots` plus everything reachable from them.
    pub fn reachable_from<'a>(
        &self,
        workflow: &WorkflowDefinition,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = roots.into_iter().map(str::to_owned).collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for &e in self.outgoing(&id) {
                stack.push(workflow.edges[e].target.clone());
            }
        }
        seen
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeData, NodeData, WorkflowEdge, WorkflowNode};

    fn make_node(id: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            kind: "action".into(),
            position: Default::default(),
            data: NodeData {
                node_type: "log".into(),
                ..Default::default()
            },
            size: None,
            selected: None,
        }
    }

    fn edge(source: &str, target: &str) -> WorkflowEdge {
        WorkflowEdge {
            id: format!("{source}-{target}"),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            label: None,
            edge_type: None,
            animated: false,
            data: EdgeData::default(),
        }
    }

    fn make_workflow(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDefinition {
        WorkflowDefinition {
            nodes,
            edges,
            ..Default::default()
        }
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![edge("a", "b"), edge("b", "c")],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c"), make_node("d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let workflow = make_workflow(vec![make_node("a"), make_node("a")], vec![]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let workflow = make_workflow(vec![make_node("a")], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownNodeReference { node_id, side: "target", .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
        );
        assert!(matches!(validate_dag(&workflow), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn missing_error_handler_is_rejected() {
        let mut workflow = make_workflow(vec![make_node("a")], vec![]);
        workflow.error_handling.error_handler_node_id = Some("nope".into());
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownErrorHandler(id)) if id == "nope"
        ));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let mut node = make_node("a");
        node.data.node_type = "teleport".into();
        let workflow = make_workflow(vec![node], vec![]);
        let registry = NodeRegistry::with_builtins();
        assert!(matches!(
            validate_workflow(&workflow, &registry),
            Err(EngineError::UnknownNodeType { node_type, .. }) if node_type == "teleport"
        ));
    }

    #[test]
    fn reachable_from_follows_edges() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c"), make_node("d")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let index = GraphIndex::build(&workflow).unwrap();
        let reach = index.reachable_from(&workflow, ["b"]);
        assert_eq!(reach, HashSet::from(["b".to_string(), "c".to_string()]));
        assert_eq!(index.incoming("b").len(), 1);
        assert!(index.outgoing("d").is_empty());
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let workflow = make_workflow(vec![make_node("solo")], vec![]);
        let sorted = validate_dag(&workflow).expect("single node should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }
}
