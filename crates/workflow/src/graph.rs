//! Dependency graph built on `petgraph`.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use strata_core::NodeId;

use crate::connection::Connection;
use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;

/// The execution dependencies between workflow nodes.
///
/// Node indices follow declaration order, so every query that returns
/// several nodes returns them in declaration order.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, Connection>,
    index_map: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    /// Build a [`DependencyGraph`] from a [`WorkflowDefinition`].
    ///
    /// Returns an error if a node id is duplicated or a connection references
    /// an unknown node. Cycles (including self-loops) are accepted here and
    /// reported by [`find_cycle`](Self::find_cycle).
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, ValidationError> {
        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();

        for node in &definition.nodes {
            let idx = graph.add_node(node.id);
            if index_map.insert(node.id, idx).is_some() {
                return Err(ValidationError::DuplicateNodeId(node.id));
            }
        }

        for conn in &definition.connections {
            let from_idx = index_map
                .get(&conn.from_node)
                .ok_or(ValidationError::UnknownNode(conn.from_node))?;
            let to_idx = index_map
                .get(&conn.to_node)
                .ok_or(ValidationError::UnknownNode(conn.to_node))?;
            graph.add_edge(*from_idx, *to_idx, conn.clone());
        }

        Ok(Self { graph, index_map })
    }

    /// Returns `true` if the graph contains at least one cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        algo::is_cyclic_directed(&self.graph)
    }

    /// Find one cycle, listed in edge order starting from its earliest
    /// declared node. The last node has an edge back to the first.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let mut components: Vec<Vec<NodeIndex>> = algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .collect();
        for scc in &mut components {
            scc.sort_unstable();
        }
        components.sort_unstable_by_key(|scc| scc[0]);

        let scc = components.first()?;
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = scc[0];

        // Shortest path from `start` back to itself inside the component.
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.sorted_neighbors(current, Direction::Outgoing) {
                if !members.contains(&next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while cursor != start {
                        cursor = parent[&cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    return Some(path.into_iter().map(|idx| self.graph[idx]).collect());
                }
                if seen.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Topological sort of the graph, stage by stage. Returns an error if a
    /// cycle exists.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, ValidationError> {
        Ok(self.compute_levels()?.into_iter().flatten().collect())
    }

    /// Compute parallel execution stages using Kahn's algorithm.
    ///
    /// Stage `k` holds exactly the nodes whose predecessors all appear in
    /// stages before `k`; nodes within a stage keep declaration order.
    pub fn compute_levels(&self) -> Result<Vec<Vec<NodeId>>, ValidationError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut levels = Vec::new();
        let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();

        while !remaining.is_empty() {
            let (current_level, rest): (Vec<NodeIndex>, Vec<NodeIndex>) = remaining
                .into_iter()
                .partition(|idx| in_degree[idx.index()] == 0);

            if current_level.is_empty() {
                return Err(self.cycle_error());
            }

            for &idx in &current_level {
                for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                    in_degree[edge.target().index()] -= 1;
                }
            }

            remaining = rest;
            levels.push(
                current_level
                    .into_iter()
                    .map(|idx| self.graph[idx])
                    .collect(),
            );
        }

        Ok(levels)
    }

    /// Get all incoming connections (edges pointing TO this node).
    #[must_use]
    pub fn incoming_connections(&self, id: NodeId) -> Vec<&Connection> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Incoming).collect();
        edges.sort_by_key(|e| e.id());
        edges.into_iter().map(|e| e.weight()).collect()
    }

    /// Get all outgoing connections (edges leaving FROM this node).
    #[must_use]
    pub fn outgoing_connections(&self, id: NodeId) -> Vec<&Connection> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
        edges.sort_by_key(|e| e.id());
        edges.into_iter().map(|e| e.weight()).collect()
    }

    /// Nodes with no incoming edges.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Nodes with no outgoing edges.
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Distinct predecessor (upstream) node IDs of a given node.
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Distinct successor (downstream) node IDs of a given node.
    #[must_use]
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every node reachable from `id` through edges accepted by `follow`,
    /// excluding `id` itself.
    #[must_use]
    pub fn transitive_dependents<F>(&self, id: NodeId, follow: F) -> Vec<NodeId>
    where
        F: Fn(&Connection) -> bool,
    {
        let Some(&start) = self.index_map.get(&id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for edge in self.graph.edges_directed(current, Direction::Outgoing) {
                if follow(edge.weight()) && seen.insert(edge.target()) {
                    queue.push_back(edge.target());
                }
            }
        }
        seen.remove(&start);
        let mut found: Vec<NodeIndex> = seen.into_iter().collect();
        found.sort_unstable();
        found.into_iter().map(|idx| self.graph[idx]).collect()
    }

    /// Every node reachable from any of `roots`, roots included.
    #[must_use]
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = roots
            .into_iter()
            .filter_map(|id| self.index_map.get(&id).copied())
            .collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            queue.extend(self.graph.neighbors_directed(current, Direction::Outgoing));
        }
        seen.into_iter().map(|idx| self.graph[idx]).collect()
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        self.sorted_neighbors(idx, direction)
            .into_iter()
            .map(|i| self.graph[i])
            .collect()
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    fn cycle_error(&self) -> ValidationError {
        ValidationError::CyclicGraph {
            cycle: self.find_cycle().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, EdgeFailurePolicy};
    use crate::node::NodeDefinition;
    use crate::port::{DataType, PortSchema};
    use strata_core::TypeTag;

    fn make_definition(
        nodes: Vec<NodeDefinition>,
        connections: Vec<Connection>,
    ) -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::new("test");
        wf.nodes = nodes;
        wf.connections = connections;
        wf
    }

    fn node(id: NodeId) -> NodeDefinition {
        NodeDefinition::new(id, "n", TypeTag::new("passthrough").unwrap())
            .with_input(PortSchema::optional("in", DataType::Any))
            .with_input(PortSchema::optional("in2", DataType::Any))
            .with_output(PortSchema::new("out", DataType::Any))
    }

    fn edge(from: NodeId, to: NodeId) -> Connection {
        Connection::new(from, "out", to, "in")
    }

    fn ids<const N: usize>() -> [NodeId; N] {
        std::array::from_fn(|_| NodeId::v4())
    }

    // --- linear graph: A -> B -> C ---

    fn linear_definition(a: NodeId, b: NodeId, c: NodeId) -> WorkflowDefinition {
        make_definition(vec![node(a), node(b), node(c)], vec![edge(a, b), edge(b, c)])
    }

    // --- diamond graph: A -> B, A -> C, B -> D, C -> D ---

    fn diamond_definition(a: NodeId, b: NodeId, c: NodeId, d: NodeId) -> WorkflowDefinition {
        make_definition(
            vec![node(a), node(b), node(c), node(d)],
            vec![
                edge(a, b),
                edge(a, c),
                edge(b, d),
                Connection::new(c, "out", d, "in2"),
            ],
        )
    }

    #[test]
    fn from_definition_counts() {
        let [a, b, c, d] = ids();
        let graph = DependencyGraph::from_definition(&diamond_definition(a, b, c, d)).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn from_definition_rejects_unknown_node() {
        let a = NodeId::v4();
        let unknown = NodeId::v4();
        let def = make_definition(vec![node(a)], vec![edge(a, unknown)]);
        let err = DependencyGraph::from_definition(&def).unwrap_err();
        assert_eq!(err, ValidationError::UnknownNode(unknown));
    }

    #[test]
    fn from_definition_rejects_duplicate_id() {
        let a = NodeId::v4();
        let def = make_definition(vec![node(a), node(a)], vec![]);
        let err = DependencyGraph::from_definition(&def).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateNodeId(a));
    }

    #[test]
    fn find_cycle_names_the_loop() {
        let [a, b, c, d] = ids();
        let def = make_definition(
            vec![node(a), node(b), node(c), node(d)],
            vec![edge(a, b), edge(b, c), Connection::new(c, "out", b, "in2"), edge(c, d)],
        );
        let graph = DependencyGraph::from_definition(&def).unwrap();
        assert!(graph.has_cycle());
        assert_eq!(graph.find_cycle(), Some(vec![b, c]));
    }

    #[test]
    fn find_cycle_reports_self_loop() {
        let a = NodeId::v4();
        let def = make_definition(vec![node(a)], vec![edge(a, a)]);
        let graph = DependencyGraph::from_definition(&def).unwrap();
        assert_eq!(graph.find_cycle(), Some(vec![a]));
        assert!(matches!(
            graph.compute_levels(),
            Err(ValidationError::CyclicGraph { cycle }) if cycle == vec![a]
        ));
    }

    #[test]
    fn find_cycle_none_for_dag() {
        let [a, b, c] = ids();
        let graph = DependencyGraph::from_definition(&linear_definition(a, b, c)).unwrap();
        assert!(!graph.has_cycle());
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn topological_sort_linear() {
        let [a, b, c] = ids();
        let graph = DependencyGraph::from_definition(&linear_definition(a, b, c)).unwrap();
        assert_eq!(graph.topological_sort().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn compute_levels_diamond() {
        let [a, b, c, d] = ids();
        let graph = DependencyGraph::from_definition(&diamond_definition(a, b, c, d)).unwrap();
        let levels = graph.compute_levels().unwrap();
        assert_eq!(levels, vec![vec![a], vec![b, c], vec![d]]);
    }

    #[test]
    fn compute_levels_keep_declaration_order() {
        let [a, b, c] = ids();
        // Declared c, b, a with no edges: one stage, declaration order.
        let def = make_definition(vec![node(c), node(b), node(a)], vec![]);
        let graph = DependencyGraph::from_definition(&def).unwrap();
        assert_eq!(graph.compute_levels().unwrap(), vec![vec![c, b, a]]);
    }

    #[test]
    fn entry_and_exit_nodes() {
        let [a, b, c, d] = ids();
        let graph = DependencyGraph::from_definition(&diamond_definition(a, b, c, d)).unwrap();
        assert_eq!(graph.entry_nodes(), vec![a]);
        assert_eq!(graph.exit_nodes(), vec![d]);
    }

    #[test]
    fn predecessors_and_successors() {
        let [a, b, c, d] = ids();
        let graph = DependencyGraph::from_definition(&diamond_definition(a, b, c, d)).unwrap();
        assert!(graph.predecessors(a).is_empty());
        assert_eq!(graph.successors(a), vec![b, c]);
        assert_eq!(graph.predecessors(d), vec![b, c]);
        assert!(graph.successors(d).is_empty());
        assert!(graph.predecessors(NodeId::v4()).is_empty());
    }

    #[test]
    fn transitive_dependents_follow_filter() {
        let [a, b, c, d] = ids();
        let mut def = diamond_definition(a, b, c, d);
        def.connections[1].on_failure = EdgeFailurePolicy::Tolerate;
        let graph = DependencyGraph::from_definition(&def).unwrap();

        assert_eq!(graph.transitive_dependents(a, |_| true), vec![b, c, d]);
        let propagating =
            graph.transitive_dependents(a, |c| c.on_failure == EdgeFailurePolicy::Propagate);
        assert_eq!(propagating, vec![b, d]);
        assert!(graph.transitive_dependents(d, |_| true).is_empty());
    }

    #[test]
    fn reachable_from_roots() {
        let [a, b, c, d] = ids();
        let graph = DependencyGraph::from_definition(&diamond_definition(a, b, c, d)).unwrap();
        let reach = graph.reachable_from([b]);
        assert_eq!(reach, HashSet::from([b, d]));
    }
}
