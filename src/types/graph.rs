use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph as PetGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Why an edge exists between two atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declared by the flow (linear order or a graph link).
    Ordering,
    /// A retry controller runs before the atoms it governs.
    Retry,
    /// The target requires a symbol the source provides.
    Symbol,
}

/// Directed graph of atom names backed by petgraph.
#[derive(Debug, Clone, Default)]
pub struct DiGraph {
    graph: PetGraph<String, EdgeKind>,
    indices: HashMap<String, NodeIndex>,
}

impl DiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning its index. Adding an existing name is a no-op.
    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.indices.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), idx);
        idx
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Adds `from -> to`; returns false if the edge was already present.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> bool {
        let a = self.add_node(from);
        let b = self.add_node(to);
        if self.graph.find_edge(a, b).is_some() {
            return false;
        }
        self.graph.add_edge(a, b, kind);
        true
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edge_kind(from, to).is_some()
    }

    pub fn edge_kind(&self, from: &str, to: &str) -> Option<EdgeKind> {
        let a = *self.indices.get(from)?;
        let b = *self.indices.get(to)?;
        self.graph
            .find_edge(a, b)
            .and_then(|e| self.graph.edge_weight(e))
            .copied()
    }

    pub fn predecessors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.neighbors(name, Direction::Incoming)
    }

    pub fn successors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors<'a>(&'a self, name: &str, dir: Direction) -> impl Iterator<Item = &'a str> + 'a {
        let idx = self.indices.get(name).copied();
        idx.into_iter()
            .flat_map(move |i| self.graph.neighbors_directed(i, dir))
            .map(move |n| self.graph[n].as_str())
    }

    pub fn in_degree(&self, name: &str) -> usize {
        self.predecessors(name).count()
    }

    /// True when `to` is reachable from `from` (a node reaches itself).
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(a), Some(b)) => has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(move |i| self.graph[i].as_str())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges as `(from, to, kind)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, EdgeKind)> {
        self.graph.edge_indices().filter_map(move |e| {
            let (a, b) = self.graph.edge_endpoints(e)?;
            let kind = *self.graph.edge_weight(e)?;
            Some((self.graph[a].as_str(), self.graph[b].as_str(), kind))
        })
    }

    /// Returns the nodes in dependency order, or the name of a node that
    /// sits on a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>, String> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| self.graph[i].clone()).collect())
            .map_err(|cycle| self.graph[cycle.node_id()].clone())
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_sort().is_ok()
    }
}
