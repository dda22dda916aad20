use std::fmt;

use crate::atom::Atom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Items run one after another, in insertion order.
    Linear,
    /// Items have no order among themselves.
    Unordered,
    /// Items are ordered by explicit links only.
    Graph,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FlowKind::Linear => "linear",
            FlowKind::Unordered => "unordered",
            FlowKind::Graph => "graph",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Atom(Atom),
    Flow(Flow),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Atom(atom) => atom.name(),
            Item::Flow(flow) => flow.name(),
        }
    }
}

/// A named container of atoms and nested flows.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    kind: FlowKind,
    items: Vec<Item>,
    links: Vec<(String, String)>,
    retry: Option<Atom>,
}

impl Flow {
    fn new(name: impl Into<String>, kind: FlowKind) -> Self {
        Self {
            name: name.into(),
            kind,
            items: Vec::new(),
            links: Vec::new(),
            retry: None,
        }
    }

    pub fn linear(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Linear)
    }

    pub fn unordered(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Unordered)
    }

    pub fn graph(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Graph)
    }

    pub fn add(mut self, atom: Atom) -> Self {
        self.items.push(Item::Atom(atom));
        self
    }

    pub fn add_flow(mut self, flow: Flow) -> Self {
        self.items.push(Item::Flow(flow));
        self
    }

    /// Orders item `from` before item `to` (graph flows only).
    pub fn link(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.links.push((from.into(), to.into()));
        self
    }

    /// Attaches a retry controller governing every item of this flow.
    pub fn with_retry(mut self, retry: Atom) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }

    pub fn retry(&self) -> Option<&Atom> {
        self.retry.as_ref()
    }

    /// Every atom in this flow and its sub-flows, retry controllers included.
    pub fn iter_atoms(&self) -> Vec<&Atom> {
        let mut atoms: Vec<&Atom> = self.retry.iter().collect();
        for item in &self.items {
            match item {
                Item::Atom(atom) => atoms.push(atom),
                Item::Flow(flow) => atoms.extend(flow.iter_atoms()),
            }
        }
        atoms
    }
}
