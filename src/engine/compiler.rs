use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::atom::{Atom, AtomKind};
use crate::error::{FlowError, Result};
use crate::flow::{Flow, FlowKind, Item};
use crate::types::tree::Node;
use crate::types::{DiGraph, EdgeKind};

/// A node of the hierarchy tree: a flow, or an atom leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum HierarchyItem {
    Flow {
        name: String,
        kind: FlowKind,
        retry: Option<String>,
    },
    Atom(String),
}

impl HierarchyItem {
    pub fn name(&self) -> &str {
        match self {
            HierarchyItem::Flow { name, .. } => name,
            HierarchyItem::Atom(name) => name,
        }
    }

    pub fn is_atom(&self, atom_name: &str) -> bool {
        matches!(self, HierarchyItem::Atom(name) if name == atom_name)
    }
}

/// Where an argument's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSource {
    /// The result of another atom.
    Atom(String),
    /// Values seeded into the engine before the run.
    Store,
    /// The atom's own injected default.
    Inject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub arg: String,
    pub symbol: String,
    /// `None` for an optional argument nothing provides.
    pub source: Option<ArgSource>,
}

/// The immutable result of compiling a flow.
#[derive(Debug, Clone)]
pub struct Compilation {
    execution_graph: DiGraph,
    hierarchy: Node<HierarchyItem>,
    atoms: HashMap<String, Atom>,
    order: Vec<String>,
    retries: HashMap<String, String>,
    subflows: HashMap<String, Vec<String>>,
    bindings: HashMap<String, Vec<Binding>>,
}

impl Compilation {
    pub fn execution_graph(&self) -> &DiGraph {
        &self.execution_graph
    }

    pub fn hierarchy(&self) -> &Node<HierarchyItem> {
        &self.hierarchy
    }

    pub fn atom(&self, name: &str) -> Option<&Atom> {
        self.atoms.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Atom names in dependency order.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Atoms in dependency order.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.order.iter().filter_map(move |name| self.atoms.get(name))
    }

    /// The retry controller governing `atom`, if any.
    pub fn retry_of(&self, atom: &str) -> Option<&str> {
        self.retries.get(atom).map(String::as_str)
    }

    /// Atoms governed by `retry`, in dependency order.
    pub fn subflow_of(&self, retry: &str) -> &[String] {
        self.subflows.get(retry).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bindings(&self, atom: &str) -> &[Binding] {
        self.bindings.get(atom).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Start and end atoms of a flattened item, plus every atom it contains.
#[derive(Default)]
struct Flattened {
    starts: Vec<String>,
    ends: Vec<String>,
    members: Vec<String>,
}

#[derive(Default)]
pub struct Compiler {
    store_symbols: HashSet<String>,
    graph: DiGraph,
    atoms: HashMap<String, Atom>,
    registration: Vec<String>,
    retries: HashMap<String, String>,
    subflows: HashMap<String, Vec<String>>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols that will be present in the engine store before the run.
    pub fn with_store_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.store_symbols
            .extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn compile(mut self, flow: &Flow) -> Result<Compilation> {
        debug!("Compiling flow '{}'", flow.name());

        let mut root = Node::new(HierarchyItem::Flow {
            name: String::from("__root__"),
            kind: FlowKind::Unordered,
            retry: None,
        });
        self.flatten_flow(flow, None, &mut root)?;
        let hierarchy = root
            .children()
            .first()
            .cloned()
            .ok_or_else(|| FlowError::Compilation("flow produced no hierarchy".into()))?;

        let bindings = self.link_symbols()?;

        let order = self.graph.topological_sort().map_err(|node| {
            FlowError::Compilation(format!("cycle detected involving atom '{}'", node))
        })?;

        let mut subflows = HashMap::new();
        for (retry, members) in self.subflows.drain() {
            let member_set: HashSet<&String> = members.iter().collect();
            let ordered: Vec<String> = order
                .iter()
                .filter(|name| member_set.contains(name))
                .cloned()
                .collect();
            subflows.insert(retry, ordered);
        }

        debug!(
            "Compiled flow '{}' into {} atoms and {} edges",
            flow.name(),
            order.len(),
            self.graph.edge_count()
        );

        Ok(Compilation {
            execution_graph: self.graph,
            hierarchy,
            atoms: self.atoms,
            order,
            retries: self.retries,
            subflows,
            bindings,
        })
    }

    fn register(&mut self, atom: &Atom, governing: Option<&str>) -> Result<()> {
        if let Some(existing) = self.atoms.get(atom.name()) {
            let same_object = match (existing.kind(), atom.kind()) {
                (AtomKind::Task(a), AtomKind::Task(b)) => Arc::ptr_eq(a, b),
                (AtomKind::Retry(a), AtomKind::Retry(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            let message = if same_object {
                format!("atom '{}' was added to the flow more than once", atom.name())
            } else {
                format!("two different atoms are named '{}'", atom.name())
            };
            return Err(FlowError::Compilation(message));
        }
        self.graph.add_node(atom.name());
        self.atoms.insert(atom.name().to_string(), atom.clone());
        self.registration.push(atom.name().to_string());
        if let Some(retry) = governing {
            self.retries
                .insert(atom.name().to_string(), retry.to_string());
        }
        Ok(())
    }

    fn connect(&mut self, from: &[String], to: &[String], kind: EdgeKind) {
        for a in from {
            for b in to {
                self.graph.add_edge(a, b, kind);
            }
        }
    }

    fn flatten_flow(
        &mut self,
        flow: &Flow,
        parent_retry: Option<&str>,
        parent: &mut Node<HierarchyItem>,
    ) -> Result<Flattened> {
        if !flow.links().is_empty() && flow.kind() != FlowKind::Graph {
            return Err(FlowError::Compilation(format!(
                "{} flow '{}' cannot declare links",
                flow.kind(),
                flow.name()
            )));
        }

        let retry_name = flow.retry().map(|r| r.name().to_string());
        let node = parent.add(Node::new(HierarchyItem::Flow {
            name: flow.name().to_string(),
            kind: flow.kind(),
            retry: retry_name.clone(),
        }));

        if let Some(retry) = flow.retry() {
            if !retry.is_retry() {
                return Err(FlowError::Compilation(format!(
                    "atom '{}' is not a retry controller",
                    retry.name()
                )));
            }
            self.register(retry, parent_retry)?;
            node.add(Node::new(HierarchyItem::Atom(retry.name().to_string())));
        }
        let governing = retry_name.as_deref().or(parent_retry);

        let mut parts: Vec<(String, Flattened)> = Vec::new();
        let mut seen_items = HashSet::new();
        for item in flow.items() {
            if !seen_items.insert(item.name().to_string()) {
                return Err(FlowError::Compilation(format!(
                    "flow '{}' contains more than one item named '{}'",
                    flow.name(),
                    item.name()
                )));
            }
            let part = match item {
                Item::Atom(atom) => {
                    if atom.is_retry() {
                        return Err(FlowError::Compilation(format!(
                            "retry '{}' must be attached with with_retry",
                            atom.name()
                        )));
                    }
                    self.register(atom, governing)?;
                    node.add(Node::new(HierarchyItem::Atom(atom.name().to_string())));
                    let name = vec![atom.name().to_string()];
                    Flattened {
                        starts: name.clone(),
                        ends: name.clone(),
                        members: name,
                    }
                }
                Item::Flow(sub) => self.flatten_flow(sub, governing, node)?,
            };
            parts.push((item.name().to_string(), part));
        }

        let mut flat = Flattened::default();
        for (_, part) in &parts {
            flat.members.extend(part.members.iter().cloned());
        }

        match flow.kind() {
            FlowKind::Linear => {
                let chain: Vec<&Flattened> = parts
                    .iter()
                    .map(|(_, p)| p)
                    .filter(|p| !p.starts.is_empty())
                    .collect();
                for pair in chain.windows(2) {
                    let (ends, starts) = (pair[0].ends.clone(), pair[1].starts.clone());
                    self.connect(&ends, &starts, EdgeKind::Ordering);
                }
                if let (Some(first), Some(last)) = (chain.first(), chain.last()) {
                    flat.starts = first.starts.clone();
                    flat.ends = last.ends.clone();
                }
            }
            FlowKind::Unordered => {
                for (_, part) in &parts {
                    flat.starts.extend(part.starts.iter().cloned());
                    flat.ends.extend(part.ends.iter().cloned());
                }
            }
            FlowKind::Graph => {
                let index: HashMap<&str, usize> = parts
                    .iter()
                    .enumerate()
                    .map(|(i, (name, _))| (name.as_str(), i))
                    .collect();
                let mut has_incoming = HashSet::new();
                let mut has_outgoing = HashSet::new();
                for (from, to) in flow.links() {
                    let lookup = |name: &str| {
                        index.get(name).copied().ok_or_else(|| {
                            FlowError::Compilation(format!(
                                "graph flow '{}' links unknown item '{}'",
                                flow.name(),
                                name
                            ))
                        })
                    };
                    let (a, b) = (lookup(from)?, lookup(to)?);
                    let (ends, starts) = (parts[a].1.ends.clone(), parts[b].1.starts.clone());
                    self.connect(&ends, &starts, EdgeKind::Ordering);
                    has_outgoing.insert(a);
                    has_incoming.insert(b);
                }
                for (i, (_, part)) in parts.iter().enumerate() {
                    if !has_incoming.contains(&i) {
                        flat.starts.extend(part.starts.iter().cloned());
                    }
                    if !has_outgoing.contains(&i) {
                        flat.ends.extend(part.ends.iter().cloned());
                    }
                }
            }
        }

        if let Some(retry) = retry_name {
            let retry_vec = vec![retry.clone()];
            let starts = std::mem::take(&mut flat.starts);
            self.connect(&retry_vec, &starts, EdgeKind::Retry);
            if flat.ends.is_empty() {
                flat.ends = retry_vec.clone();
            }
            self.subflows.insert(retry.clone(), flat.members.clone());
            flat.starts = retry_vec;
            flat.members.insert(0, retry);
        }

        Ok(flat)
    }

    /// Resolves every argument to a source, adding an edge from each
    /// providing atom that is not already ordered before its consumer.
    fn link_symbols(&mut self) -> Result<HashMap<String, Vec<Binding>>> {
        let mut providers: HashMap<String, Vec<String>> = HashMap::new();
        for name in &self.registration {
            for symbol in self.atoms[name].provides() {
                providers
                    .entry(symbol.clone())
                    .or_default()
                    .push(name.clone());
            }
        }

        let mut bindings = HashMap::new();
        let consumers = self.registration.clone();
        for consumer in &consumers {
            let atom = self.atoms[consumer].clone();
            let mut resolved = Vec::new();
            for (arg, symbol) in atom.rebind_map() {
                let optional = atom.optional().contains(&arg);
                let source = if atom.inject().contains_key(&arg) {
                    Some(ArgSource::Inject)
                } else {
                    let candidates: Vec<String> = providers
                        .get(&symbol)
                        .map(|names| names.iter().filter(|n| *n != consumer).cloned().collect())
                        .unwrap_or_default();
                    self.resolve_provider(consumer, &symbol, &candidates, optional)?
                };
                resolved.push(Binding { arg, symbol, source });
            }
            bindings.insert(consumer.clone(), resolved);
        }
        Ok(bindings)
    }

    fn resolve_provider(
        &mut self,
        consumer: &str,
        symbol: &str,
        candidates: &[String],
        optional: bool,
    ) -> Result<Option<ArgSource>> {
        let before: Vec<&String> = candidates
            .iter()
            .filter(|p| self.graph.has_path(p, consumer))
            .collect();
        if !before.is_empty() {
            // The closest provider is the one every other earlier provider precedes.
            let closest = before
                .iter()
                .find(|p| before.iter().all(|q| self.graph.has_path(q, p)))
                .ok_or_else(|| ambiguous(consumer, symbol, &before))?;
            return Ok(Some(ArgSource::Atom((*closest).clone())));
        }

        let unordered: Vec<&String> = candidates
            .iter()
            .filter(|p| !self.graph.has_path(consumer, p))
            .collect();
        match unordered.len() {
            0 => {}
            1 => {
                let provider = unordered[0].clone();
                debug!(
                    "Adding edge {} -> {} for symbol '{}'",
                    provider, consumer, symbol
                );
                self.graph.add_edge(&provider, consumer, EdgeKind::Symbol);
                return Ok(Some(ArgSource::Atom(provider)));
            }
            _ => return Err(ambiguous(consumer, symbol, &unordered)),
        }

        if self.store_symbols.contains(symbol) {
            return Ok(Some(ArgSource::Store));
        }
        if optional {
            return Ok(None);
        }
        if candidates.is_empty() {
            Err(FlowError::Compilation(format!(
                "atom '{}' requires symbol '{}' which nothing provides",
                consumer, symbol
            )))
        } else {
            Err(FlowError::Compilation(format!(
                "cycle detected: atom '{}' requires symbol '{}' which only its successors provide",
                consumer, symbol
            )))
        }
    }
}

fn ambiguous(consumer: &str, symbol: &str, providers: &[&String]) -> FlowError {
    let mut names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
    names.sort();
    FlowError::Compilation(format!(
        "symbol '{}' required by atom '{}' is provided by unordered atoms {:?}",
        symbol, consumer, names
    ))
}

/// Compiles `flow` with an empty engine store.
pub fn compile(flow: &Flow) -> Result<Compilation> {
    Compiler::new().compile(flow)
}
