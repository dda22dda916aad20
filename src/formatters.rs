use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::engine::compiler::Compilation;
use crate::engine::states::Intention;
use crate::storage::Storage;
use crate::types::tree::Node;
use crate::types::{DiGraph, Failure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKind {
    Intentions,
    States,
    Requires,
    Provides,
}

/// Memoized storage lookups, keyed by what was looked up and for which atom.
/// A failed lookup is remembered as `None`.
#[derive(Default)]
struct LookupCache {
    values: RefCell<HashMap<(CacheKind, String), Option<String>>>,
}

impl LookupCache {
    fn get<F>(&self, kind: CacheKind, atom: &str, fetch: F) -> Option<String>
    where
        F: FnOnce() -> Option<String>,
    {
        let key = (kind, atom.to_string());
        if let Some(value) = self.values.borrow().get(&key) {
            return value.clone();
        }
        let value = fetch();
        self.values.borrow_mut().insert(key, value.clone());
        value
    }
}

/// Tree of everything that ran before `atom`, rooted at it, with the number
/// of distinct predecessors.
fn predecessor_tree(graph: &DiGraph, atom: &str) -> (usize, Node<String>) {
    fn grow(graph: &DiGraph, node: &mut Node<String>, seen: &mut HashSet<String>) {
        let preds: Vec<String> = graph.predecessors(&node.item).map(str::to_string).collect();
        for pred in preds {
            seen.insert(pred.clone());
            let child = node.add(Node::new(pred));
            grow(graph, child, seen);
        }
    }

    let mut root = Node::new(atom.to_string());
    let mut seen = HashSet::new();
    grow(graph, &mut root, &mut seen);
    (seen.len(), root)
}

/// Renders a failure together with the state of the atoms that led to it.
pub struct FailureFormatter<'a> {
    compilation: &'a Compilation,
    storage: &'a Storage,
    hide_inputs_outputs_of: HashSet<String>,
}

impl<'a> FailureFormatter<'a> {
    pub fn new(compilation: &'a Compilation, storage: &'a Storage) -> Self {
        Self {
            compilation,
            storage,
            hide_inputs_outputs_of: HashSet::new(),
        }
    }

    /// Leaves out the arguments and results of these atoms.
    pub fn hide_inputs_outputs_of(mut self, atoms: &[&str]) -> Self {
        self.hide_inputs_outputs_of
            .extend(atoms.iter().map(|name| name.to_string()));
        self
    }

    fn format_node(&self, cache: &LookupCache, node: &Node<String>) -> String {
        let name = node.item.as_str();
        let mut attrs = Vec::new();
        if let Some(intention) = cache.get(CacheKind::Intentions, name, || {
            self.storage.get_atom_intention(name).ok().map(|i| i.to_string())
        }) {
            attrs.push(format!("intention={}", intention));
        }
        if let Some(state) = cache.get(CacheKind::States, name, || {
            self.storage.get_atom_state(name).ok().map(|s| s.to_string())
        }) {
            attrs.push(format!("state={}", state));
        }
        if !self.hide_inputs_outputs_of.contains(name) {
            if let Some(requires) = cache.get(CacheKind::Requires, name, || {
                self.storage
                    .fetch_mapped_args(name)
                    .ok()
                    .map(|args| Value::Object(args).to_string())
            }) {
                attrs.push(format!("requires={}", requires));
            }
            if let Some(provides) = cache.get(CacheKind::Provides, name, || {
                self.storage
                    .get_execute_result(name)
                    .ok()
                    .map(|result| result.to_string())
            }) {
                attrs.push(format!("provides={}", provides));
            }
        }
        if attrs.is_empty() {
            format!("Atom '{}'", name)
        } else {
            format!("Atom '{}' {{{}}}", name, attrs.join(", "))
        }
    }

    /// The failure with its traceback, followed by the predecessors of the
    /// atom it came from while that atom was being executed.
    pub fn format(&self, failure: &Failure, atom_name: &str) -> String {
        let mut buf = failure.pformat(true);
        let found = self
            .compilation
            .hierarchy()
            .find_first_match(|item| item.is_atom(atom_name))
            .is_some();
        if !found {
            return buf;
        }
        let graph = self.compilation.execution_graph();
        if graph.in_degree(atom_name) == 0
            || self.storage.get_atom_intention(atom_name).ok() != Some(Intention::Execute)
        {
            return buf;
        }

        let cache = LookupCache::default();
        let (count, tree) = predecessor_tree(graph, atom_name);
        buf.push_str(&format!(
            "\n{} predecessors (most recent atoms first):",
            count
        ));
        let stringify = |node: &Node<String>| self.format_node(&cache, node);
        for child in tree.children() {
            buf.push('\n');
            buf.push_str(&child.pformat(&stringify, "  "));
        }
        buf
    }
}
