use std::collections::HashSet;

use super::compiler::Compilation;
use super::states::{Action, AtomState, Intention};
use crate::atom::Atom;
use crate::storage::Storage;

/// Answers scheduling questions about a compiled flow from its current
/// persisted state. Holds no state of its own; every answer is recomputed.
///
/// Lookups the storage cannot answer count as "not found" and simply make
/// an atom ineligible.
pub struct Analyzer<'a> {
    compilation: &'a Compilation,
    storage: &'a Storage,
}

impl<'a> Analyzer<'a> {
    pub fn new(compilation: &'a Compilation, storage: &'a Storage) -> Self {
        Self {
            compilation,
            storage,
        }
    }

    fn state(&self, name: &str) -> Option<AtomState> {
        self.storage.get_atom_state(name).ok()
    }

    fn intention(&self, name: &str) -> Option<Intention> {
        self.storage.get_atom_intention(name).ok()
    }

    /// Atoms that may be dispatched for execution right now.
    pub fn iter_next_atoms(&self) -> impl Iterator<Item = &'a Atom> + '_ {
        self.compilation
            .atoms()
            .filter(move |atom| self.is_ready_to_execute(atom.name()))
    }

    pub fn is_ready_to_execute(&self, name: &str) -> bool {
        self.intention(name) == Some(Intention::Execute)
            && self.state(name) == Some(AtomState::Pending)
            && self
                .compilation
                .execution_graph()
                .predecessors(name)
                .all(|pred| self.state(pred) == Some(AtomState::Success))
    }

    /// Atoms that may be dispatched for reversion right now, successors
    /// before predecessors.
    pub fn iter_atoms_to_revert(&self) -> impl Iterator<Item = &'a Atom> + '_ {
        self.compilation
            .atoms()
            .filter(move |atom| self.is_ready_to_revert(atom.name()))
    }

    /// A REVERT atom that ran is ready once no successor is in flight and
    /// every successor also being reverted is done (or never ran).
    pub fn is_ready_to_revert(&self, name: &str) -> bool {
        if self.intention(name) != Some(Intention::Revert) {
            return false;
        }
        if !matches!(
            self.state(name),
            Some(AtomState::Success) | Some(AtomState::Failure)
        ) {
            return false;
        }
        self.compilation
            .execution_graph()
            .successors(name)
            .all(|succ| match (self.intention(succ), self.state(succ)) {
                (_, Some(state)) if state.is_active() => false,
                (Some(Intention::Revert), Some(AtomState::Pending))
                | (Some(Intention::Revert), Some(AtomState::Reverted)) => true,
                (Some(Intention::Revert), _) => false,
                _ => true,
            })
    }

    /// Retry controllers whose subflow has finished reverting and can be
    /// run again.
    pub fn iter_retries_to_reset(&self) -> impl Iterator<Item = &'a Atom> + '_ {
        self.compilation
            .atoms()
            .filter(move |atom| atom.is_retry() && self.is_ready_to_reset(atom.name()))
    }

    pub fn is_ready_to_reset(&self, retry: &str) -> bool {
        self.intention(retry) == Some(Intention::Retry)
            && self.compilation.subflow_of(retry).iter().all(|name| {
                matches!(
                    self.state(name),
                    Some(AtomState::Pending) | Some(AtomState::Reverted)
                )
            })
    }

    /// Everything dispatchable now: reversions first, then executions.
    pub fn get_next_work(&self) -> Vec<(&'a Atom, Action)> {
        let mut work: Vec<(&'a Atom, Action)> = Vec::new();
        for atom in self.iter_atoms_to_revert() {
            work.push((atom, Action::Revert));
        }
        for atom in self.iter_next_atoms() {
            work.push((atom, Action::Execute));
        }
        work
    }

    /// The atoms a retry controller governs, in dependency order.
    pub fn iter_retry_subflow(&self, retry: &str) -> impl Iterator<Item = &'a Atom> + '_ {
        self.compilation
            .subflow_of(retry)
            .iter()
            .filter_map(move |name| self.compilation.atom(name))
    }

    /// Predecessors of failed atoms that completed (or are completing) and
    /// will need compensation, latest first.
    pub fn browse_atoms_to_revert(&self) -> Vec<&'a Atom> {
        let graph = self.compilation.execution_graph();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self
            .compilation
            .topological_order()
            .iter()
            .map(String::as_str)
            .filter(|name| self.state(name) == Some(AtomState::Failure))
            .collect();
        while let Some(name) = stack.pop() {
            for pred in graph.predecessors(name) {
                if seen.insert(pred) {
                    stack.push(pred);
                }
            }
        }
        self.compilation
            .topological_order()
            .iter()
            .rev()
            .filter(|name| seen.contains(name.as_str()))
            .filter(|name| {
                matches!(
                    self.state(name),
                    Some(AtomState::Success) | Some(AtomState::Running)
                )
            })
            .filter_map(|name| self.compilation.atom(name))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.compilation
            .topological_order()
            .iter()
            .all(|name| self.state(name) == Some(AtomState::Success))
    }

    /// True when every atom either never ran or has been reverted.
    pub fn is_reverted(&self) -> bool {
        let mut any_reverted = false;
        for name in self.compilation.topological_order() {
            match self.state(name) {
                Some(AtomState::Reverted) => any_reverted = true,
                Some(AtomState::Pending) => {}
                _ => return false,
            }
        }
        any_reverted
    }

    pub fn has_active(&self) -> bool {
        self.compilation
            .topological_order()
            .iter()
            .any(|name| self.state(name).map(|s| s.is_active()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests;
