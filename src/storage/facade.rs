use log::debug;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{AtomDetail, AtomType, FlowDetail, StorageBackend};
use crate::engine::compiler::{ArgSource, Compilation};
use crate::engine::states::{AtomState, FlowState, Intention};
use crate::error::{FlowError, Result};
use crate::task::{Arguments, Outcome, RetryHistory};
use crate::types::Failure;

/// Cached, write-through view of one flow run's persisted state.
///
/// Reads are served from the cache; every write goes to the backend before
/// returning. The runtime is the only writer while it holds the flow's
/// claim.
pub struct Storage {
    flow_id: String,
    owner: String,
    backend: Arc<dyn StorageBackend>,
    flow: RwLock<FlowDetail>,
    atoms: RwLock<HashMap<String, AtomDetail>>,
    compilation: RwLock<Option<Arc<Compilation>>>,
}

fn missing(name: &str) -> FlowError {
    FlowError::NotFound(format!("atom '{}'", name))
}

impl Storage {
    /// Loads the persisted state of `flow_id`, creating it when absent.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        flow_id: &str,
        flow_name: &str,
    ) -> Result<Self> {
        let flow = match backend.load_flow(flow_id).await? {
            Some(flow) => flow,
            None => {
                let flow = FlowDetail::new(flow_id, flow_name);
                backend.save_flow(&flow).await?;
                flow
            }
        };
        let atoms = backend
            .load_atoms(flow_id)
            .await?
            .into_iter()
            .map(|detail| (detail.name.clone(), detail))
            .collect::<HashMap<_, _>>();
        debug!(
            "Opened flow '{}' with {} persisted atoms",
            flow_id,
            atoms.len()
        );
        Ok(Self {
            flow_id: flow_id.to_string(),
            owner: Uuid::new_v4().to_string(),
            backend,
            flow: RwLock::new(flow),
            atoms: RwLock::new(atoms),
            compilation: RwLock::new(None),
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Lease token identifying this storage as the flow's single writer.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn claim(&self) -> Result<()> {
        self.backend.claim_flow(&self.flow_id, &self.owner).await
    }

    pub async fn release(&self) -> Result<()> {
        self.backend.release_flow(&self.flow_id, &self.owner).await
    }

    /// Ties the storage to a compiled flow, creating details for atoms seen
    /// for the first time.
    pub async fn bind(&self, compilation: Arc<Compilation>) -> Result<()> {
        let created: Vec<AtomDetail> = {
            let atoms = self.atoms.read();
            compilation
                .atoms()
                .filter(|atom| !atoms.contains_key(atom.name()))
                .map(|atom| {
                    let atom_type = if atom.is_retry() {
                        AtomType::Retry
                    } else {
                        AtomType::Task
                    };
                    AtomDetail::new(atom.name(), atom_type, atom.version())
                })
                .collect()
        };
        for detail in created {
            self.backend.save_atom(&self.flow_id, &detail).await?;
            self.atoms.write().insert(detail.name.clone(), detail);
        }
        *self.compilation.write() = Some(compilation);
        Ok(())
    }

    /// Reloads the persisted flow and atom details, replacing the cache.
    /// Called once the flow is claimed so the run starts from what the
    /// previous owner left behind.
    pub async fn refresh(&self) -> Result<()> {
        if let Some(flow) = self.backend.load_flow(&self.flow_id).await? {
            *self.flow.write() = flow;
        }
        let atoms = self
            .backend
            .load_atoms(&self.flow_id)
            .await?
            .into_iter()
            .map(|detail| (detail.name.clone(), detail))
            .collect::<HashMap<_, _>>();
        *self.atoms.write() = atoms;
        if let Some(compilation) = self.compilation() {
            self.bind(compilation).await?;
        }
        Ok(())
    }

    pub fn compilation(&self) -> Option<Arc<Compilation>> {
        self.compilation.read().clone()
    }

    /// Seeds values atoms can require without any provider.
    pub async fn inject(&self, values: Arguments) -> Result<()> {
        let mut detail = self.flow.read().clone();
        detail.store.extend(values);
        self.save_flow(detail).await
    }

    pub fn store(&self) -> Arguments {
        self.flow.read().store.clone()
    }

    pub fn get_flow_state(&self) -> FlowState {
        self.flow.read().state
    }

    pub async fn set_flow_state(&self, state: FlowState) -> Result<()> {
        let mut detail = self.flow.read().clone();
        detail.state = state;
        self.save_flow(detail).await?;
        debug!("Flow '{}' is now {}", self.flow_id, state);
        Ok(())
    }

    async fn save_flow(&self, detail: FlowDetail) -> Result<()> {
        self.backend.save_flow(&detail).await?;
        *self.flow.write() = detail;
        Ok(())
    }

    pub fn get_atom_detail(&self, name: &str) -> Result<AtomDetail> {
        self.atoms.read().get(name).cloned().ok_or_else(|| missing(name))
    }

    pub fn atom_details(&self) -> Vec<AtomDetail> {
        self.atoms.read().values().cloned().collect()
    }

    pub fn get_atom_state(&self, name: &str) -> Result<AtomState> {
        self.atoms
            .read()
            .get(name)
            .map(|d| d.state)
            .ok_or_else(|| missing(name))
    }

    pub fn get_atom_intention(&self, name: &str) -> Result<Intention> {
        self.atoms
            .read()
            .get(name)
            .map(|d| d.intention)
            .ok_or_else(|| missing(name))
    }

    /// The atom's last successful result.
    pub fn get_execute_result(&self, name: &str) -> Result<Value> {
        let atoms = self.atoms.read();
        let detail = atoms.get(name).ok_or_else(|| missing(name))?;
        match (&detail.failure, &detail.result) {
            (None, Some(result)) => Ok(result.clone()),
            _ => Err(FlowError::NotFound(format!("result of atom '{}'", name))),
        }
    }

    pub fn get_execute_failure(&self, name: &str) -> Option<Failure> {
        self.atoms.read().get(name).and_then(|d| d.failure.clone())
    }

    pub fn get_outcome(&self, name: &str) -> Result<Outcome> {
        self.atoms
            .read()
            .get(name)
            .map(AtomDetail::outcome)
            .ok_or_else(|| missing(name))
    }

    pub fn get_retry_history(&self, name: &str) -> Result<RetryHistory> {
        self.atoms
            .read()
            .get(name)
            .map(|d| d.history.clone())
            .ok_or_else(|| missing(name))
    }

    /// Execution failures of the current attempt, in dependency order.
    pub fn failures(&self) -> Vec<(String, Failure)> {
        self.collect_failures(|d| d.failure.clone())
    }

    pub fn revert_failures(&self) -> Vec<(String, Failure)> {
        self.collect_failures(|d| d.revert_failure.clone())
    }

    fn collect_failures<F>(&self, pick: F) -> Vec<(String, Failure)>
    where
        F: Fn(&AtomDetail) -> Option<Failure>,
    {
        let atoms = self.atoms.read();
        let order: Vec<String> = match self.compilation.read().as_ref() {
            Some(compilation) => compilation.topological_order().to_vec(),
            None => {
                let mut names: Vec<String> = atoms.keys().cloned().collect();
                names.sort();
                names
            }
        };
        order
            .into_iter()
            .filter_map(|name| {
                let failure = atoms.get(&name).and_then(&pick)?;
                Some((name, failure))
            })
            .collect()
    }

    async fn update_atom<F>(&self, name: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut AtomDetail),
    {
        let mut detail = self.get_atom_detail(name)?;
        update(&mut detail);
        // The cache only moves once the backend has the new detail.
        self.backend.save_atom(&self.flow_id, &detail).await?;
        self.atoms.write().insert(name.to_string(), detail);
        Ok(())
    }

    pub async fn set_atom_state(&self, name: &str, state: AtomState) -> Result<()> {
        debug!("Atom '{}' transitions to {}", name, state);
        self.update_atom(name, |d| d.state = state).await
    }

    pub async fn set_atom_intention(&self, name: &str, intention: Intention) -> Result<()> {
        self.update_atom(name, |d| d.intention = intention).await
    }

    /// Stores a successful result and moves the atom to SUCCESS.
    pub async fn save_result(&self, name: &str, result: Value) -> Result<()> {
        debug!("Atom '{}' transitions to {}", name, AtomState::Success);
        self.update_atom(name, |d| {
            d.result = Some(result);
            d.failure = None;
            d.state = AtomState::Success;
            d.progress = 1.0;
        })
        .await
    }

    /// Stores an execution failure and moves the atom to FAILURE.
    pub async fn save_failure(&self, name: &str, failure: Failure) -> Result<()> {
        debug!("Atom '{}' transitions to {}", name, AtomState::Failure);
        self.update_atom(name, |d| {
            d.result = None;
            d.failure = Some(failure);
            d.state = AtomState::Failure;
        })
        .await
    }

    /// Stores a failed revert and moves the atom to REVERT_FAILURE.
    pub async fn save_revert_failure(&self, name: &str, failure: Failure) -> Result<()> {
        debug!("Atom '{}' transitions to {}", name, AtomState::RevertFailure);
        self.update_atom(name, |d| {
            d.revert_failure = Some(failure);
            d.state = AtomState::RevertFailure;
        })
        .await
    }

    /// Returns an atom to PENDING/EXECUTE with no result.
    pub async fn reset_atom(&self, name: &str) -> Result<()> {
        self.update_atom(name, AtomDetail::reset).await
    }

    /// Forgets everything about an atom, retry history included.
    pub async fn clear_atom(&self, name: &str) -> Result<()> {
        self.update_atom(name, |d| {
            d.reset();
            d.history = RetryHistory::new();
        })
        .await
    }

    pub async fn set_progress(&self, name: &str, progress: f32, details: Option<Value>) -> Result<()> {
        self.update_atom(name, |d| {
            d.progress = progress;
            if details.is_some() {
                d.progress_details = details;
            }
        })
        .await
    }

    pub async fn record_retry_result(&self, retry: &str, result: Value) -> Result<()> {
        self.update_atom(retry, |d| d.history.record_result(result))
            .await
    }

    pub async fn record_retry_failure(&self, retry: &str, atom: &str, failure: Failure) -> Result<()> {
        self.update_atom(retry, |d| d.history.record_failure(atom, failure))
            .await
    }

    /// Resolves the arguments of `atom_name` from its bindings: injected
    /// defaults, seeded store values, and the results of providing atoms.
    /// Optional arguments with no value are left out.
    pub fn fetch_mapped_args(&self, atom_name: &str) -> Result<Arguments> {
        let compilation = self
            .compilation()
            .ok_or_else(|| FlowError::InvalidState("storage is not bound to a flow".into()))?;
        let atom = compilation.atom(atom_name).ok_or_else(|| missing(atom_name))?;

        let mut args = atom.inject().clone();
        let store = self.flow.read().store.clone();
        for binding in compilation.bindings(atom_name) {
            let value = match &binding.source {
                Some(ArgSource::Inject) => continue,
                Some(ArgSource::Store) => store.get(&binding.symbol).cloned(),
                Some(ArgSource::Atom(provider)) => {
                    let provided = self.get_execute_result(provider).ok().and_then(|result| {
                        compilation
                            .atom(provider)
                            .and_then(|p| p.provided_value(&result, &binding.symbol))
                    });
                    provided.or_else(|| store.get(&binding.symbol).cloned())
                }
                None => store.get(&binding.symbol).cloned(),
            };
            match value {
                Some(value) => {
                    args.insert(binding.arg.clone(), value);
                }
                None if atom.optional().contains(&binding.arg) => {}
                None => {
                    return Err(FlowError::NotFound(format!(
                        "value of symbol '{}' for argument '{}' of atom '{}'",
                        binding.symbol, binding.arg, atom_name
                    )))
                }
            }
        }
        Ok(args)
    }
}
