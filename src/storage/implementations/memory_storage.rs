use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::states::AtomState;
use crate::error::{FlowError, Result};
use crate::storage::{AtomDetail, FlowDetail, StorageBackend};

/// In-memory implementation of StorageBackend for testing
#[derive(Clone, Default)]
pub struct MemoryStorage {
    flows: Arc<Mutex<HashMap<String, FlowDetail>>>,
    atoms: Arc<Mutex<HashMap<(String, String), AtomDetail>>>,
    claims: Arc<Mutex<HashMap<String, String>>>,
    save_calls: Arc<Mutex<Vec<(String, AtomState)>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the persisted detail of an atom
    pub fn get_atom(&self, flow_id: &str, name: &str) -> Option<AtomDetail> {
        self.atoms
            .lock()
            .get(&(flow_id.to_string(), name.to_string()))
            .cloned()
    }

    /// Every atom save made so far, as `(atom, state)` in call order
    pub fn get_save_calls(&self) -> Vec<(String, AtomState)> {
        self.save_calls.lock().clone()
    }

    /// Atoms in the order they were first saved with `state`
    pub fn atoms_reaching(&self, state: AtomState) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, saved) in self.save_calls.lock().iter() {
            if *saved == state && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn owner_of(&self, flow_id: &str) -> Option<String> {
        self.claims.lock().get(flow_id).cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn init(&self) -> Result<()> {
        // Nothing to initialize for in-memory storage
        Ok(())
    }

    async fn claim_flow(&self, flow_id: &str, owner: &str) -> Result<()> {
        let mut claims = self.claims.lock();
        match claims.get(flow_id) {
            Some(current) if current != owner => Err(FlowError::AlreadyClaimed {
                flow_id: flow_id.to_string(),
                owner: current.clone(),
            }),
            _ => {
                claims.insert(flow_id.to_string(), owner.to_string());
                Ok(())
            }
        }
    }

    async fn release_flow(&self, flow_id: &str, owner: &str) -> Result<()> {
        let mut claims = self.claims.lock();
        if claims.get(flow_id).map(String::as_str) == Some(owner) {
            claims.remove(flow_id);
        }
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Option<FlowDetail>> {
        Ok(self.flows.lock().get(flow_id).cloned())
    }

    async fn save_flow(&self, detail: &FlowDetail) -> Result<()> {
        self.flows
            .lock()
            .insert(detail.flow_id.clone(), detail.clone());
        Ok(())
    }

    async fn load_atoms(&self, flow_id: &str) -> Result<Vec<AtomDetail>> {
        Ok(self
            .atoms
            .lock()
            .iter()
            .filter(|((fid, _), _)| fid == flow_id)
            .map(|(_, detail)| detail.clone())
            .collect())
    }

    async fn save_atom(&self, flow_id: &str, detail: &AtomDetail) -> Result<()> {
        // Record the save call
        self.save_calls
            .lock()
            .push((detail.name.clone(), detail.state));

        self.atoms.lock().insert(
            (flow_id.to_string(), detail.name.clone()),
            detail.clone(),
        );
        Ok(())
    }
}
