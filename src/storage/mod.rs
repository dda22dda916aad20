use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::Version;
use crate::engine::states::{AtomState, FlowState, Intention};
use crate::error::Result;
use crate::task::{Arguments, Outcome, RetryHistory};
use crate::types::Failure;

pub mod facade;
pub mod implementations;

pub use facade::Storage;
pub use implementations::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomType {
    Task,
    Retry,
}

/// Everything persisted about one atom of a flow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomDetail {
    pub name: String,
    pub atom_type: AtomType,
    pub version: Version,
    pub state: AtomState,
    pub intention: Intention,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub failure: Option<Failure>,
    #[serde(default)]
    pub revert_failure: Option<Failure>,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub progress_details: Option<Value>,
    /// Only used by retry controllers.
    #[serde(default)]
    pub history: RetryHistory,
}

impl AtomDetail {
    pub fn new(name: impl Into<String>, atom_type: AtomType, version: Version) -> Self {
        Self {
            name: name.into(),
            atom_type,
            version,
            state: AtomState::Pending,
            intention: Intention::Execute,
            result: None,
            failure: None,
            revert_failure: None,
            progress: 0.0,
            progress_details: None,
            history: RetryHistory::new(),
        }
    }

    /// What the last execution produced.
    pub fn outcome(&self) -> Outcome {
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(self.result.clone().unwrap_or(Value::Null)),
        }
    }

    /// Back to a never-run atom, keeping its retry history.
    pub fn reset(&mut self) {
        self.state = AtomState::Pending;
        self.intention = Intention::Execute;
        self.result = None;
        self.failure = None;
        self.revert_failure = None;
        self.progress = 0.0;
        self.progress_details = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDetail {
    pub flow_id: String,
    pub name: String,
    pub state: FlowState,
    /// Values seeded into the run before it started.
    #[serde(default)]
    pub store: Arguments,
}

impl FlowDetail {
    pub fn new(flow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            name: name.into(),
            state: FlowState::Pending,
            store: Arguments::new(),
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn init(&self) -> Result<()>;

    /// Takes the exclusive right to drive `flow_id`. Claiming a flow the same
    /// owner already holds succeeds.
    async fn claim_flow(&self, flow_id: &str, owner: &str) -> Result<()>;

    async fn release_flow(&self, flow_id: &str, owner: &str) -> Result<()>;

    async fn load_flow(&self, flow_id: &str) -> Result<Option<FlowDetail>>;

    async fn save_flow(&self, detail: &FlowDetail) -> Result<()>;

    async fn load_atoms(&self, flow_id: &str) -> Result<Vec<AtomDetail>>;

    async fn save_atom(&self, flow_id: &str, detail: &AtomDetail) -> Result<()>;
}
