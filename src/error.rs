use thiserror::Error;

use crate::types::failure::{Failure, WrappedFailure};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Compilation error: {0}")]
    Compilation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Flow '{flow_id}' is already claimed by '{owner}'")]
    AlreadyClaimed { flow_id: String, owner: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No worker advertises task '{task}' (version {version})")]
    NoCapableWorker { task: String, version: String },

    #[error("Request {correlation_id} for task '{task}' timed out waiting for a worker")]
    RequestTimeout { task: String, correlation_id: String },

    #[error("Worker '{topic}' went silent while running task '{task}'")]
    LostWorker { task: String, topic: String },

    #[error("Flow reverted: {0}")]
    Execution(WrappedFailure),

    #[error("Flow failed: {} failure(s), {} revert failure(s)", failures.len(), revert_failures.len())]
    Failed {
        failures: Vec<Failure>,
        revert_failures: Vec<Failure>,
    },
}

impl FlowError {
    /// Stable type name used when this error becomes an atom failure.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Compilation(_) => "CompilationError",
            FlowError::NotFound(_) => "NotFound",
            FlowError::Storage(_) => "StorageFailure",
            FlowError::Database(_) => "StorageFailure",
            FlowError::Serialization(_) => "SerializationError",
            FlowError::Protocol(_) => "ProtocolError",
            FlowError::AlreadyClaimed { .. } => "AlreadyClaimed",
            FlowError::InvalidState(_) => "InvalidState",
            FlowError::NoCapableWorker { .. } => "NoCapableWorker",
            FlowError::RequestTimeout { .. } => "RequestTimeout",
            FlowError::LostWorker { .. } => "LostWorker",
            FlowError::Execution(_) => "WrappedFailure",
            FlowError::Failed { .. } => "WrappedFailure",
        }
    }

    /// Failures carried by a REVERTED or FAILED run, if any.
    pub fn failures(&self) -> Vec<&Failure> {
        match self {
            FlowError::Execution(wrapped) => wrapped.iter().collect(),
            FlowError::Failed {
                failures,
                revert_failures,
            } => failures.iter().chain(revert_failures.iter()).collect(),
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
