use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use tokio::sync::mpsc;

use crate::types::Failure;

pub mod example_task;
pub mod retry;

pub use retry::{AlwaysRevert, AlwaysRevertAll, Decision, Retry, RetryHistory, RetryPolicy};

/// Error type returned by atom code.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Named argument values handed to an atom.
pub type Arguments = serde_json::Map<String, Value>;

/// What an atom's execution produced: its result or its failure.
pub type Outcome = Result<Value, Failure>;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub atom: String,
    pub progress: f32,
    pub details: Option<Value>,
}

/// Handle given to running atom code for reporting how far along it is.
#[derive(Clone, Debug)]
pub struct Progress {
    atom: String,
    sink: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Progress {
    pub fn new(atom: impl Into<String>, sink: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            atom: atom.into(),
            sink: Some(sink),
        }
    }

    /// A handle whose updates go nowhere.
    pub fn detached(atom: impl Into<String>) -> Self {
        Self {
            atom: atom.into(),
            sink: None,
        }
    }

    pub fn atom(&self) -> &str {
        &self.atom
    }

    /// Reports progress as a fraction in `[0.0, 1.0]`; out of range values
    /// are clamped.
    pub fn update(&self, progress: f32, details: Option<Value>) {
        if let Some(sink) = &self.sink {
            // The receiver is gone once the run is over; late updates are dropped.
            let _ = sink.send(ProgressEvent {
                atom: self.atom.clone(),
                progress: progress.clamp(0.0, 1.0),
                details,
            });
        }
    }
}

/// A unit of work that runs once per attempt and can be compensated.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, args: &Arguments, progress: &Progress) -> Result<Value, BoxError>;

    /// Undoes a previous `execute`. `outcome` is what that execution
    /// returned, or the failure it raised.
    async fn revert(
        &self,
        _args: &Arguments,
        _outcome: &Outcome,
        _progress: &Progress,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
