use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::BoxError;
use crate::types::Failure;

mod policy;

pub use policy::{AlwaysRevert, AlwaysRevertAll, RetryPolicy};

/// What a retry controller wants done after a failure in its subflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Revert the subflow, then run it again from the retry controller.
    Retry,
    /// Revert the subflow and the controller, then let the enclosing
    /// controller decide.
    Revert,
    /// Revert the whole flow.
    RevertAll,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Decision::Retry => "RETRY",
            Decision::Revert => "REVERT",
            Decision::RevertAll => "REVERT_ALL",
        };
        write!(f, "{}", text)
    }
}

/// One execution of a retry controller and the failures seen after it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub result: Value,
    #[serde(default)]
    pub failures: BTreeMap<String, Failure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryHistory {
    attempts: Vec<RetryAttempt>,
}

impl RetryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the controller has executed.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&RetryAttempt> {
        self.attempts.last()
    }

    pub fn record_result(&mut self, result: Value) {
        self.attempts.push(RetryAttempt {
            result,
            failures: BTreeMap::new(),
        });
    }

    /// Attaches a failure to the current attempt.
    pub fn record_failure(&mut self, atom: &str, failure: Failure) {
        if self.attempts.is_empty() {
            self.attempts.push(RetryAttempt::default());
        }
        if let Some(last) = self.attempts.last_mut() {
            last.failures.insert(atom.to_string(), failure);
        }
    }

    /// Failures attached to the current attempt.
    pub fn last_failures(&self) -> impl Iterator<Item = (&String, &Failure)> {
        self.attempts.last().into_iter().flat_map(|a| a.failures.iter())
    }
}

/// An atom that governs the subflow it is attached to.
#[async_trait]
pub trait Retry: Send + Sync {
    /// Runs before every attempt of the subflow; the result is recorded in
    /// the history.
    async fn execute(&self, history: &RetryHistory) -> Result<Value, BoxError> {
        Ok(Value::from(history.len() as u64 + 1))
    }

    async fn revert(&self, _history: &RetryHistory) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called with the history (the newest failure already recorded) when an
    /// atom of the subflow fails.
    fn on_failure(&self, history: &RetryHistory) -> Decision;
}
