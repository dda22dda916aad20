use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{Decision, Retry, RetryHistory};
use crate::task::BoxError;

/// Retries the subflow up to `max_retries` times, waiting `retry_delay`
/// before each re-attempt, then reverts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub exhausted: Decision,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_secs(0),
            exhausted: Decision::Revert,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, value: usize) -> Self {
        self.max_retries = value;
        self
    }

    pub fn with_retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = value;
        self
    }

    /// Decision once the retries are used up.
    pub fn on_exhausted(mut self, value: Decision) -> Self {
        self.exhausted = value;
        self
    }
}

#[async_trait]
impl Retry for RetryPolicy {
    async fn execute(&self, history: &RetryHistory) -> Result<Value, BoxError> {
        if !history.is_empty() && !self.retry_delay.is_zero() {
            tokio::time::sleep(self.retry_delay).await;
        }
        Ok(Value::from(history.len() as u64 + 1))
    }

    fn on_failure(&self, history: &RetryHistory) -> Decision {
        if history.len() <= self.max_retries {
            Decision::Retry
        } else {
            self.exhausted
        }
    }
}

/// Never retries; reverts the subflow and defers to the enclosing controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRevert;

#[async_trait]
impl Retry for AlwaysRevert {
    fn on_failure(&self, _history: &RetryHistory) -> Decision {
        Decision::Revert
    }
}

/// Never retries; reverts the whole flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRevertAll;

#[async_trait]
impl Retry for AlwaysRevertAll {
    fn on_failure(&self, _history: &RetryHistory) -> Decision {
        Decision::RevertAll
    }
}
