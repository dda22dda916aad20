use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::atom::{TaskKey, Version};
use crate::task::{Arguments, Outcome, Progress, Task};
use crate::types::Failure;

/// A task a worker can run, under the key engines address it by.
#[derive(Clone)]
pub struct Endpoint {
    key: TaskKey,
    task: Arc<dyn Task>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, version: Version, task: Arc<dyn Task>) -> Self {
        Self {
            key: TaskKey::new(name, version),
            task,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub async fn execute(&self, args: &Arguments, progress: &Progress) -> Outcome {
        self.task
            .execute(args, progress)
            .await
            .map_err(|e| Failure::from_error(e.as_ref()))
    }

    pub async fn revert(&self, args: &Arguments, outcome: &Outcome, progress: &Progress) -> Outcome {
        self.task
            .revert(args, outcome, progress)
            .await
            .map(|_| Value::Null)
            .map_err(|e| Failure::from_error(e.as_ref()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("key", &self.key).finish()
    }
}

/// The explicit table of what a worker serves, keyed by name and version.
#[derive(Clone, Debug, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<TaskKey, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` as `name` version 1.0.
    pub fn with_task<T: Task + 'static>(self, name: impl Into<String>, task: T) -> Self {
        self.with_endpoint(Endpoint::new(name, Version::default(), Arc::new(task)))
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.insert(endpoint.key().clone(), endpoint);
        self
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Endpoint> {
        self.endpoints.get(key)
    }

    pub fn keys(&self) -> Vec<TaskKey> {
        self.endpoints.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
