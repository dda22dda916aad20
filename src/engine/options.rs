use serde::{Deserialize, Serialize};

use crate::worker_based::WorkerExecutorOptions;

/// Which executor an engine dispatches atoms to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    Local,
    WorkerBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Maximum number of atoms the local executor runs at once
    pub max_workers: Option<usize>,
    pub executor: ExecutorKind,
    pub worker_based: WorkerExecutorOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            executor: ExecutorKind::Local,
            worker_based: WorkerExecutorOptions::default(),
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON engine config; absent keys keep defaults.
    pub fn from_json(config: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(config)?)
    }

    pub fn with_max_workers(mut self, value: usize) -> Self {
        self.max_workers = Some(value);
        self
    }

    pub fn with_executor(mut self, value: ExecutorKind) -> Self {
        self.executor = value;
        self
    }

    pub fn with_worker_based(mut self, value: WorkerExecutorOptions) -> Self {
        self.executor = ExecutorKind::WorkerBased;
        self.worker_based = value;
        self
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
