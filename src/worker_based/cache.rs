use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use crate::atom::TaskKey;

struct WorkerEntry {
    tasks: HashSet<TaskKey>,
    last_seen: Instant,
}

/// What each known worker topic can run, as last advertised.
pub struct WorkersCache {
    staleness: Duration,
    workers: Mutex<BTreeMap<String, WorkerEntry>>,
}

impl WorkersCache {
    pub fn new(staleness: Duration) -> Self {
        Self {
            staleness,
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn update(&self, topic: &str, tasks: impl IntoIterator<Item = TaskKey>) {
        let tasks: HashSet<TaskKey> = tasks.into_iter().collect();
        let mut workers = self.workers.lock();
        if !workers.contains_key(topic) {
            info!("Worker '{}' advertised {} task(s)", topic, tasks.len());
        }
        workers.insert(
            topic.to_string(),
            WorkerEntry {
                tasks,
                last_seen: Instant::now(),
            },
        );
    }

    /// Fresh topics able to run `key`, in topic order.
    pub fn topics_for(&self, key: &TaskKey) -> Vec<String> {
        let now = Instant::now();
        self.workers
            .lock()
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) <= self.staleness)
            .filter(|(_, entry)| entry.tasks.contains(key))
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.workers.lock().contains_key(topic)
    }

    /// Forgets workers that have not advertised within the staleness window.
    pub fn prune(&self) -> Vec<String> {
        let now = Instant::now();
        let mut workers = self.workers.lock();
        let stale: Vec<String> = workers
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > self.staleness)
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in &stale {
            debug!("Forgetting stale worker '{}'", topic);
            workers.remove(topic);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests;
