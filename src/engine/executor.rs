use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use super::states::Action;
use crate::atom::{Atom, AtomKind};
use crate::error::Result;
use crate::task::{Arguments, Outcome, Progress, Task};
use crate::types::Failure;

/// What an executor reports back once an atom's code has finished.
#[derive(Debug, Clone)]
pub struct Completion {
    pub atom: String,
    pub action: Action,
    pub outcome: Outcome,
}

impl Completion {
    pub fn new(atom: impl Into<String>, action: Action, outcome: Outcome) -> Self {
        Self {
            atom: atom.into(),
            action,
            outcome,
        }
    }

    /// A future that is already resolved, for work that failed before it
    /// could be submitted.
    pub fn ready(self) -> AtomFuture {
        futures::future::ready(self).boxed()
    }
}

/// Handle on a submitted atom; resolves exactly once and never fails.
pub type AtomFuture = BoxFuture<'static, Completion>;

/// Runs task atoms somewhere: in this process or on remote workers.
///
/// Errors raised by atom code never escape an executor; they come back as
/// the `Err` side of the completion's outcome.
#[async_trait]
pub trait AtomExecutor: Send + Sync {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_task(&self, atom: &Atom, args: Arguments, progress: Progress) -> AtomFuture;

    async fn revert_task(
        &self,
        atom: &Atom,
        args: Arguments,
        outcome: Outcome,
        progress: Progress,
    ) -> AtomFuture;
}

pub(crate) fn join_failure(err: JoinError) -> Failure {
    if err.is_panic() {
        Failure::from_panic(err.into_panic())
    } else {
        Failure::new("Cancelled", err.to_string())
    }
}

fn task_of(atom: &Atom) -> std::result::Result<Arc<dyn Task>, Failure> {
    match atom.kind() {
        AtomKind::Task(task) => Ok(task.clone()),
        AtomKind::Retry(_) => Err(Failure::new(
            "InvalidState",
            format!("retry '{}' cannot be run by a task executor", atom.name()),
        )),
    }
}

/// Runs atoms on the tokio runtime, at most `max_workers` at a time.
pub struct LocalExecutor {
    permits: Arc<Semaphore>,
}

impl LocalExecutor {
    pub fn new(max_workers: Option<usize>) -> Self {
        let workers = max_workers.unwrap_or_else(default_workers).max(1);
        debug!("Local executor running up to {} atoms at once", workers);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    fn spawn<F>(&self, atom: &str, action: Action, work: F) -> AtomFuture
    where
        F: std::future::Future<Output = Outcome> + Send + 'static,
    {
        let permits = self.permits.clone();
        let name = atom.to_string();
        let handle = tokio::spawn(async move {
            // The semaphore is never closed while the executor is alive.
            let _permit = permits.acquire_owned().await;
            work.await
        });
        async move {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Atom '{}' did not finish its {}: {}", name, action, e);
                    Err(join_failure(e))
                }
            };
            Completion::new(name, action, outcome)
        }
        .boxed()
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[async_trait]
impl AtomExecutor for LocalExecutor {
    async fn execute_task(&self, atom: &Atom, args: Arguments, progress: Progress) -> AtomFuture {
        let task = match task_of(atom) {
            Ok(task) => task,
            Err(failure) => return Completion::new(atom.name(), Action::Execute, Err(failure)).ready(),
        };
        self.spawn(atom.name(), Action::Execute, async move {
            task.execute(&args, &progress)
                .await
                .map_err(|e| Failure::from_error(e.as_ref()))
        })
    }

    async fn revert_task(
        &self,
        atom: &Atom,
        args: Arguments,
        outcome: Outcome,
        progress: Progress,
    ) -> AtomFuture {
        let task = match task_of(atom) {
            Ok(task) => task,
            Err(failure) => return Completion::new(atom.name(), Action::Revert, Err(failure)).ready(),
        };
        self.spawn(atom.name(), Action::Revert, async move {
            task.revert(&args, &outcome, &progress)
                .await
                .map(|_| serde_json::Value::Null)
                .map_err(|e| Failure::from_error(e.as_ref()))
        })
    }
}

#[cfg(test)]
mod tests;
