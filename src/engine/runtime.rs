use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::analyzer::Analyzer;
use super::compiler::Compilation;
use super::executor::{join_failure, AtomExecutor, AtomFuture, Completion};
use super::states::{Action, AtomState, FlowState, Intention};
use crate::atom::{Atom, AtomKind};
use crate::error::{FlowError, Result};
use crate::formatters::FailureFormatter;
use crate::storage::Storage;
use crate::task::{Decision, Progress, ProgressEvent, Retry, RetryHistory};
use crate::types::{Failure, WrappedFailure};

/// Cloneable request to pause a running flow.
///
/// Suspending stops new atoms from being dispatched; atoms already running
/// finish and their results are kept.
#[derive(Debug, Clone, Default)]
pub struct SuspendHandle {
    requested: Arc<AtomicBool>,
}

impl SuspendHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Runs a retry controller on the tokio runtime.
fn run_retry(name: &str, action: Action, retry: Arc<dyn Retry>, history: RetryHistory) -> AtomFuture {
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        match action {
            Action::Execute => retry
                .execute(&history)
                .await
                .map_err(|e| Failure::from_error(e.as_ref())),
            Action::Revert => retry
                .revert(&history)
                .await
                .map(|_| Value::Null)
                .map_err(|e| Failure::from_error(e.as_ref())),
        }
    });
    async move {
        let outcome = handle.await.unwrap_or_else(|e| Err(join_failure(e)));
        Completion::new(name, action, outcome)
    }
    .boxed()
}

/// The control loop driving one run of a compiled flow.
pub struct Runtime {
    compilation: Arc<Compilation>,
    storage: Arc<Storage>,
    executor: Arc<dyn AtomExecutor>,
    suspend: SuspendHandle,
}

impl Runtime {
    pub fn new(
        compilation: Arc<Compilation>,
        storage: Arc<Storage>,
        executor: Arc<dyn AtomExecutor>,
        suspend: SuspendHandle,
    ) -> Self {
        Self {
            compilation,
            storage,
            executor,
            suspend,
        }
    }

    fn analyzer(&self) -> Analyzer<'_> {
        Analyzer::new(&self.compilation, &self.storage)
    }

    /// Runs the flow until it succeeds, reverts, fails or is suspended.
    ///
    /// Returns the final flow state on SUCCESS and SUSPENDED. A reverted
    /// run is `FlowError::Execution`; a run whose revert failed is
    /// `FlowError::Failed`.
    pub async fn run(&self) -> Result<FlowState> {
        if let Some(state) = self.prepare().await? {
            return Ok(state);
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut pending: FuturesUnordered<AtomFuture> = FuturesUnordered::new();
        let mut halted = false;
        let mut suspending = false;

        loop {
            if !halted && !suspending && self.suspend.is_suspended() {
                self.begin_suspend().await?;
                suspending = true;
            }
            if !halted && !suspending {
                self.reset_retries().await?;
                for (atom, action) in self.analyzer().get_next_work() {
                    pending.push(self.dispatch(atom, action, &progress_tx).await?);
                }
            }
            if pending.is_empty() {
                break;
            }

            tokio::select! {
                Some(completion) = pending.next() => {
                    if self.complete(completion).await? {
                        halted = true;
                    }
                }
                Some(event) = progress_rx.recv() => self.record_progress(event).await?,
            }
        }

        while let Ok(event) = progress_rx.try_recv() {
            self.record_progress(event).await?;
        }
        self.finish(halted, suspending).await
    }

    /// Brings persisted state left by an earlier run back to something the
    /// loop can continue from.
    async fn prepare(&self) -> Result<Option<FlowState>> {
        let flow_id = self.storage.flow_id();
        match self.storage.get_flow_state() {
            FlowState::Success => {
                info!("Flow '{}' already succeeded, nothing to do", flow_id);
                return Ok(Some(FlowState::Success));
            }
            FlowState::Failure => {
                return Err(FlowError::InvalidState(format!(
                    "flow '{}' failed while reverting and cannot be resumed",
                    flow_id
                )));
            }
            FlowState::Reverted => {
                info!("Flow '{}' was reverted, starting a fresh attempt", flow_id);
                for name in self.compilation.topological_order() {
                    self.storage.clear_atom(name).await?;
                }
            }
            _ => {}
        }

        for name in self.compilation.topological_order() {
            match self.storage.get_atom_state(name)? {
                AtomState::Running => {
                    debug!("Atom '{}' was interrupted while running", name);
                    self.storage.set_atom_state(name, AtomState::Pending).await?;
                }
                AtomState::Reverting => {
                    debug!("Atom '{}' was interrupted while reverting", name);
                    self.storage.set_atom_state(name, AtomState::Success).await?;
                    self.storage.set_atom_intention(name, Intention::Revert).await?;
                }
                _ => {}
            }
            if self.storage.get_atom_intention(name)? == Intention::Ignore {
                self.storage.set_atom_intention(name, Intention::Execute).await?;
            }
        }
        self.storage.set_flow_state(FlowState::Running).await?;
        Ok(None)
    }

    async fn begin_suspend(&self) -> Result<()> {
        info!("Suspending flow '{}'", self.storage.flow_id());
        for name in self.compilation.topological_order() {
            if self.storage.get_atom_state(name)? == AtomState::Pending
                && self.storage.get_atom_intention(name)? == Intention::Execute
            {
                self.storage.set_atom_intention(name, Intention::Ignore).await?;
            }
        }
        self.storage.set_flow_state(FlowState::Suspending).await
    }

    /// Puts retry controllers whose subflow finished reverting, and that
    /// subflow, back to PENDING so they run again.
    async fn reset_retries(&self) -> Result<()> {
        let ready: Vec<String> = self
            .analyzer()
            .iter_retries_to_reset()
            .map(|atom| atom.name().to_string())
            .collect();
        for retry in ready {
            info!("Retrying the subflow of '{}'", retry);
            for name in self.compilation.subflow_of(&retry) {
                self.storage.reset_atom(name).await?;
            }
            self.storage.reset_atom(&retry).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        atom: &Atom,
        action: Action,
        progress_tx: &mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<AtomFuture> {
        let name = atom.name();
        let progress = Progress::new(name, progress_tx.clone());
        match action {
            Action::Execute => {
                self.storage.set_atom_state(name, AtomState::Running).await?;
                match atom.kind() {
                    AtomKind::Retry(retry) => {
                        let history = self.storage.get_retry_history(name)?;
                        Ok(run_retry(name, action, retry.clone(), history))
                    }
                    AtomKind::Task(_) => match self.storage.fetch_mapped_args(name) {
                        Ok(args) => Ok(self.executor.execute_task(atom, args, progress).await),
                        Err(e) => {
                            warn!("Unable to resolve arguments of '{}': {}", name, e);
                            Ok(Completion::new(name, action, Err(Failure::from_flow_error(&e))).ready())
                        }
                    },
                }
            }
            Action::Revert => {
                let outcome = self.storage.get_outcome(name)?;
                self.storage.set_atom_state(name, AtomState::Reverting).await?;
                match atom.kind() {
                    AtomKind::Retry(retry) => {
                        let history = self.storage.get_retry_history(name)?;
                        Ok(run_retry(name, action, retry.clone(), history))
                    }
                    AtomKind::Task(_) => {
                        let args = self
                            .storage
                            .fetch_mapped_args(name)
                            .unwrap_or_else(|_| atom.inject().clone());
                        Ok(self.executor.revert_task(atom, args, outcome, progress).await)
                    }
                }
            }
        }
    }

    async fn record_progress(&self, event: ProgressEvent) -> Result<()> {
        // Late updates must not overwrite a finished atom.
        match self.storage.get_atom_state(&event.atom) {
            Ok(state) if state.is_active() => {
                self.storage
                    .set_progress(&event.atom, event.progress, event.details)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Persists a completion. Returns true when the run must stop
    /// admitting work.
    async fn complete(&self, completion: Completion) -> Result<bool> {
        let Completion {
            atom: name,
            action,
            outcome,
        } = completion;
        let is_retry = self
            .compilation
            .atom(&name)
            .map(Atom::is_retry)
            .unwrap_or(false);

        match (action, outcome) {
            (Action::Execute, Ok(result)) => {
                if is_retry {
                    self.storage.record_retry_result(&name, result.clone()).await?;
                }
                self.storage.save_result(&name, result).await?;
            }
            (Action::Execute, Err(failure)) => {
                let details = FailureFormatter::new(&self.compilation, &self.storage)
                    .format(&failure, &name);
                warn!("Atom '{}' failed\n{}", name, details);
                self.storage.save_failure(&name, failure.clone()).await?;
                self.handle_failure(&name, failure).await?;
            }
            (Action::Revert, Ok(_)) => {
                self.storage.set_atom_state(&name, AtomState::Reverted).await?;
            }
            (Action::Revert, Err(failure)) => {
                error!("Reverting atom '{}' failed: {}", name, failure);
                self.storage.save_revert_failure(&name, failure).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hands a failure to the retry controllers governing `name`, innermost
    /// first, and records their decision as intentions.
    async fn handle_failure(&self, name: &str, failure: Failure) -> Result<()> {
        if self.storage.get_atom_intention(name)? == Intention::Revert {
            debug!("Atom '{}' was already being reverted", name);
            return Ok(());
        }

        let mut governing = self.compilation.retry_of(name).map(str::to_string);
        while let Some(retry_name) = governing {
            let retry = match self.compilation.atom(&retry_name).map(Atom::kind) {
                Some(AtomKind::Retry(retry)) => retry.clone(),
                _ => break,
            };
            self.storage
                .record_retry_failure(&retry_name, name, failure.clone())
                .await?;
            let history = self.storage.get_retry_history(&retry_name)?;
            let decision = retry.on_failure(&history);
            info!(
                "Retry '{}' decided {} after '{}' failed (attempt {})",
                retry_name,
                decision,
                name,
                history.len()
            );
            match decision {
                Decision::Retry => {
                    self.storage
                        .set_atom_intention(&retry_name, Intention::Retry)
                        .await?;
                    return self.set_subflow_intention(&retry_name, Intention::Revert).await;
                }
                Decision::Revert => {
                    self.set_subflow_intention(&retry_name, Intention::Revert).await?;
                    self.storage
                        .set_atom_intention(&retry_name, Intention::Revert)
                        .await?;
                    governing = self.compilation.retry_of(&retry_name).map(str::to_string);
                }
                Decision::RevertAll => break,
            }
        }
        self.revert_all().await
    }

    async fn set_subflow_intention(&self, retry: &str, intention: Intention) -> Result<()> {
        for name in self.compilation.subflow_of(retry) {
            self.storage.set_atom_intention(name, intention).await?;
        }
        Ok(())
    }

    async fn revert_all(&self) -> Result<()> {
        info!("Reverting flow '{}'", self.storage.flow_id());
        for name in self.compilation.topological_order() {
            self.storage.set_atom_intention(name, Intention::Revert).await?;
        }
        Ok(())
    }

    async fn finish(&self, halted: bool, suspending: bool) -> Result<FlowState> {
        let failures: Vec<Failure> = self
            .storage
            .failures()
            .into_iter()
            .map(|(_, failure)| failure)
            .collect();

        if halted {
            self.storage.set_flow_state(FlowState::Failure).await?;
            let revert_failures: Vec<Failure> = self
                .storage
                .revert_failures()
                .into_iter()
                .map(|(_, failure)| failure)
                .collect();
            return Err(FlowError::Failed {
                failures,
                revert_failures,
            });
        }

        let analyzer = self.analyzer();
        if analyzer.is_success() {
            self.storage.set_flow_state(FlowState::Success).await?;
            return Ok(FlowState::Success);
        }
        if suspending {
            self.storage.set_flow_state(FlowState::Suspended).await?;
            return Ok(FlowState::Suspended);
        }
        if analyzer.is_reverted() {
            self.storage.set_flow_state(FlowState::Reverted).await?;
            return Err(FlowError::Execution(WrappedFailure::new(failures)));
        }

        self.storage.set_flow_state(FlowState::Failure).await?;
        Err(FlowError::InvalidState(format!(
            "flow '{}' stopped with no eligible atoms left",
            self.storage.flow_id()
        )))
    }
}

#[cfg(test)]
mod tests;
