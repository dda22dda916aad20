use log::{debug, info, warn};
use std::sync::Arc;

use super::compiler::{Compilation, Compiler};
use super::executor::{AtomExecutor, LocalExecutor};
use super::options::{EngineOptions, ExecutorKind};
use super::runtime::{Runtime, SuspendHandle};
use super::states::FlowState;
use crate::error::{FlowError, Result};
use crate::flow::Flow;
use crate::storage::{Storage, StorageBackend};
use crate::task::Arguments;
use crate::worker_based::{Transport, WorkerExecutorOptions, WorkerTaskExecutor};

/// Compiles a flow and drives it to completion against a storage backend.
///
/// The engine claims the flow for the duration of `run()`, so two engines
/// cannot drive the same flow id at once.
pub struct Engine {
    flow: Flow,
    flow_id: String,
    backend: Arc<dyn StorageBackend>,
    options: EngineOptions,
    store: Arguments,
    executor: Option<Arc<dyn AtomExecutor>>,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<Storage>>,
    compilation: Option<Arc<Compilation>>,
    suspend: SuspendHandle,
}

impl Engine {
    pub fn new(flow: Flow, backend: Arc<dyn StorageBackend>, flow_id: impl Into<String>) -> Self {
        Self {
            flow,
            flow_id: flow_id.into(),
            backend,
            options: EngineOptions::default(),
            store: Arguments::new(),
            executor: None,
            transport: None,
            storage: None,
            compilation: None,
            suspend: SuspendHandle::new(),
        }
    }

    /// An engine dispatching every task atom to remote workers.
    pub fn worker_based(
        flow: Flow,
        backend: Arc<dyn StorageBackend>,
        flow_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: WorkerExecutorOptions,
    ) -> Self {
        Self::new(flow, backend, flow_id)
            .with_options(EngineOptions::default().with_worker_based(options))
            .with_transport(transport)
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Seeds symbols atoms can require without a providing atom.
    pub fn with_store(mut self, values: Arguments) -> Self {
        self.store.extend(values);
        self
    }

    /// Uses `executor` instead of the one the options describe.
    pub fn with_executor(mut self, executor: Arc<dyn AtomExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Compiles the flow and loads its persisted state. Runs once; later
    /// calls return the cached compilation.
    pub async fn compile(&mut self) -> Result<Arc<Compilation>> {
        if let Some(compilation) = &self.compilation {
            return Ok(compilation.clone());
        }

        debug!("Compiling flow '{}' ({})", self.flow.name(), self.flow_id);
        self.backend.init().await?;
        let storage = Storage::open(self.backend.clone(), &self.flow_id, self.flow.name()).await?;
        if !self.store.is_empty() {
            storage.inject(self.store.clone()).await?;
        }
        let store = storage.store();
        let compilation = Arc::new(
            Compiler::new()
                .with_store_symbols(store.keys().cloned())
                .compile(&self.flow)?,
        );
        storage.bind(compilation.clone()).await?;
        info!(
            "Compiled flow '{}': {} atoms, {} edges",
            self.flow.name(),
            compilation.len(),
            compilation.execution_graph().edge_count()
        );

        self.storage = Some(Arc::new(storage));
        self.compilation = Some(compilation.clone());
        Ok(compilation)
    }

    fn build_executor(&self) -> Result<Arc<dyn AtomExecutor>> {
        if let Some(executor) = &self.executor {
            return Ok(executor.clone());
        }
        match self.options.executor {
            ExecutorKind::Local => Ok(Arc::new(LocalExecutor::new(self.options.max_workers))),
            ExecutorKind::WorkerBased => {
                let transport = self.transport.clone().ok_or_else(|| {
                    FlowError::InvalidState("a worker-based engine needs a transport".into())
                })?;
                Ok(Arc::new(WorkerTaskExecutor::new(
                    transport,
                    self.options.worker_based.clone(),
                )))
            }
        }
    }

    /// Runs the flow. Returns the final state on SUCCESS or SUSPENDED;
    /// a reverted or failed run is an error carrying its failures.
    pub async fn run(&mut self) -> Result<FlowState> {
        let compilation = self.compile().await?;
        let storage = self.storage()?;
        self.suspend.reset();

        storage.claim().await?;
        // State cached before the claim may be stale.
        let result = match storage.refresh().await {
            Ok(()) => self.run_claimed(compilation, storage.clone()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = storage.release().await {
            warn!("Failed to release flow '{}': {}", self.flow_id, e);
        }
        result
    }

    async fn run_claimed(&self, compilation: Arc<Compilation>, storage: Arc<Storage>) -> Result<FlowState> {
        let executor = self.build_executor()?;
        executor.start().await?;
        info!(
            "Running flow '{}' ({}) with {} atoms",
            self.flow.name(),
            self.flow_id,
            compilation.len()
        );

        let runtime = Runtime::new(compilation, storage, executor.clone(), self.suspend.clone());
        let result = runtime.run().await;
        if let Err(e) = executor.stop().await {
            warn!("Failed to stop the executor of flow '{}': {}", self.flow_id, e);
        }

        match &result {
            Ok(state) => info!("Flow '{}' finished: {}", self.flow_id, state),
            Err(e) => warn!("Flow '{}' did not succeed: {}", self.flow_id, e),
        }
        result
    }

    /// Asks the current run to stop admitting new atoms.
    pub fn suspend(&self) {
        info!("Suspend requested for flow '{}'", self.flow_id);
        self.suspend.suspend()
    }

    /// A handle that can suspend the run from another task.
    pub fn suspend_handle(&self) -> SuspendHandle {
        self.suspend.clone()
    }

    /// The flow's persisted state; available after `compile()`.
    pub fn storage(&self) -> Result<Arc<Storage>> {
        self.storage
            .clone()
            .ok_or_else(|| FlowError::InvalidState(format!("flow '{}' is not compiled", self.flow_id)))
    }

    pub fn compilation(&self) -> Option<Arc<Compilation>> {
        self.compilation.clone()
    }
}
