pub mod action_engine;
pub mod analyzer;
pub mod compiler;
pub mod executor;
pub mod options;
pub mod runtime;
pub mod states;

pub use action_engine::Engine;
pub use analyzer::Analyzer;
pub use compiler::{compile, Compilation, Compiler, HierarchyItem};
pub use executor::{AtomExecutor, AtomFuture, Completion, LocalExecutor};
pub use options::{EngineOptions, ExecutorKind};
pub use runtime::{Runtime, SuspendHandle};
pub use states::{Action, AtomState, FlowState, Intention};
