//! # atomflow
//!
//! An asynchronous workflow engine for Rust. Flows of atoms are compiled
//! into a dependency graph, run in parallel where the graph allows, and
//! unwound through compensating reverts when something fails.
//!
//! ## Features
//!
//! - Linear, unordered and graph flows that nest freely
//! - Data dependencies derived from what atoms require and provide
//! - Parallel execution on a bounded local pool
//! - Reverts in reverse dependency order on failure
//! - Retry controllers deciding to retry, revert or revert everything
//! - Persisted atom state (memory or SQLite) for resuming interrupted runs
//! - Suspend and resume
//! - Remote workers reached over a topic-addressed transport
//!
//! ## Usage
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! atomflow = "0.1"
//! ```
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use atomflow::storage::MemoryStorage;
//! use atomflow::task::{Arguments, BoxError, Progress, Task};
//! use atomflow::{Atom, Engine, Flow, FlowState};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! // Define a custom task
//! struct Greet;
//!
//! #[async_trait]
//! impl Task for Greet {
//!     async fn execute(&self, args: &Arguments, _progress: &Progress) -> Result<Value, BoxError> {
//!         Ok(Value::from(format!("hello {}", args["name"])))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> atomflow::Result<()> {
//!     let flow = Flow::linear("greeting").add(
//!         Atom::task("greet", Greet)
//!             .with_requires(&["name"])
//!             .with_provides(&["greeting"]),
//!     );
//!
//!     let mut store = Arguments::new();
//!     store.insert("name".to_string(), Value::from("world"));
//!     let mut engine = Engine::new(flow, Arc::new(MemoryStorage::new()), "greeting-1")
//!         .with_store(store);
//!
//!     assert_eq!(engine.run().await?, FlowState::Success);
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! Licensed under the MIT license. See the [LICENSE](LICENSE) file for details.

pub mod atom;
pub mod engine;
pub mod error;
pub mod flow;
pub mod formatters;
pub mod storage;
pub mod task;
pub mod types;
pub mod worker_based;

pub use atom::{Atom, TaskKey, Version};
pub use engine::{AtomState, Engine, EngineOptions, ExecutorKind, FlowState, Intention, SuspendHandle};
pub use error::{FlowError, Result};
pub use flow::Flow;
pub use formatters::FailureFormatter;
pub use storage::{StorageBackend, MemoryStorage, SqliteStorage};
pub use task::{Decision, Retry, RetryPolicy, Task};
pub use types::{Failure, WrappedFailure};
pub use worker_based::{Worker, WorkerExecutorOptions, WorkerOptions};
