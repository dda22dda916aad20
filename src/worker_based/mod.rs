//! Running task atoms on remote workers.
//!
//! An engine-side [`WorkerTaskExecutor`] publishes requests to worker
//! topics and matches replies by correlation id. A [`Worker`] serves the
//! endpoints it was built with and advertises them on the capabilities
//! topic so executors know where each task can run.

pub mod cache;
pub mod endpoint;
pub mod executor;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod worker;

pub use cache::WorkersCache;
pub use endpoint::{Endpoint, EndpointRegistry};
pub use executor::{WorkerExecutorOptions, WorkerTaskExecutor};
pub use protocol::{
    Capabilities, Envelope, MessageKind, Notification, RemoteOutcome, Request, RequestState,
    Response, CAPABILITIES_TOPIC,
};
pub use proxy::{InMemoryTransport, MessageHandler, Proxy, Transport};
pub use server::Server;
pub use worker::{Worker, WorkerOptions};
