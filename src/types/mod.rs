pub mod failure;
pub mod graph;
pub mod tree;

pub use failure::{Failure, WrappedFailure};
pub use graph::{DiGraph, EdgeKind};
