//! Graph execution runtime
//!
//! This crate provides the executor that runs graphs iteration by iteration,
//! the node registry used to rebuild graphs from documents, and a small
//! runtime facade tying both together.

mod executor;
mod registry;
mod runtime;

pub use executor::{Executor, ExecutorConfig};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry};
pub use runtime::{FlowRuntime, RuntimeConfig};
