//! Core abstractions for the pulse dataflow engine
//!
//! This crate provides the value and port type system, nodes, the graph
//! with its connectivity indexes, the document form used for persistence,
//! and the event and state types the executor publishes. It contains no
//! scheduling logic.

mod document;
mod error;
pub mod events;
mod execution;
mod graph;
mod node;
mod port;
mod value;

pub use document::{GraphDocument, NodeDocument, NodePortsDocument, NodeResolver, PortDocument};
pub use error::{ConversionError, FlowError, GraphError, NodeError, StateTransitionError};
pub use events::*;
pub use execution::{
    ExecutionContext, ExecutionId, ExecutionOutcome, ExecutionResult, ExecutionState, StartMode,
    Transition, ITERATION_DELAY_KEY,
};
pub use graph::{Edge, Graph};
pub use node::{
    ActivationContext, ExecutionStatus, Node, NodeBehavior, NodeConfig, NodeId, NodeOutput,
    PortDefinition, PortValues, PreparedActivation, Readiness, ReadinessPolicy,
};
pub use port::{Port, PortDirection, PortId, PortKind};
pub use value::{convert, is_compatible, DataType, Value};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
