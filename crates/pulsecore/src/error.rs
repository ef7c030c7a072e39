use crate::{DataType, NodeId, PortId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A port write rejected by the type system. The port is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("cannot convert {from} to {to}")]
    Incompatible { from: DataType, to: DataType },

    #[error("cannot parse {input:?} as {to}")]
    Parse { input: String, to: DataType },

    #[error("expected {expected} after parsing JSON, got {actual}")]
    Shape { expected: DataType, actual: DataType },

    #[error("non-finite number {0} cannot be stored")]
    NonFinite(f64),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Unknown output port: {0}")]
    UnknownPort(String),

    #[error("Output '{port}' rejected: {source}")]
    Conversion {
        port: String,
        #[source]
        source: ConversionError,
    },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    #[error("Edge {from} -> {to} already exists")]
    DuplicateEdge { from: PortId, to: PortId },

    #[error("Edge {from} -> {to} must run from an output port to an input port")]
    InvalidDirection { from: PortId, to: PortId },

    #[error("Incompatible edge {from} -> {to}: {from_type} cannot flow into {to_type}")]
    IncompatibleEdge {
        from: PortId,
        to: PortId,
        from_type: DataType,
        to_type: DataType,
    },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Port {port} rejected value: {source}")]
    Write {
        port: PortId,
        #[source]
        source: ConversionError,
    },

    #[error("Invalid graph document: {0}")]
    InvalidDocument(String),
}

/// Control call that is not allowed from the current execution state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {transition} while {state}")]
pub struct StateTransitionError {
    pub state: crate::ExecutionState,
    pub transition: crate::Transition,
}
