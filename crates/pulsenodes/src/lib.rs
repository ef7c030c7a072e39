//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod flow;
mod math;
mod time;
mod transform;
mod value;

pub use debug::DebugNode;
pub use flow::{DistributeNode, MergeNode, RelayNode};
pub use math::AddNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
pub use value::ConstantNode;
use pulseruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(flow::RelayNodeFactory));
    registry.register(Arc::new(flow::DistributeNodeFactory));
    registry.register(Arc::new(flow::MergeNodeFactory));
    registry.register(Arc::new(math::AddNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(value::ConstantNodeFactory));
}

/// Registry with every standard node registered
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
