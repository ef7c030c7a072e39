use async_trait::async_trait;
use parking_lot::Mutex;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues, ReadinessPolicy, Value,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::collections::VecDeque;
use std::sync::Arc;

/// Zero-latency passthrough. Settles inside the iteration that fed it.
pub struct RelayNode;

#[async_trait]
impl NodeBehavior for RelayNode {
    fn node_type(&self) -> &str {
        "flow.relay"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("in", DataType::Null),
            PortDefinition::output("out", DataType::Null),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let value = inputs.get("in").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("out", value))
    }

    fn is_direct_through(&self) -> bool {
        true
    }
}

pub struct RelayNodeFactory;

impl NodeFactory for RelayNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(RelayNode))
    }

    fn node_type(&self) -> &str {
        "flow.relay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Pass a value through within the same iteration".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Fans an array out one element per iteration.
///
/// Incoming arrays are appended to an internal buffer; the node stays ready
/// until the buffer is drained, whether or not new input arrives.
#[derive(Default)]
pub struct DistributeNode {
    buffer: Mutex<VecDeque<Value>>,
}

impl DistributeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }
}

#[async_trait]
impl NodeBehavior for DistributeNode {
    fn node_type(&self) -> &str {
        "flow.distribute"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("items", DataType::Array),
            PortDefinition::output("item", DataType::Null),
            PortDefinition::control_output("remaining", DataType::Integer),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let mut buffer = self.buffer.lock();
        if let Some(items) = inputs.get("items") {
            let items = items.as_array().ok_or_else(|| NodeError::InvalidInputType {
                field: "items".to_string(),
                expected: "array".to_string(),
                actual: items.data_type().to_string(),
            })?;
            buffer.extend(items.iter().cloned());
        }

        let Some(item) = buffer.pop_front() else {
            return Ok(NodeOutput::new());
        };
        Ok(NodeOutput::new()
            .with_output("item", item)
            .with_control("remaining", buffer.len() as i64))
    }

    fn has_pending_work(&self) -> bool {
        !self.buffer.lock().is_empty()
    }
}

pub struct DistributeNodeFactory;

impl NodeFactory for DistributeNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(DistributeNode::new()))
    }

    fn node_type(&self) -> &str {
        "flow.distribute"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit array elements one per iteration".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Forwards whichever input arrived. Ready as soon as any connected input
/// holds data; `a` wins when both do.
pub struct MergeNode;

#[async_trait]
impl NodeBehavior for MergeNode {
    fn node_type(&self) -> &str {
        "flow.merge"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("a", DataType::Null),
            PortDefinition::input("b", DataType::Null),
            PortDefinition::output("value", DataType::Null),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let value = inputs
            .get("a")
            .or_else(|| inputs.get("b"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("value", value))
    }

    fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy::AnyConnected
    }
}

pub struct MergeNodeFactory;

impl NodeFactory for MergeNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(MergeNode))
    }

    fn node_type(&self) -> &str {
        "flow.merge"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Forward whichever input has data".to_string(),
            category: "flow".to_string(),
        }
    }
}
