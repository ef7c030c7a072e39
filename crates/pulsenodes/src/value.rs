use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues, Value,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Source node emitting a configured value.
///
/// Fires once per execution unless `repeat` is set, in which case it fires
/// on every iteration like a periodic trigger.
pub struct ConstantNode {
    value: Value,
    repeat: bool,
}

impl ConstantNode {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            repeat: false,
        }
    }

    pub fn repeating(value: Value) -> Self {
        Self {
            value,
            repeat: true,
        }
    }
}

#[async_trait]
impl NodeBehavior for ConstantNode {
    fn node_type(&self) -> &str {
        "value.constant"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::output("value", self.value.data_type())]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        _inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_output("value", self.value.clone()))
    }

    fn refires(&self) -> bool {
        self.repeat
    }
}

pub struct ConstantNodeFactory;

impl NodeFactory for ConstantNodeFactory {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        let value = config.get("value").cloned().unwrap_or(Value::Null);
        let repeat = config.get("repeat").and_then(Value::as_bool).unwrap_or(false);
        Ok(Arc::new(ConstantNode { value, repeat }))
    }

    fn node_type(&self) -> &str {
        "value.constant"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit the configured value".to_string(),
            category: "value".to_string(),
        }
    }
}
