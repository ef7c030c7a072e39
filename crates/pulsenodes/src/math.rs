use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Adds its two inputs
pub struct AddNode;

#[async_trait]
impl NodeBehavior for AddNode {
    fn node_type(&self) -> &str {
        "math.add"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("a", DataType::Number),
            PortDefinition::input("b", DataType::Number),
            PortDefinition::output("sum", DataType::Number),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let operand = |name: &str| {
            let value = inputs.require(name)?;
            value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "number".to_string(),
                actual: value.data_type().to_string(),
            })
        };
        let sum = operand("a")? + operand("b")?;
        Ok(NodeOutput::new().with_output("sum", sum))
    }
}

pub struct AddNodeFactory;

impl NodeFactory for AddNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(AddNode))
    }

    fn node_type(&self) -> &str {
        "math.add"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Add inputs a and b".to_string(),
            category: "math".to_string(),
        }
    }
}
