use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Simple debug node that logs its input and passes it on
pub struct DebugNode;

#[async_trait]
impl NodeBehavior for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("message", DataType::Null),
            PortDefinition::output("message", DataType::Null),
        ]
    }

    async fn activate_core(
        &self,
        ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let message = inputs.get("message").cloned().unwrap_or_default();

        tracing::info!(node = %ctx.node_id, iteration = ctx.iteration, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        Ok(NodeOutput::new().with_output("message", message))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(DebugNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
