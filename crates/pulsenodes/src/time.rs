use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues, Value,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay a value for a specified duration
pub struct DelayNode {
    delay: Duration,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl NodeBehavior for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("in", DataType::Null),
            PortDefinition::output("out", DataType::Null),
        ]
    }

    async fn activate_core(
        &self,
        ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        ctx.events.info(format!("Delaying for {}ms", self.delay.as_millis()));

        tokio::select! {
            _ = sleep(self.delay) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        let value = inputs.get("in").cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new().with_output("out", value))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        // Default to 1 second if not specified
        let delay_ms = match config.get("delay_ms") {
            None => 1000.0,
            Some(v) => v.as_f64().filter(|ms| *ms >= 0.0).ok_or_else(|| {
                NodeError::Configuration(format!("delay_ms must be a non-negative number, got {}", v))
            })?,
        };
        Ok(Arc::new(DelayNode::new(Duration::from_millis(delay_ms as u64))))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay a value for delay_ms milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
