use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, NodeBehavior, NodeConfig, NodeError, NodeOutput, PortDefinition,
    PortValues, Value,
};
use pulseruntime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl NodeBehavior for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("json", DataType::String),
            PortDefinition::output("parsed", DataType::Null),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let input = inputs.require("json")?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.data_type().to_string(),
        })?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output("parsed", parsed))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, _config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        Ok(Arc::new(JsonParseNode))
    }

    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode {
    pretty: bool,
}

impl JsonStringifyNode {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

#[async_trait]
impl NodeBehavior for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("value", DataType::Null),
            PortDefinition::output("json", DataType::String),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let value = inputs.get("value").cloned().unwrap_or(Value::Null);

        let json_str = if self.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output("json", json_str))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError> {
        let pretty = config.get("pretty").and_then(Value::as_bool).unwrap_or(false);
        Ok(Arc::new(JsonStringifyNode::new(pretty)))
    }

    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
