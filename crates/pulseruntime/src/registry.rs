use pulsecore::{
    GraphError, Node, NodeBehavior, NodeConfig, NodeError, NodeId, NodeResolver, PortDefinition,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory trait for creating node behaviors
pub trait NodeFactory: Send + Sync {
    /// Create a new behavior configured by the node's context
    fn create(&self, config: &NodeConfig) -> Result<Arc<dyn NodeBehavior>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, category)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Create a node with a fresh id
    pub fn create_node(
        &self,
        node_type: &str,
        label: impl Into<String>,
        context: NodeConfig,
    ) -> Result<Node, GraphError> {
        let label = label.into();
        self.construct(node_type, NodeId::new_v4(), &label, &context)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }

    /// Ports a node type declares for the given configuration
    pub fn port_definitions(
        &self,
        node_type: &str,
        config: &NodeConfig,
    ) -> Result<Vec<PortDefinition>, GraphError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| GraphError::UnknownNodeType(node_type.to_string()))?;
        let behavior = factory
            .create(config)
            .map_err(|e| GraphError::InvalidDocument(format!("Failed to create node: {}", e)))?;
        Ok(behavior.ports())
    }
}

impl NodeResolver for NodeRegistry {
    fn construct(
        &self,
        type_id: &str,
        id: NodeId,
        label: &str,
        context: &NodeConfig,
    ) -> Result<Node, GraphError> {
        let factory = self
            .factories
            .get(type_id)
            .ok_or_else(|| GraphError::UnknownNodeType(type_id.to_string()))?;
        let behavior = factory
            .create(context)
            .map_err(|e| GraphError::InvalidDocument(format!("Failed to create node: {}", e)))?;
        Ok(Node::new(id, label, behavior, context.clone()))
    }
}
