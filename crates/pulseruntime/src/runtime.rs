use crate::{Executor, ExecutorConfig, NodeRegistry};
use pulsecore::{
    EventSubscription, ExecutionContext, ExecutionResult, FlowError, Graph, GraphDocument,
    StartMode,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Main runtime for building and executing graphs
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: Executor,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            executor: Executor::new(config.executor),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Handle for pausing, stepping, resuming or cancelling the run
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Build a graph from its document form using the registered node types
    pub fn load(&self, document: &GraphDocument) -> Result<Graph, FlowError> {
        Ok(Graph::from_document(document, self.registry.as_ref())?)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Graph, FlowError> {
        let text = std::fs::read_to_string(path)?;
        let document: GraphDocument = serde_json::from_str(&text)?;
        self.load(&document)
    }

    pub async fn execute(
        &self,
        graph: &mut Graph,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, FlowError> {
        Ok(self.executor.execute(graph, context).await?)
    }

    pub async fn execute_with(
        &self,
        graph: &mut Graph,
        context: ExecutionContext,
        mode: StartMode,
    ) -> Result<ExecutionResult, FlowError> {
        Ok(self.executor.execute_with(graph, context, mode).await?)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> EventSubscription {
        self.executor.subscribe()
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub executor: ExecutorConfig,
}

impl RuntimeConfig {
    /// Read a JSON configuration file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
