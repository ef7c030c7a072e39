#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pulsecore::{
    ActivationContext, DataType, ExecutionEvent, Graph, Node, NodeBehavior, NodeConfig,
    NodeError, NodeId, NodeOutput, PortDefinition, PortId, PortValues, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Emits a fixed value on `out`.
pub struct Source {
    pub value: Value,
    pub data_type: DataType,
    pub repeat: bool,
    pub fired: Arc<AtomicUsize>,
}

impl Source {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            data_type: DataType::Null,
            repeat: false,
            fired: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn typed(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }
}

#[async_trait]
impl NodeBehavior for Source {
    fn node_type(&self) -> &str {
        "test.source"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::output("out", self.data_type)]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        _inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(NodeOutput::new().with_output("out", self.value.clone()))
    }

    fn refires(&self) -> bool {
        self.repeat
    }
}

/// Records every value delivered to `in`.
pub struct Sink {
    pub data_type: DataType,
    pub seen: Arc<Mutex<Vec<Value>>>,
}

impl Sink {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl NodeBehavior for Sink {
    fn node_type(&self) -> &str {
        "test.sink"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::input("in", self.data_type)]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        self.seen
            .lock()
            .push(inputs.get("in").cloned().unwrap_or_default());
        Ok(NodeOutput::new())
    }
}

/// Direct-through passthrough.
pub struct Relay;

#[async_trait]
impl NodeBehavior for Relay {
    fn node_type(&self) -> &str {
        "test.relay"
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
        Ok(NodeOutput::new().with_output("out", inputs.get("in").cloned().unwrap_or_default()))
    }

    fn is_direct_through(&self) -> bool {
        true
    }
}

/// Source that always fails.
pub struct Failing(pub &'static str);

#[async_trait]
impl NodeBehavior for Failing {
    fn node_type(&self) -> &str {
        "test.failing"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::output("out", DataType::Null)]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        _inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed(self.0.to_string()))
    }
}

/// Re-firing source that takes `delay` per activation.
pub struct Slow {
    pub delay: Duration,
    pub fired: Arc<AtomicUsize>,
}

impl Slow {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fired: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl NodeBehavior for Slow {
    fn node_type(&self) -> &str {
        "test.slow"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::output("out", DataType::Null)]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        _inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(NodeOutput::new())
    }

    fn refires(&self) -> bool {
        true
    }
}

pub fn add(graph: &mut Graph, label: &str, behavior: impl NodeBehavior + 'static) -> NodeId {
    let node = Node::new(NodeId::new_v4(), label, Arc::new(behavior), NodeConfig::new());
    graph.add_node(node).unwrap()
}

pub fn add_shared(graph: &mut Graph, label: &str, behavior: Arc<dyn NodeBehavior>) -> NodeId {
    let node = Node::new(NodeId::new_v4(), label, behavior, NodeConfig::new());
    graph.add_node(node).unwrap()
}

pub fn output(graph: &Graph, node: NodeId, name: &str) -> PortId {
    graph.node(node).unwrap().output(name).unwrap().id()
}

pub fn input(graph: &Graph, node: NodeId, name: &str) -> PortId {
    graph.node(node).unwrap().input(name).unwrap().id()
}

pub fn connect(graph: &mut Graph, from: NodeId, to: NodeId) {
    let from = output(graph, from, "out");
    let to = input(graph, to, "in");
    graph.add_edge(from, to).unwrap();
}

/// Short name of each event, for order assertions.
pub fn kinds(events: &[ExecutionEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            ExecutionEvent::Started { .. } => "started",
            ExecutionEvent::StateChanged { .. } => "state",
            ExecutionEvent::Iteration { .. } => "iteration",
            ExecutionEvent::NodeStarted { .. } => "node_started",
            ExecutionEvent::NodeCompleted { .. } => "node_completed",
            ExecutionEvent::DataPropagated { .. } => "propagated",
            ExecutionEvent::NodeEvent { .. } => "node_event",
            ExecutionEvent::Completed { .. } => "completed",
            ExecutionEvent::Cancelled { .. } => "cancelled",
            ExecutionEvent::Failed { .. } => "failed",
        })
        .collect()
}

/// Poll `condition` every few milliseconds, giving up after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
