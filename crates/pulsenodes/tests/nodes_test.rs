use async_trait::async_trait;
use parking_lot::Mutex;
use pulsecore::{
    ActivationContext, DataType, ExecutionContext, Graph, GraphDocument, GraphError, Node,
    NodeBehavior, NodeConfig, NodeError, NodeId, NodeOutput, PortDefinition, PortValues, Value,
};
use pulsenodes::{
    standard_registry, AddNode, ConstantNode, DelayNode, DistributeNode, JsonStringifyNode,
    MergeNode, RelayNode,
};
use pulseruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;

/// Records every value delivered to `in`.
struct Collector {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl NodeBehavior for Collector {
    fn node_type(&self) -> &str {
        "test.collect"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::input("in", DataType::Null)]
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

fn add(
    graph: &mut Graph,
    registry: &NodeRegistry,
    node_type: &str,
    config: &[(&str, Value)],
) -> NodeId {
    let config: NodeConfig = config
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let node = registry.create_node(node_type, node_type, config).unwrap();
    graph.add_node(node).unwrap()
}

fn add_collector(graph: &mut Graph) -> (NodeId, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let collector = Collector { seen: seen.clone() };
    let node = Node::new(NodeId::new_v4(), "collect", Arc::new(collector), NodeConfig::new());
    (graph.add_node(node).unwrap(), seen)
}

fn connect(graph: &mut Graph, from: (NodeId, &str), to: (NodeId, &str)) {
    let from = graph.node(from.0).unwrap().output(from.1).unwrap().id();
    let to = graph.node(to.0).unwrap().input(to.1).unwrap().id();
    graph.add_edge(from, to).unwrap();
}

fn detached() -> ActivationContext {
    ActivationContext::detached(NodeId::new_v4(), NodeConfig::new())
}

fn numbers(values: &[i64]) -> Value {
    Value::Array(values.iter().map(|v| Value::Integer(*v)).collect())
}

#[test]
fn test_registry_lists_standard_nodes() {
    let registry = standard_registry();

    assert_eq!(
        registry.list_node_types(),
        vec![
            "debug.log",
            "flow.distribute",
            "flow.merge",
            "flow.relay",
            "math.add",
            "time.delay",
            "transform.json_parse",
            "transform.json_stringify",
            "value.constant",
        ]
    );
    assert_eq!(registry.get_metadata("flow.relay").unwrap().category, "flow");
    assert!(registry.get_metadata("nope").is_none());
    let ports = registry
        .port_definitions("math.add", &NodeConfig::new())
        .unwrap();
    assert_eq!(ports.len(), 3);
}

#[test]
fn test_registry_rejects_unknown_type_and_bad_config() {
    let registry = standard_registry();

    let err = registry
        .create_node("nope", "x", NodeConfig::new())
        .err()
        .unwrap();
    assert_eq!(err, GraphError::UnknownNodeType("nope".to_string()));

    let mut config = NodeConfig::new();
    config.insert("delay_ms".to_string(), Value::Integer(-5));
    let err = registry.create_node("time.delay", "x", config).err().unwrap();
    assert!(matches!(err, GraphError::InvalidDocument(msg) if msg.contains("delay_ms")));
}

#[test]
fn test_constant_types_its_output_from_the_value() {
    let registry = standard_registry();
    let mut graph = Graph::new();
    let id = add(&mut graph, &registry, "value.constant", &[("value", numbers(&[1]))]);

    let port = graph.node(id).unwrap().output("value").unwrap();
    assert_eq!(port.data_type(), DataType::Array);
    assert!(!ConstantNode::new(Value::Integer(1)).refires());
    assert!(ConstantNode::repeating(Value::Integer(1)).refires());
}

#[tokio::test]
async fn test_distribute_emits_one_item_per_iteration() {
    let registry = standard_registry();
    let mut graph = Graph::new();
    let source = add(&mut graph, &registry, "value.constant", &[("value", numbers(&[1, 2, 3]))]);
    let each = add(&mut graph, &registry, "flow.distribute", &[]);
    let relay = add(&mut graph, &registry, "flow.relay", &[]);
    let (sink, seen) = add_collector(&mut graph);
    connect(&mut graph, (source, "value"), (each, "items"));
    connect(&mut graph, (each, "item"), (relay, "in"));
    connect(&mut graph, (relay, "out"), (sink, "in"));

    let runtime = FlowRuntime::new();
    let result = runtime
        .execute(&mut graph, ExecutionContext::new())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.iterations, 5);
    assert_eq!(
        *seen.lock(),
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
    let remaining = graph
        .node(each)
        .unwrap()
        .control_output("remaining")
        .unwrap()
        .peek()
        .clone();
    assert_eq!(remaining, Value::Integer(0));
}

#[tokio::test]
async fn test_distribute_buffers_across_activations() {
    let node = DistributeNode::new();

    let first = node
        .activate_core(
            detached(),
            PortValues::new().with("items", numbers(&[1, 2])),
            PortValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.outputs.get("item"), Some(&Value::Integer(1)));
    assert!(node.has_pending_work());

    let second = node
        .activate_core(
            detached(),
            PortValues::new().with("items", numbers(&[3])),
            PortValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(second.outputs.get("item"), Some(&Value::Integer(2)));
    assert_eq!(node.buffered(), 1);

    let bad = node
        .activate_core(
            detached(),
            PortValues::new().with("items", "nope"),
            PortValues::new(),
        )
        .await;
    assert!(matches!(bad, Err(NodeError::InvalidInputType { .. })));
}

#[tokio::test]
async fn test_merge_forwards_whichever_input_arrived() {
    let node = MergeNode;
    assert_eq!(
        node.readiness_policy(),
        pulsecore::ReadinessPolicy::AnyConnected
    );

    let out = node
        .activate_core(detached(), PortValues::new().with("b", "right"), PortValues::new())
        .await
        .unwrap();
    assert_eq!(out.outputs.get("value"), Some(&Value::from("right")));

    let both = PortValues::new().with("a", 1_i64).with("b", 2_i64);
    let out = node
        .activate_core(detached(), both, PortValues::new())
        .await
        .unwrap();
    assert_eq!(out.outputs.get("value"), Some(&Value::Integer(1)));
}

#[tokio::test]
async fn test_merge_runs_with_one_branch_idle() {
    let registry = standard_registry();
    let mut graph = Graph::new();
    let left = add(&mut graph, &registry, "value.constant", &[("value", Value::from("L"))]);
    let merge = add(&mut graph, &registry, "flow.merge", &[]);
    // Distributing an empty array never produces an item.
    let empty = add(&mut graph, &registry, "value.constant", &[("value", numbers(&[]))]);
    let idle = add(&mut graph, &registry, "flow.distribute", &[]);
    let (sink, seen) = add_collector(&mut graph);
    connect(&mut graph, (left, "value"), (merge, "a"));
    connect(&mut graph, (empty, "value"), (idle, "items"));
    connect(&mut graph, (idle, "item"), (merge, "b"));
    connect(&mut graph, (merge, "value"), (sink, "in"));

    let result = FlowRuntime::new()
        .execute(&mut graph, ExecutionContext::new())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.iterations, 3);
    assert_eq!(*seen.lock(), vec![Value::from("L")]);
}

#[tokio::test]
async fn test_add_and_missing_operand() {
    let inputs = PortValues::new().with("a", 2_i64).with("b", 3.5);
    let out = AddNode
        .activate_core(detached(), inputs, PortValues::new())
        .await
        .unwrap();
    assert_eq!(out.outputs.get("sum"), Some(&Value::Number(5.5)));

    let err = AddNode
        .activate_core(detached(), PortValues::new().with("a", 1_i64), PortValues::new())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(name) if name == "b"));
}

#[tokio::test]
async fn test_json_parse_then_stringify() {
    let registry = standard_registry();
    let mut graph = Graph::new();
    let text = add(
        &mut graph,
        &registry,
        "value.constant",
        &[("value", Value::from(r#"{"a": [1, 2]}"#))],
    );
    let parse = add(&mut graph, &registry, "transform.json_parse", &[]);
    let stringify = add(&mut graph, &registry, "transform.json_stringify", &[]);
    let (sink, seen) = add_collector(&mut graph);
    connect(&mut graph, (text, "value"), (parse, "json"));
    connect(&mut graph, (parse, "parsed"), (stringify, "value"));
    connect(&mut graph, (stringify, "json"), (sink, "in"));

    let result = FlowRuntime::new()
        .execute(&mut graph, ExecutionContext::new())
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.iterations, 4);
    assert_eq!(*seen.lock(), vec![Value::from(r#"{"a":[1,2]}"#)]);

    let pretty = JsonStringifyNode::new(true)
        .activate_core(detached(), PortValues::new().with("value", numbers(&[1])), PortValues::new())
        .await
        .unwrap();
    assert_eq!(pretty.outputs.get("json"), Some(&Value::from("[\n  1\n]")));
}

#[tokio::test]
async fn test_invalid_json_fails_the_run() {
    let registry = standard_registry();
    let mut graph = Graph::new();
    let text = add(&mut graph, &registry, "value.constant", &[("value", Value::from("{oops"))]);
    let parse = add(&mut graph, &registry, "transform.json_parse", &[]);
    connect(&mut graph, (text, "value"), (parse, "json"));

    let result = FlowRuntime::new()
        .execute(&mut graph, ExecutionContext::new())
        .await
        .unwrap();

    let error = result.error().unwrap();
    assert!(error.starts_with("transform.json_parse: "), "{}", error);
    assert!(error.contains("JSON parse error"));
}

#[tokio::test]
async fn test_delay_is_cancellable() {
    let node = DelayNode::new(Duration::from_secs(30));
    let ctx = detached();
    ctx.cancellation.cancel();

    let result = node
        .activate_core(ctx, PortValues::new().with("in", 1_i64), PortValues::new())
        .await;

    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[tokio::test]
async fn test_relay_passes_value_through() {
    let out = RelayNode
        .activate_core(detached(), PortValues::new().with("in", true), PortValues::new())
        .await
        .unwrap();

    assert_eq!(out.outputs.get("out"), Some(&Value::Boolean(true)));
    assert!(RelayNode.is_direct_through());
}

#[tokio::test]
async fn test_runtime_loads_documents() {
    let registry = Arc::new(standard_registry());
    let mut graph = Graph::new();
    let source = add(&mut graph, &registry, "value.constant", &[("value", numbers(&[4, 5]))]);
    let each = add(&mut graph, &registry, "flow.distribute", &[]);
    let log = add(&mut graph, &registry, "debug.log", &[]);
    connect(&mut graph, (source, "value"), (each, "items"));
    connect(&mut graph, (each, "item"), (log, "message"));

    let json = serde_json::to_string_pretty(&graph.to_document()).unwrap();
    let document: GraphDocument = serde_json::from_str(&json).unwrap();
    let runtime = FlowRuntime::with_registry(registry, RuntimeConfig::default());
    let mut loaded = runtime.load(&document).unwrap();

    assert_eq!(loaded.node_ids(), graph.node_ids());
    assert_eq!(loaded.edges(), graph.edges());

    let result = runtime
        .execute(&mut loaded, ExecutionContext::new())
        .await
        .unwrap();
    assert!(result.is_completed());
    let last = loaded.node(log).unwrap().output("message").unwrap().peek().clone();
    assert_eq!(last, Value::Integer(5));
}

#[test]
fn test_runtime_config_from_file() {
    let path = std::env::temp_dir().join(format!("pulse-config-{}.json", NodeId::new_v4()));
    std::fs::write(&path, r#"{"executor": {"max_relay_depth": 4}}"#).unwrap();

    let config = RuntimeConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.executor.max_relay_depth, 4);
    assert_eq!(config.executor.iteration_delay_ms, 0);
    assert_eq!(config.executor.event_buffer_size, 1000);
}
