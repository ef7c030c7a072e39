use async_trait::async_trait;
use pulsecore::{
    ActivationContext, DataType, ExecutionStatus, Node, NodeBehavior, NodeConfig, NodeError,
    NodeId, NodeOutput, PortDefinition, PortId, PortValues, Readiness, ReadinessPolicy, Value,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sums `a` and `b`, scaled by the optional `factor` control input.
struct Sum {
    policy: ReadinessPolicy,
    pending: AtomicBool,
}

impl Sum {
    fn new(policy: ReadinessPolicy) -> Self {
        Self {
            policy,
            pending: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl NodeBehavior for Sum {
    fn node_type(&self) -> &str {
        "test.sum"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition::input("a", DataType::Number),
            PortDefinition::input("b", DataType::Number),
            PortDefinition::control_input("factor", DataType::Number),
            PortDefinition::output("sum", DataType::Number),
            PortDefinition::control_output("overflow", DataType::Boolean),
        ]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        inputs: PortValues,
        controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        let a = inputs.get("a").and_then(Value::as_f64).unwrap_or(0.0);
        let b = inputs.get("b").and_then(Value::as_f64).unwrap_or(0.0);
        let factor = controls.get("factor").and_then(Value::as_f64).unwrap_or(1.0);
        let sum = (a + b) * factor;
        Ok(NodeOutput::new()
            .with_output("sum", sum)
            .with_control("overflow", sum > 100.0))
    }

    fn readiness_policy(&self) -> ReadinessPolicy {
        self.policy
    }

    fn has_pending_work(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Returns whatever output it was built with.
struct Fixed(Result<NodeOutput, NodeError>);

#[async_trait]
impl NodeBehavior for Fixed {
    fn node_type(&self) -> &str {
        "test.fixed"
    }

    fn ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::output("count", DataType::Integer)]
    }

    async fn activate_core(
        &self,
        _ctx: ActivationContext,
        _inputs: PortValues,
        _controls: PortValues,
    ) -> Result<NodeOutput, NodeError> {
        self.0.clone()
    }
}

fn node(behavior: impl NodeBehavior + 'static) -> Node {
    Node::new(NodeId::new_v4(), "test", Arc::new(behavior), NodeConfig::new())
}

fn port_id(node: &Node, name: &str) -> PortId {
    node.input(name).unwrap().id()
}

fn connected(ids: &[PortId]) -> HashSet<PortId> {
    ids.iter().copied().collect()
}

#[test]
fn test_node_without_connected_inputs_is_ready() {
    let node = node(Sum::new(ReadinessPolicy::AllConnected));

    assert_eq!(node.is_ready_to_activate(&HashSet::new()), Readiness::Ready);
}

#[test]
fn test_all_connected_policy_waits_for_every_input() {
    let mut node = node(Sum::new(ReadinessPolicy::AllConnected));
    let wired = connected(&[port_id(&node, "a"), port_id(&node, "b")]);

    assert_eq!(
        node.is_ready_to_activate(&wired),
        Readiness::NotReadyUntilAllPortsFilled
    );

    node.input_mut("a").unwrap().write(Value::Number(1.0)).unwrap();
    assert_eq!(
        node.is_ready_to_activate(&wired),
        Readiness::NotReadyUntilAllPortsFilled
    );

    node.input_mut("b").unwrap().write(Value::Number(2.0)).unwrap();
    assert_eq!(node.is_ready_to_activate(&wired), Readiness::Ready);
}

#[test]
fn test_unconnected_inputs_do_not_gate() {
    let mut node = node(Sum::new(ReadinessPolicy::AllConnected));
    let wired = connected(&[port_id(&node, "a")]);

    node.input_mut("a").unwrap().write(Value::Number(1.0)).unwrap();

    assert_eq!(node.is_ready_to_activate(&wired), Readiness::Ready);
}

#[test]
fn test_any_connected_policy_needs_one_input() {
    let mut node = node(Sum::new(ReadinessPolicy::AnyConnected));
    let wired = connected(&[port_id(&node, "a"), port_id(&node, "b")]);

    assert_eq!(
        node.is_ready_to_activate(&wired),
        Readiness::NotReadyUntilAnyPortsFilled
    );

    node.input_mut("b").unwrap().write(Value::Number(2.0)).unwrap();
    assert_eq!(node.is_ready_to_activate(&wired), Readiness::Ready);
}

#[test]
fn test_control_inputs_and_exec_in() {
    let mut node = node(Sum::new(ReadinessPolicy::AllConnected));
    let factor = node.control_input("factor").unwrap().id();
    let exec = node.in_exec().id();

    // A wired control input never blocks.
    assert_eq!(node.is_ready_to_activate(&connected(&[factor])), Readiness::Ready);

    // A wired exec input does, until something fires it.
    let wired = connected(&[exec]);
    assert_eq!(
        node.is_ready_to_activate(&wired),
        Readiness::NotReadyUntilAllPortsFilled
    );
    node.port_mut(exec).unwrap().write(Value::Null).unwrap();
    assert_eq!(node.is_ready_to_activate(&wired), Readiness::Ready);
}

#[test]
fn test_pending_work_and_disabled() {
    let behavior = Arc::new(Sum::new(ReadinessPolicy::AllConnected));
    let mut node = Node::new(
        NodeId::new_v4(),
        "buffered",
        behavior.clone(),
        NodeConfig::new(),
    );
    let wired = connected(&[port_id(&node, "a")]);

    behavior.pending.store(true, Ordering::SeqCst);
    assert_eq!(node.is_ready_to_activate(&wired), Readiness::Ready);

    node.set_context("disabled", true);
    assert!(node.is_disabled());
    assert_eq!(node.is_ready_to_activate(&wired), Readiness::NotReady);
}

#[tokio::test]
async fn test_activation_reads_inputs_and_writes_outputs() {
    let mut node = node(Sum::new(ReadinessPolicy::AllConnected));
    node.input_mut("a").unwrap().write(Value::Number(40.0)).unwrap();
    node.input_mut("b").unwrap().write(Value::from("2")).unwrap();
    node.control_input_mut("factor")
        .unwrap()
        .write(Value::Integer(3))
        .unwrap();

    let ctx = ActivationContext::detached(node.id(), NodeConfig::new());
    node.activate(ctx).await.unwrap();

    assert_eq!(node.status(), ExecutionStatus::Success);
    assert_eq!(node.output("sum").unwrap().peek(), &Value::Number(126.0));
    assert_eq!(
        node.control_output("overflow").unwrap().peek(),
        &Value::Boolean(true)
    );
    assert!(node.out_exec().has_new_data());
    assert!(!node.input("a").unwrap().has_new_data());

    node.clear_inputs();
    assert!(!node.input("a").unwrap().has_data());
    assert!(node.control_input("factor").unwrap().has_data());
}

#[tokio::test]
async fn test_failed_activation_records_error() {
    let mut node = node(Fixed(Err(NodeError::ExecutionFailed("boom".to_string()))));

    let ctx = ActivationContext::detached(node.id(), NodeConfig::new());
    let err = node.activate(ctx).await.unwrap_err();

    assert!(matches!(err, NodeError::ExecutionFailed(_)));
    assert_eq!(node.status(), ExecutionStatus::Failed);
    assert_eq!(node.last_error(), Some("Execution failed: boom"));
    assert!(!node.out_exec().has_data());

    node.reset_status();
    assert_eq!(node.status(), ExecutionStatus::Idle);
    assert_eq!(node.last_error(), None);
}

#[tokio::test]
async fn test_output_errors_fail_the_activation() {
    let mut unknown = node(Fixed(Ok(NodeOutput::new().with_output("missing", 1_i64))));
    let ctx = ActivationContext::detached(unknown.id(), NodeConfig::new());
    assert!(matches!(
        unknown.activate(ctx).await,
        Err(NodeError::UnknownPort(name)) if name == "missing"
    ));

    let mut mistyped = node(Fixed(Ok(NodeOutput::new().with_output("count", "many"))));
    let ctx = ActivationContext::detached(mistyped.id(), NodeConfig::new());
    assert!(matches!(
        mistyped.activate(ctx).await,
        Err(NodeError::Conversion { port, .. }) if port == "count"
    ));
    assert_eq!(mistyped.status(), ExecutionStatus::Failed);
}

#[test]
fn test_port_ids_cover_every_port() {
    let node = node(Sum::new(ReadinessPolicy::AllConnected));

    // exec in/out, a, b, factor, sum, overflow
    assert_eq!(node.port_ids().len(), 7);
    assert_eq!(node.trigger_port_ids().len(), 3);
    assert_eq!(node.output_port_ids().len(), 3);
    assert_eq!(node.type_id(), "test.sum");
    for id in node.port_ids() {
        assert!(node.port(id).is_some());
    }
}
