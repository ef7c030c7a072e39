use crate::events::EventEmitter;
use crate::{
    ConversionError, DataType, ExecutionContext, NodeError, Port, PortDirection, PortId, PortKind, Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Node configuration, keyed by setting name.
pub type NodeConfig = BTreeMap<String, Value>;

/// Behavior of one node type. The executor only ever talks to nodes
/// through this trait.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Unique type identifier (e.g., "flow.relay", "math.add")
    fn node_type(&self) -> &str;

    /// Ports this node is built with
    fn ports(&self) -> Vec<PortDefinition>;

    /// Compute outputs from the collected inputs and control signals.
    async fn activate_core(
        &self,
        ctx: ActivationContext,
        inputs: PortValues,
        controls: PortValues,
    ) -> Result<NodeOutput, NodeError>;

    /// How connected inputs gate readiness
    fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy::AllConnected
    }

    /// Buffered work that keeps the node ready without new input
    fn has_pending_work(&self) -> bool {
        false
    }

    /// Runs synchronously inside the iteration that fed it
    fn is_direct_through(&self) -> bool {
        false
    }

    /// Whether a node with no connected inputs fires again after its first run
    fn refires(&self) -> bool {
        false
    }
}

/// Declaration of one named port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub data_type: DataType,
}

impl PortDefinition {
    pub fn input(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Data, data_type)
    }

    pub fn output(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Data, data_type)
    }

    pub fn control_input(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Control, data_type)
    }

    pub fn control_output(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Control, data_type)
    }

    fn new(
        name: impl Into<String>,
        direction: PortDirection,
        kind: PortKind,
        data_type: DataType,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            data_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    NotReadyUntilAnyPortsFilled,
    NotReadyUntilAllPortsFilled,
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessPolicy {
    AllConnected,
    AnyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Executing,
    Success,
    Failed,
}

/// Named values collected from, or destined for, a node's ports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortValues {
    values: BTreeMap<String, Value>,
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Value of a port, `None` when absent or empty.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Get required input or return error
    pub fn require(&self, name: &str) -> Result<&Value, NodeError> {
        self.get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl IntoIterator for PortValues {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl FromIterator<(String, Value)> for PortValues {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Output from node activation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// Values for the data output ports
    pub outputs: PortValues,

    /// Values for the control output ports
    pub controls: PortValues,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port, value);
        self
    }

    pub fn with_control(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.controls.insert(port, value);
        self
    }
}

/// Activation context passed to each node
#[derive(Clone)]
pub struct ActivationContext {
    pub node_id: NodeId,

    /// Iteration this activation belongs to
    pub iteration: u64,

    /// Node configuration at the time of activation
    pub config: NodeConfig,

    /// Host settings shared by every node of the execution
    pub execution: Arc<ExecutionContext>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the execution is cancelled
    pub cancellation: CancellationToken,
}

impl ActivationContext {
    /// Context for activating a node outside any executor.
    pub fn detached(node_id: NodeId, config: NodeConfig) -> Self {
        Self {
            node_id,
            iteration: 0,
            config,
            execution: Arc::new(ExecutionContext::default()),
            events: EventEmitter::detached(node_id),
            cancellation: CancellationToken::new(),
        }
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Inputs and control signals collected at the start of an activation.
pub struct PreparedActivation {
    pub behavior: Arc<dyn NodeBehavior>,
    pub inputs: PortValues,
    pub controls: PortValues,
}

/// A node instance: named ports plus the behavior that drives them.
pub struct Node {
    id: NodeId,
    label: String,
    type_id: String,
    context: NodeConfig,
    status: ExecutionStatus,
    last_error: Option<String>,
    in_exec: Port,
    out_exec: Port,
    inputs: BTreeMap<String, Port>,
    outputs: BTreeMap<String, Port>,
    control_inputs: BTreeMap<String, Port>,
    control_outputs: BTreeMap<String, Port>,
    behavior: Arc<dyn NodeBehavior>,
}

impl Node {
    pub fn new(
        id: NodeId,
        label: impl Into<String>,
        behavior: Arc<dyn NodeBehavior>,
        context: NodeConfig,
    ) -> Self {
        let mut node = Self {
            id,
            label: label.into(),
            type_id: behavior.node_type().to_string(),
            context,
            status: ExecutionStatus::Idle,
            last_error: None,
            in_exec: Port::exec("exec", PortDirection::Input),
            out_exec: Port::exec("exec", PortDirection::Output),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            control_inputs: BTreeMap::new(),
            control_outputs: BTreeMap::new(),
            behavior,
        };
        for def in node.behavior.ports() {
            let port = Port::new(def.name.clone(), def.direction, def.kind, def.data_type);
            let slot = match (def.kind, def.direction) {
                (PortKind::Control, PortDirection::Input) => &mut node.control_inputs,
                (PortKind::Control, PortDirection::Output) => &mut node.control_outputs,
                (_, PortDirection::Input) => &mut node.inputs,
                (_, PortDirection::Output) => &mut node.outputs,
            };
            slot.insert(def.name, port);
        }
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn context(&self) -> &NodeConfig {
        &self.context
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn behavior(&self) -> &Arc<dyn NodeBehavior> {
        &self.behavior
    }

    pub fn is_direct_through(&self) -> bool {
        self.behavior.is_direct_through()
    }

    pub fn is_disabled(&self) -> bool {
        self.context
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn in_exec(&self) -> &Port {
        &self.in_exec
    }

    pub fn out_exec(&self) -> &Port {
        &self.out_exec
    }

    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.get(name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.inputs.get_mut(name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.get(name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.outputs.get_mut(name)
    }

    pub fn control_input(&self, name: &str) -> Option<&Port> {
        self.control_inputs.get(name)
    }

    pub fn control_input_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.control_inputs.get_mut(name)
    }

    pub fn control_output(&self, name: &str) -> Option<&Port> {
        self.control_outputs.get(name)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Port> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, Port> {
        &self.outputs
    }

    pub fn control_inputs(&self) -> &BTreeMap<String, Port> {
        &self.control_inputs
    }

    pub fn control_outputs(&self) -> &BTreeMap<String, Port> {
        &self.control_outputs
    }

    /// Every top-level port: exec in, data inputs, control inputs, exec out,
    /// data outputs, control outputs.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        std::iter::once(&self.in_exec)
            .chain(self.inputs.values())
            .chain(self.control_inputs.values())
            .chain(std::iter::once(&self.out_exec))
            .chain(self.outputs.values())
            .chain(self.control_outputs.values())
    }

    fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        std::iter::once(&mut self.in_exec)
            .chain(self.inputs.values_mut())
            .chain(self.control_inputs.values_mut())
            .chain(std::iter::once(&mut self.out_exec))
            .chain(self.outputs.values_mut())
            .chain(self.control_outputs.values_mut())
    }

    /// Ids of every port this node owns, container children included.
    pub fn port_ids(&self) -> Vec<PortId> {
        self.ports().flat_map(Port::tree_ids).collect()
    }

    /// Ids of the ports that gate readiness: exec in and data inputs.
    pub fn trigger_port_ids(&self) -> Vec<PortId> {
        std::iter::once(&self.in_exec)
            .chain(self.inputs.values())
            .flat_map(Port::tree_ids)
            .collect()
    }

    /// Ids of every output-side port, container children included.
    pub fn output_port_ids(&self) -> Vec<PortId> {
        std::iter::once(&self.out_exec)
            .chain(self.outputs.values())
            .chain(self.control_outputs.values())
            .flat_map(Port::tree_ids)
            .collect()
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports().find_map(|port| port.find(id))
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports_mut().find_map(|port| port.find_mut(id))
    }

    /// Write into any port this node owns, element ports included.
    pub fn write_port(
        &mut self,
        id: PortId,
        value: Value,
    ) -> Option<Result<Value, ConversionError>> {
        let port = self.ports_mut().find(|port| port.find(id).is_some())?;
        port.write_at(id, value)
    }

    pub(crate) fn port_by_key_mut(&mut self, key: &PortKey) -> Option<&mut Port> {
        match key {
            PortKey::InExec => Some(&mut self.in_exec),
            PortKey::OutExec => Some(&mut self.out_exec),
            PortKey::Input(name) => self.inputs.get_mut(name),
            PortKey::Output(name) => self.outputs.get_mut(name),
            PortKey::ControlInput(name) => self.control_inputs.get_mut(name),
            PortKey::ControlOutput(name) => self.control_outputs.get_mut(name),
        }
    }

    pub(crate) fn port_keys(&self) -> Vec<(PortKey, &Port)> {
        let mut keys = vec![(PortKey::InExec, &self.in_exec), (PortKey::OutExec, &self.out_exec)];
        keys.extend(self.inputs.iter().map(|(n, p)| (PortKey::Input(n.clone()), p)));
        keys.extend(self.outputs.iter().map(|(n, p)| (PortKey::Output(n.clone()), p)));
        keys.extend(self.control_inputs.iter().map(|(n, p)| (PortKey::ControlInput(n.clone()), p)));
        keys.extend(self.control_outputs.iter().map(|(n, p)| (PortKey::ControlOutput(n.clone()), p)));
        keys
    }

    /// Readiness given the subset of this node's input ports that have
    /// incoming edges.
    pub fn is_ready_to_activate(&self, connected_input_ids: &HashSet<PortId>) -> Readiness {
        if self.is_disabled() {
            return Readiness::NotReady;
        }
        if self.behavior.has_pending_work() {
            return Readiness::Ready;
        }
        let connected: Vec<&Port> = self
            .trigger_ports()
            .filter(|port| connected_input_ids.contains(&port.id()))
            .collect();
        if connected.is_empty() {
            return Readiness::Ready;
        }
        match self.behavior.readiness_policy() {
            ReadinessPolicy::AllConnected => {
                if connected.iter().all(|port| port.has_data()) {
                    Readiness::Ready
                } else {
                    Readiness::NotReadyUntilAllPortsFilled
                }
            }
            ReadinessPolicy::AnyConnected => {
                if connected.iter().any(|port| port.has_data()) {
                    Readiness::Ready
                } else {
                    Readiness::NotReadyUntilAnyPortsFilled
                }
            }
        }
    }

    fn trigger_ports(&self) -> impl Iterator<Item = &Port> {
        fn walk<'a>(port: &'a Port, out: &mut Vec<&'a Port>) {
            out.push(port);
            for child in port.children().values() {
                walk(child, out);
            }
        }
        let mut ports = Vec::new();
        walk(&self.in_exec, &mut ports);
        for port in self.inputs.values() {
            walk(port, &mut ports);
        }
        ports.into_iter()
    }

    /// Collect inputs and control signals and mark the node as executing.
    pub fn prepare_activation(&mut self) -> PreparedActivation {
        self.status = ExecutionStatus::Executing;
        self.last_error = None;
        let inputs = self
            .inputs
            .iter_mut()
            .map(|(name, port)| (name.clone(), port.read()))
            .collect();
        self.in_exec.read();
        let controls = self
            .control_inputs
            .iter()
            .map(|(name, port)| (name.clone(), port.peek().clone()))
            .collect();
        PreparedActivation {
            behavior: Arc::clone(&self.behavior),
            inputs,
            controls,
        }
    }

    /// Write the behavior's result into the output ports and settle the
    /// node's status.
    pub fn complete_activation(
        &mut self,
        result: Result<NodeOutput, NodeError>,
    ) -> Result<(), NodeError> {
        match result.and_then(|output| self.write_outputs(output)) {
            Ok(()) => {
                self.status = ExecutionStatus::Success;
                Ok(())
            }
            Err(e) => {
                self.status = ExecutionStatus::Failed;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn write_outputs(&mut self, output: NodeOutput) -> Result<(), NodeError> {
        for (name, value) in output.outputs {
            let port = self
                .outputs
                .get_mut(&name)
                .ok_or_else(|| NodeError::UnknownPort(name.clone()))?;
            port.write(value)
                .map_err(|source| NodeError::Conversion { port: name, source })?;
        }
        for (name, value) in output.controls {
            let port = self
                .control_outputs
                .get_mut(&name)
                .ok_or_else(|| NodeError::UnknownPort(name.clone()))?;
            port.write(value)
                .map_err(|source| NodeError::Conversion { port: name, source })?;
        }
        let _ = self.out_exec.write(Value::Null);
        Ok(())
    }

    /// Run the full activation protocol in place.
    pub async fn activate(&mut self, ctx: ActivationContext) -> Result<(), NodeError> {
        let prepared = self.prepare_activation();
        let result = prepared
            .behavior
            .activate_core(ctx, prepared.inputs, prepared.controls)
            .await;
        self.complete_activation(result)
    }

    /// Forget consumed inputs so they are not replayed next iteration.
    /// Control inputs keep their signal.
    pub fn clear_inputs(&mut self) {
        self.in_exec.clear();
        for port in self.inputs.values_mut() {
            port.clear();
        }
    }

    pub fn reset_status(&mut self) {
        self.status = ExecutionStatus::Idle;
        self.last_error = None;
    }

    pub(crate) fn set_port_type(
        &mut self,
        port_id: PortId,
        data_type: DataType,
    ) -> Option<()> {
        self.port_mut(port_id).map(|port| port.set_data_type(data_type))
    }
}

/// Where a top-level port lives inside its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PortKey {
    InExec,
    OutExec,
    Input(String),
    Output(String),
    ControlInput(String),
    ControlOutput(String),
}
