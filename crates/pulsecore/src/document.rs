//! Plain-document form of a graph, the only persistence boundary.

use crate::node::PortKey;
use crate::{ConversionError, DataType, Edge, Graph, GraphError, Node, NodeConfig, NodeId, Port, PortId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolves a node type id to a fresh node instance.
pub trait NodeResolver {
    fn construct(
        &self,
        type_id: &str,
        id: NodeId,
        label: &str,
        context: &NodeConfig,
    ) -> Result<Node, GraphError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeDocument>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDocument {
    pub id: NodeId,
    pub type_id: String,
    pub label: String,
    #[serde(default)]
    pub context: NodeConfig,
    #[serde(default)]
    pub ports: NodePortsDocument,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePortsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_exec: Option<PortDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_exec: Option<PortDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, PortDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, PortDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub control_inputs: BTreeMap<String, PortDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub control_outputs: BTreeMap<String, PortDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDocument {
    pub id: PortId,
    pub data_type: DataType,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, PortDocument>>,
}

impl PortDocument {
    pub fn from_port(port: &Port) -> Self {
        let children = (!port.children().is_empty()).then(|| {
            port.children()
                .iter()
                .map(|(key, child)| (key.clone(), PortDocument::from_port(child)))
                .collect()
        });
        Self {
            id: port.id(),
            data_type: port.data_type(),
            data: port.peek().clone(),
            children,
        }
    }

    fn apply(&self, port: &mut Port) -> Result<(), GraphError> {
        let invalid = |e: ConversionError| {
            GraphError::InvalidDocument(format!("port {}: {}", self.id, e))
        };
        let children = self.child_ports(port).map_err(invalid)?;
        port.restore(self.id, self.data_type, self.data.clone(), children)
            .map_err(invalid)
    }

    fn child_ports(&self, parent: &Port) -> Result<Vec<(String, Port)>, ConversionError> {
        self.children
            .iter()
            .flatten()
            .map(|(key, doc)| {
                let grandchildren = doc.child_ports(parent)?;
                let child = parent.restored_child(
                    key,
                    doc.id,
                    doc.data_type,
                    doc.data.clone(),
                    grandchildren,
                )?;
                Ok((key.clone(), child))
            })
            .collect()
    }
}

impl NodeDocument {
    pub fn from_node(node: &Node) -> Self {
        let mut ports = NodePortsDocument::default();
        for (key, port) in node.port_keys() {
            let doc = PortDocument::from_port(port);
            match key {
                PortKey::InExec => ports.in_exec = Some(doc),
                PortKey::OutExec => ports.out_exec = Some(doc),
                PortKey::Input(name) => {
                    ports.inputs.insert(name, doc);
                }
                PortKey::Output(name) => {
                    ports.outputs.insert(name, doc);
                }
                PortKey::ControlInput(name) => {
                    ports.control_inputs.insert(name, doc);
                }
                PortKey::ControlOutput(name) => {
                    ports.control_outputs.insert(name, doc);
                }
            }
        }
        Self {
            id: node.id(),
            type_id: node.type_id().to_string(),
            label: node.label().to_string(),
            context: node.context().clone(),
            ports,
        }
    }

    fn keyed_ports(&self) -> Vec<(PortKey, &PortDocument)> {
        let p = &self.ports;
        let mut keyed = Vec::new();
        keyed.extend(p.in_exec.iter().map(|d| (PortKey::InExec, d)));
        keyed.extend(p.out_exec.iter().map(|d| (PortKey::OutExec, d)));
        keyed.extend(p.inputs.iter().map(|(n, d)| (PortKey::Input(n.clone()), d)));
        keyed.extend(p.outputs.iter().map(|(n, d)| (PortKey::Output(n.clone()), d)));
        keyed.extend(p.control_inputs.iter().map(|(n, d)| (PortKey::ControlInput(n.clone()), d)));
        keyed.extend(p.control_outputs.iter().map(|(n, d)| (PortKey::ControlOutput(n.clone()), d)));
        keyed
    }
}

impl Graph {
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes().map(NodeDocument::from_node).collect(),
            edges: self.edges().to_vec(),
        }
    }

    /// Rebuild a graph, constructing each node through `resolver` and then
    /// restoring port ids, types and values from the document.
    pub fn from_document(
        document: &GraphDocument,
        resolver: &dyn NodeResolver,
    ) -> Result<Graph, GraphError> {
        let mut graph = Graph::new();
        for doc in &document.nodes {
            let mut node = resolver.construct(&doc.type_id, doc.id, &doc.label, &doc.context)?;
            for (key, port_doc) in doc.keyed_ports() {
                match node.port_by_key_mut(&key) {
                    Some(port) => port_doc.apply(port)?,
                    None => tracing::warn!(
                        node = %doc.id,
                        port = ?key,
                        "document port not declared by node type, skipped"
                    ),
                }
            }
            graph.add_node(node)?;
        }
        for edge in &document.edges {
            match graph.add_edge(edge.from_port_id, edge.to_port_id) {
                Ok(_) => {}
                // Saved while flagged; keep it flagged rather than lose it.
                Err(GraphError::IncompatibleEdge { .. }) => graph.link_flagged(*edge),
                Err(e) => {
                    return Err(GraphError::InvalidDocument(format!("edge rejected: {e}")));
                }
            }
        }
        Ok(graph)
    }
}
