use crate::{
    ConversionError, DataType, GraphError, Node, NodeId, Port, PortDirection, PortId, Value,
};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Directed connection from an output-side port to an input-side port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from_port_id: PortId,
    pub to_port_id: PortId,
}

impl Edge {
    pub fn new(from_port_id: PortId, to_port_id: PortId) -> Self {
        Self {
            from_port_id,
            to_port_id,
        }
    }
}

/// Nodes plus the edges between their ports.
///
/// Keeps a port→node index and per-port adjacency lists so every
/// connectivity query is a lookup, never a scan over the whole graph.
#[derive(Default)]
pub struct Graph {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
    port_owner: HashMap<PortId, NodeId>,
    out_edges: HashMap<PortId, Vec<PortId>>,
    in_edges: HashMap<PortId, Vec<PortId>>,
    incompatible_edges: HashSet<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        for port_id in node.port_ids() {
            self.port_owner.insert(port_id, id);
        }
        self.order.push(id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let port_ids: HashSet<PortId> = node.port_ids().into_iter().collect();
        let touching: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| port_ids.contains(&e.from_port_id) || port_ids.contains(&e.to_port_id))
            .copied()
            .collect();
        for edge in touching {
            self.unlink(edge);
        }
        self.port_owner.retain(|_, owner| *owner != id);
        self.order.retain(|n| *n != id);
        self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Node ids in insertion order, which is also the executor's scan order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn incompatible_edges(&self) -> &HashSet<Edge> {
        &self.incompatible_edges
    }

    pub fn is_edge_valid(&self, edge: &Edge) -> bool {
        self.edge_set.contains(edge) && !self.incompatible_edges.contains(edge)
    }

    pub fn owner_of(&self, port_id: PortId) -> Option<NodeId> {
        self.port_owner.get(&port_id).copied()
    }

    pub fn port(&self, port_id: PortId) -> Option<&Port> {
        let owner = self.owner_of(port_id)?;
        self.nodes.get(&owner)?.port(port_id)
    }

    /// Whether a value may flow from `from` into `to`.
    pub fn can_connect(&self, from: &Port, to: &Port) -> bool {
        from.can_connect(to)
    }

    /// Connect two ports. On rejection the graph is left untouched.
    pub fn add_edge(&mut self, from: PortId, to: PortId) -> Result<Edge, GraphError> {
        let from_port = self.port(from).ok_or(GraphError::PortNotFound(from))?;
        let to_port = self.port(to).ok_or(GraphError::PortNotFound(to))?;
        if from_port.direction() != PortDirection::Output
            || to_port.direction() != PortDirection::Input
        {
            return Err(GraphError::InvalidDirection { from, to });
        }
        if !self.can_connect(from_port, to_port) {
            return Err(GraphError::IncompatibleEdge {
                from,
                to,
                from_type: from_port.data_type(),
                to_type: to_port.data_type(),
            });
        }
        let edge = Edge::new(from, to);
        if self.edge_set.contains(&edge) {
            return Err(GraphError::DuplicateEdge { from, to });
        }
        self.link(edge);
        tracing::debug!(%from, %to, "edge added");
        Ok(edge)
    }

    pub fn remove_edge(&mut self, from: PortId, to: PortId) -> bool {
        let edge = Edge::new(from, to);
        if !self.edge_set.contains(&edge) {
            return false;
        }
        self.unlink(edge);
        true
    }

    fn link(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.edge_set.insert(edge);
        self.out_edges
            .entry(edge.from_port_id)
            .or_default()
            .push(edge.to_port_id);
        self.in_edges
            .entry(edge.to_port_id)
            .or_default()
            .push(edge.from_port_id);
    }

    pub(crate) fn link_flagged(&mut self, edge: Edge) {
        self.link(edge);
        self.incompatible_edges.insert(edge);
    }

    fn unlink(&mut self, edge: Edge) {
        self.edges.retain(|e| *e != edge);
        self.edge_set.remove(&edge);
        self.incompatible_edges.remove(&edge);
        if let Some(targets) = self.out_edges.get_mut(&edge.from_port_id) {
            targets.retain(|p| *p != edge.to_port_id);
            if targets.is_empty() {
                self.out_edges.remove(&edge.from_port_id);
            }
        }
        if let Some(sources) = self.in_edges.get_mut(&edge.to_port_id) {
            sources.retain(|p| *p != edge.from_port_id);
            if sources.is_empty() {
                self.in_edges.remove(&edge.to_port_id);
            }
        }
    }

    /// Ports this port feeds.
    pub fn outgoing(&self, port_id: PortId) -> &[PortId] {
        self.out_edges.get(&port_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ports feeding this port.
    pub fn incoming(&self, port_id: PortId) -> &[PortId] {
        self.in_edges.get(&port_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every port connected to `port_id` in either direction.
    pub fn connected_ports(&self, port_id: PortId) -> Vec<PortId> {
        self.incoming(port_id)
            .iter()
            .chain(self.outgoing(port_id))
            .copied()
            .collect()
    }

    pub fn upstream_nodes(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        self.neighbours(node.port_ids(), |port| self.incoming(port))
    }

    pub fn downstream_nodes(&self, node_id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Vec::new();
        };
        self.neighbours(node.port_ids(), |port| self.outgoing(port))
    }

    fn neighbours<'a>(
        &'a self,
        ports: Vec<PortId>,
        adjacent: impl Fn(PortId) -> &'a [PortId],
    ) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        ports
            .into_iter()
            .flat_map(|port| adjacent(port).iter())
            .filter_map(|port| self.owner_of(*port))
            .filter(|owner| seen.insert(*owner))
            .collect()
    }

    /// Input ports of `node_id` that gate readiness and have an incoming edge.
    pub fn connected_input_ids(&self, node_id: NodeId) -> HashSet<PortId> {
        self.nodes
            .get(&node_id)
            .map(|node| {
                node.trigger_port_ids()
                    .into_iter()
                    .filter(|port| self.in_edges.contains_key(port))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Re-validate every edge touching `node_id`, updating the incompatible
    /// marker set. Returns the edges currently flagged. Edges are never
    /// removed here.
    pub fn check_node_edges_compatibility(&mut self, node_id: NodeId) -> Result<Vec<Edge>, GraphError> {
        let node = self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let mut touching: Vec<Edge> = Vec::new();
        for port in node.port_ids() {
            touching.extend(self.outgoing(port).iter().map(|to| Edge::new(port, *to)));
            touching.extend(self.incoming(port).iter().map(|from| Edge::new(*from, port)));
        }
        // Edges whose endpoint vanished with a container child are no longer
        // reachable through the node's ports.
        touching.extend(self.edges.iter().copied().filter(|e| {
            self.port(e.from_port_id).is_none() || self.port(e.to_port_id).is_none()
        }));

        let mut flagged = Vec::new();
        for edge in touching {
            let valid = match (self.port(edge.from_port_id), self.port(edge.to_port_id)) {
                (Some(from), Some(to)) => from.can_connect(to),
                _ => false,
            };
            if valid {
                self.incompatible_edges.remove(&edge);
            } else {
                if self.incompatible_edges.insert(edge) {
                    tracing::warn!(
                        from = %edge.from_port_id,
                        to = %edge.to_port_id,
                        "edge flagged incompatible"
                    );
                }
                if !flagged.contains(&edge) {
                    flagged.push(edge);
                }
            }
        }
        Ok(flagged)
    }

    /// Change a port's declared type and re-validate the owner's edges.
    pub fn set_port_type(
        &mut self,
        port_id: PortId,
        data_type: DataType,
    ) -> Result<Vec<Edge>, GraphError> {
        let owner = self.owner_of(port_id).ok_or(GraphError::PortNotFound(port_id))?;
        self.nodes
            .get_mut(&owner)
            .and_then(|node| node.set_port_type(port_id, data_type))
            .ok_or(GraphError::PortNotFound(port_id))?;
        self.reindex_ports(owner);
        self.check_node_edges_compatibility(owner)
    }

    /// Write through the graph, keeping the port index in step with any
    /// container children the write creates or drops. Writes into element
    /// ports are folded into their containers.
    pub fn write_port(&mut self, port_id: PortId, value: Value) -> Result<Value, GraphError> {
        let owner = self.owner_of(port_id).ok_or(GraphError::PortNotFound(port_id))?;
        let stored = self
            .nodes
            .get_mut(&owner)
            .and_then(|node| node.write_port(port_id, value))
            .ok_or(GraphError::PortNotFound(port_id))?
            .map_err(|source: ConversionError| GraphError::Write { port: port_id, source })?;
        self.reindex_ports(owner);
        Ok(stored)
    }

    /// Refresh the port index entries of one node.
    pub fn reindex_ports(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let current = node.port_ids();
        self.port_owner.retain(|_, owner| *owner != node_id);
        for port_id in current {
            self.port_owner.insert(port_id, node_id);
        }
    }

    /// Groups of direct-through nodes that feed each other in a loop.
    ///
    /// Propagation through such a group never settles on its own; the
    /// executor caps the recursion depth, this reports the culprits up front.
    pub fn find_relay_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut relays: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        for node in self.nodes().filter(|n| n.is_direct_through()) {
            index.insert(node.id(), relays.add_node(node.id()));
        }
        let mut self_loops = HashSet::new();
        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.owner_of(edge.from_port_id), self.owner_of(edge.to_port_id)) else {
                continue;
            };
            if let (Some(a), Some(b)) = (index.get(&from), index.get(&to)) {
                relays.update_edge(*a, *b, ());
                if from == to {
                    self_loops.insert(from);
                }
            }
        }
        tarjan_scc(&relays)
            .into_iter()
            .map(|component| {
                component
                    .into_iter()
                    .map(|idx| relays[idx])
                    .collect::<Vec<NodeId>>()
            })
            .filter(|ids| ids.len() > 1 || ids.first().is_some_and(|id| self_loops.contains(id)))
            .collect()
    }
}
