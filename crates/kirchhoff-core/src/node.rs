//! Circuit unknowns: voltage nodes and branch currents.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Unique identifier for a circuit unknown. Index 0 is ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The ground node (node 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Create a new NodeId from a raw value.
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    /// Get the raw node ID value.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into solution vectors and matrix rows.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Check if this is the ground node.
    pub fn is_ground(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// What a row of the system solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Node voltage; converges against `vntol`.
    Voltage,
    /// Branch current; converges against `abstol`.
    Current,
}

/// A circuit unknown.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    internal: bool,
    /// Initial guess for the first operating-point iteration.
    pub nodeset: Option<f64>,
    /// Initial condition used by transient analysis.
    pub ic: Option<f64>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for nodes created by a device during setup.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn is_ground(&self) -> bool {
        self.id.is_ground()
    }
}

/// Ordered table of circuit unknowns.
///
/// Numbers are assigned on creation and never reused while the table holds
/// the node. Internal nodes released by a device are only dropped once they
/// are at the tail, so numbers of surviving nodes stay stable.
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Vec<Option<Node>>,
    by_name: IndexMap<String, NodeId>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Create a table holding only ground (named "0").
    pub fn new() -> Self {
        let ground = Node {
            id: NodeId::GROUND,
            name: "0".to_string(),
            kind: NodeKind::Voltage,
            internal: false,
            nodeset: None,
            ic: None,
        };
        let mut by_name = IndexMap::new();
        by_name.insert("0".to_string(), NodeId::GROUND);
        Self {
            nodes: vec![Some(ground)],
            by_name,
        }
    }

    /// Find or create a voltage node. "0" and "gnd" name ground.
    pub fn node(&mut self, name: &str) -> NodeId {
        if name == "0" || name.eq_ignore_ascii_case("gnd") {
            return NodeId::GROUND;
        }
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        self.push(name.to_string(), NodeKind::Voltage, false)
    }

    /// Create the branch-current unknown for a device (`name#branch`).
    pub fn branch(&mut self, device: &str) -> Result<NodeId> {
        let name = format!("{device}#branch");
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateNode(name));
        }
        Ok(self.push(name, NodeKind::Current, true))
    }

    /// Create a device-internal voltage node (`device#suffix`).
    pub fn internal(&mut self, device: &str, suffix: &str) -> Result<NodeId> {
        let name = format!("{device}#{suffix}");
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateNode(name));
        }
        Ok(self.push(name, NodeKind::Voltage, true))
    }

    fn push(&mut self, name: String, kind: NodeKind, internal: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.nodes.push(Some(Node {
            id,
            name,
            kind,
            internal,
            nodeset: None,
            ic: None,
        }));
        id
    }

    /// Release an internal node created during setup.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(id.index())
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        match slot.take() {
            Some(node) if node.internal => {
                self.by_name.shift_remove(&node.name);
            }
            Some(node) => {
                let name = node.name.clone();
                *slot = Some(node);
                return Err(Error::InvalidCircuit(format!(
                    "node {name} is not device-internal"
                )));
            }
            None => return Err(Error::NodeNotFound(id.to_string())),
        }
        while matches!(self.nodes.last(), Some(None)) {
            self.nodes.pop();
        }
        Ok(())
    }

    /// Look up a node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        if name.eq_ignore_ascii_case("gnd") {
            return Some(NodeId::GROUND);
        }
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(|n| n.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(|n| n.as_mut())
    }

    /// Name of a node, or "?" for released slots.
    pub fn name(&self, id: NodeId) -> &str {
        self.get(id).map(Node::name).unwrap_or("?")
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.get(id).map(Node::kind).unwrap_or(NodeKind::Voltage)
    }

    /// Number of slots including ground; solution vectors use this length.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Number of unknowns solved for (everything but ground).
    pub fn num_unknowns(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Iterate over live nodes, ground first.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    /// Set a `.NODESET` guess for a named node.
    pub fn set_nodeset(&mut self, name: &str, value: f64) -> Result<()> {
        let id = self
            .find(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        if let Some(node) = self.get_mut(id) {
            node.nodeset = Some(value);
        }
        Ok(())
    }

    /// Set a `.IC` initial condition for a named node.
    pub fn set_ic(&mut self, name: &str, value: f64) -> Result<()> {
        let id = self
            .find(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        if let Some(node) = self.get_mut(id) {
            node.ic = Some(value);
        }
        Ok(())
    }
}
