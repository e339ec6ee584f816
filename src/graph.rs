//! Arena of scalar nodes forming a computation graph
//!
//! Nodes are stored in an append-only vector and refer to their operands by [`NodeId`]. Since a
//! node can only be created from nodes that already exist, every operand has a smaller id than its
//! consumer and the graph can never contain a cycle.
use std::{
    cell::{Ref, RefCell, RefMut},
    collections::HashSet,
    fmt::{self, Debug, Display},
    rc::Rc,
};

use serde::{Serialize, Serializer};

use crate::{backprop_fns::BackpropFunc, values::Value};

/// Stable handle of a node inside its [`Graph`]
///
/// The generation tells apart nodes which reuse a slot after [`Graph::truncate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

impl NodeId {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

// only the slot is meaningful outside of the process
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.index as u64)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) data: f64,
    /// gradient of the root of a backward pass with respect to this node
    pub(crate) grad: f64,
    /// List of the node inputs in the forward pass
    pub(crate) operands: Vec<NodeId>,
    /// The function which created this value from its operands
    /// `None` when the value is a leaf node
    pub(crate) op: Option<BackpropFunc>,
    pub(crate) label: String,
    generation: u32,
}

impl Node {
    fn new(data: f64, op: Option<BackpropFunc>, operands: Vec<NodeId>) -> Self {
        Self {
            data,
            grad: 0.0,
            operands,
            op,
            label: String::new(),
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Tape {
    nodes: Vec<Node>,
    /// bumped by every truncation, stamped on the nodes pushed afterwards
    generation: u32,
}

impl Tape {
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.index)
            .is_some_and(|node| node.generation == id.generation)
    }

    /// Panics if `id` was dropped by [`Graph::truncate`]
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        match self.nodes.get(id.index) {
            Some(node) if node.generation == id.generation => node,
            _ => panic!("node {} was dropped by Graph::truncate", id),
        }
    }

    /// Panics if `id` was dropped by [`Graph::truncate`]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.index) {
            Some(node) if node.generation == id.generation => node,
            _ => panic!("node {} was dropped by Graph::truncate", id),
        }
    }

    fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId {
            index: self.nodes.len(),
            generation: self.generation,
        };
        node.generation = self.generation;
        debug_assert!(node.operands.iter().all(|o| o.index < id.index));
        debug_assert_eq!(node.op.is_none(), node.operands.is_empty());
        self.nodes.push(node);
        id
    }

    /// Orders the subgraph reachable from `root` so that every node comes after all of its
    /// operands (post order depth first search).
    ///
    /// Uses an explicit stack, so the depth of the graph is only limited by available memory.
    pub(crate) fn topo_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = vec![];
        let mut visited: HashSet<NodeId> = HashSet::new();
        // (node, operands already pushed)
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            // reversed so the first operand is ordered first
            for operand in self.node(id).operands.iter().rev() {
                if !visited.contains(operand) {
                    stack.push((*operand, false));
                }
            }
        }
        order
    }
}

/// Shared, append-only store of the nodes of one computation graph.
///
/// Cloning a `Graph` clones the handle; all clones see the same nodes. Every [`Value`] keeps a
/// handle to the graph it lives in.
#[derive(Clone, Default)]
pub struct Graph(Rc<RefCell<Tape>>);

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new value, not derived from any other values
    pub fn leaf(&self, data: f64) -> Value {
        self.push(data, None, vec![])
    }

    pub fn leaf_with_label(&self, data: f64, label: impl Into<String>) -> Value {
        let value = self.leaf(data);
        self.tape_mut().node_mut(value.id()).label = label.into();
        value
    }

    /// Wraps every scalar of `data` in a leaf node
    pub fn leaves(&self, data: &[f64]) -> Vec<Value> {
        data.iter().map(|d| self.leaf(*d)).collect()
    }

    /// Adds up all values, an empty iterator yields a leaf holding zero
    pub fn sum<I: IntoIterator<Item = Value>>(&self, values: I) -> Value {
        values
            .into_iter()
            .reduce(|acc, v| &acc + &v)
            .unwrap_or_else(|| self.leaf(0.0))
    }

    /// Arithmetic mean of the values, zero when empty
    pub fn mean(&self, values: Vec<Value>) -> Value {
        let n = values.len().max(1) as f64;
        &self.sum(values) / n
    }

    /// Returns a handle to an existing node
    pub fn get(&self, id: NodeId) -> Option<Value> {
        let contains = self.tape().contains(id);
        contains.then(|| Value::from_parts(self.clone(), id))
    }

    /// Number of nodes in the arena, usable as a mark for [`Graph::truncate`]
    pub fn len(&self) -> usize {
        self.tape().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every node created after `mark`.
    ///
    /// Nodes created before `mark` (typically model parameters) are kept with their gradients.
    /// Using a handle to a dropped node afterwards panics, even once new nodes took its slot.
    pub fn truncate(&self, mark: usize) {
        let mut tape = self.tape_mut();
        let before = tape.nodes.len();
        if mark >= before {
            return;
        }
        tape.nodes.truncate(mark);
        tape.generation = tape.generation.wrapping_add(1);
        log::trace!("truncated graph from {} to {} nodes", before, tape.nodes.len());
    }

    pub(crate) fn push(&self, data: f64, op: Option<BackpropFunc>, operands: Vec<NodeId>) -> Value {
        let id = self.tape_mut().push(Node::new(data, op, operands));
        Value::from_parts(self.clone(), id)
    }

    pub(crate) fn same_graph(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn tape(&self) -> Ref<'_, Tape> {
        self.0.borrow()
    }

    pub(crate) fn tape_mut(&self) -> RefMut<'_, Tape> {
        self.0.borrow_mut()
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph").field("len", &self.len()).finish()
    }
}

/// Nodes and edges reachable from a root, as returned by [`Value::trace`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Reachable nodes, operands before their consumers
    pub nodes: Vec<NodeId>,
    /// `(operand, consumer)` pairs
    pub edges: Vec<(NodeId, NodeId)>,
}

impl Trace {
    pub(crate) fn from_root(tape: &Tape, root: NodeId) -> Self {
        let nodes = tape.topo_order(root);
        let edges = nodes
            .iter()
            .flat_map(|id| tape.node(*id).operands.iter().map(move |o| (*o, *id)))
            .collect();
        Self { nodes, edges }
    }
}
