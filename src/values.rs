//! Scalar values which form a computation graph
use std::{
    collections::HashMap,
    fmt::{self, Debug, Display},
    ops::{Add, Div, Mul, Neg, Sub},
};

use thiserror::Error;

use crate::{
    backprop_fns::{BackpropFunc, Upstream},
    graph::{Graph, NodeId, Trace},
};

/// Errors raised by operations on values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unsupported exponent {exponent}, only finite real exponents are supported")]
    UnsupportedExponent { exponent: f64 },
    #[error("Value {id} is derived from other values, only leaf values can be assigned")]
    NotALeaf { id: NodeId },
}

/// Handle to a scalar node in a computation graph
///
/// Cheap to clone, clones refer to the same node. Operands of a binary operation must live in the
/// same [`Graph`], combining values of two graphs panics.
#[derive(Clone)]
pub struct Value {
    graph: Graph,
    id: NodeId,
}

impl Value {
    pub(crate) fn from_parts(graph: Graph, id: NodeId) -> Self {
        Self { graph, id }
    }

    /// Create a new value derived from an operation on `operands` (i.e. not a leaf node)
    fn new_derived(&self, data: f64, backprop_fn: BackpropFunc, operands: &[&Value]) -> Value {
        for operand in operands {
            assert!(
                self.graph.same_graph(&operand.graph),
                "operands of {} belong to different graphs",
                backprop_fn
            );
        }
        self.graph.push(
            data,
            Some(backprop_fn),
            operands.iter().map(|o| o.id).collect(),
        )
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn data(&self) -> f64 {
        self.graph.tape().node(self.id).data
    }

    pub fn grad(&self) -> f64 {
        self.graph.tape().node(self.id).grad
    }

    /// The operation which produced this value, `None` for leaves
    pub fn op(&self) -> Option<BackpropFunc> {
        self.graph.tape().node(self.id).op
    }

    pub fn label(&self) -> String {
        self.graph.tape().node(self.id).label.clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.graph.tape_mut().node_mut(self.id).label = label.into();
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.set_label(label);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.op().is_none()
    }

    /// Direct inputs of the operation which produced this value
    pub fn operands(&self) -> Vec<Value> {
        self.graph
            .tape()
            .node(self.id)
            .operands
            .iter()
            .map(|o| Value::from_parts(self.graph.clone(), *o))
            .collect()
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    /// Replaces the data of a leaf value, e.g. a parameter during an optimizer step
    pub fn set_data(&mut self, data: f64) -> Result<(), EngineError> {
        let mut tape = self.graph.tape_mut();
        let node = tape.node_mut(self.id);
        if node.op.is_some() {
            return Err(EngineError::NotALeaf { id: self.id });
        }
        node.data = data;
        Ok(())
    }

    /// Zeros the gradient of this node only
    pub fn reset_grad(&mut self) {
        self.graph.tape_mut().node_mut(self.id).grad = 0.0;
    }

    /// Unlike PyTorch which only zeros out the gradients of the leaf nodes, this zeros out
    /// all gradients in the computation graph reachable from this node
    pub fn zero_grad(&mut self) {
        let mut tape = self.graph.tape_mut();
        for id in tape.topo_order(self.id) {
            tape.node_mut(id).grad = 0.0;
        }
    }

    /// Accumulates d self / d node into the gradient of every node reachable from `self`.
    ///
    /// Gradients of the pass are computed separately and then added to the stored gradients, so
    /// calling this twice without zeroing doubles every gradient.
    pub fn backward(&self) {
        let mut tape = self.graph.tape_mut();
        let backprop_order = tape.topo_order(self.id);

        // only reachable nodes get an entry
        let mut pass: HashMap<NodeId, f64> = HashMap::with_capacity(backprop_order.len());
        // d out / d out = 1
        pass.insert(self.id, 1.0);

        // apply backprop, reversed to start from root first
        for id in backprop_order.iter().rev() {
            let node = tape.node(*id);
            let Some(backprop_fn) = node.op else {
                continue;
            };
            let mut inputs = [0.0; 2];
            for (input, operand) in inputs.iter_mut().zip(&node.operands) {
                *input = tape.node(*operand).data;
            }
            let out = Upstream {
                data: node.data,
                grad: pass.get(id).copied().unwrap_or(0.0),
            };
            let grads = backprop_fn.local_grads(&inputs[..node.operands.len()], out);
            for (operand, grad) in node.operands.iter().zip(grads) {
                *pass.entry(*operand).or_insert(0.0) += grad;
            }
        }

        for id in backprop_order.iter() {
            tape.node_mut(*id).grad += pass.get(id).copied().unwrap_or(0.0);
        }
        log::debug!(
            "backward from {} visited {} nodes",
            self.id,
            backprop_order.len()
        );
    }

    /// Nodes and `(operand, consumer)` edges reachable from this value
    pub fn trace(&self) -> Trace {
        Trace::from_root(&self.graph.tape(), self.id)
    }
}

// Various operations on values
impl Value {
    /// Raises the value to a constant power
    pub fn pow(&self, exponent: f64) -> Result<Value, EngineError> {
        if !exponent.is_finite() {
            return Err(EngineError::UnsupportedExponent { exponent });
        }
        Ok(self.powf(exponent))
    }

    fn powf(&self, exponent: f64) -> Value {
        self.new_derived(
            self.data().powf(exponent),
            BackpropFunc::Pow(exponent),
            &[self],
        )
    }

    pub fn relu(&self) -> Value {
        self.new_derived(self.data().max(0.0), BackpropFunc::ReLU, &[self])
    }

    pub fn tanh(&self) -> Value {
        self.new_derived(self.data().tanh(), BackpropFunc::Tanh, &[self])
    }

    pub fn exp(&self) -> Value {
        self.new_derived(self.data().exp(), BackpropFunc::Exp, &[self])
    }
}

// one line per reachable node, operands first and shared nodes only once
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tape = self.graph.tape();
        for id in tape.topo_order(self.id) {
            let node = tape.node(id);
            write!(f, "{}", id)?;
            if !node.label.is_empty() {
                write!(f, " {:?}", node.label)?;
            }
            if let Some(op) = node.op {
                write!(f, " = {}(", op)?;
                for (i, operand) in node.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")?;
            }
            writeln!(f, " data {} grad {}", node.data, node.grad)?;
        }
        Ok(())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("id", &self.id)
            .field("data", &self.data())
            .field("grad", &self.grad())
            .field("op", &self.op())
            .finish()
    }
}

impl Add for &Value {
    type Output = Value;

    fn add(self, other: &Value) -> Value {
        self.new_derived(self.data() + other.data(), BackpropFunc::Add, &[self, other])
    }
}

impl Mul for &Value {
    type Output = Value;

    fn mul(self, other: &Value) -> Value {
        self.new_derived(self.data() * other.data(), BackpropFunc::Mul, &[self, other])
    }
}

impl Neg for &Value {
    type Output = Value;

    fn neg(self) -> Value {
        self * -1.0
    }
}

impl Neg for Value {
    type Output = Value;

    fn neg(self) -> Value {
        -&self
    }
}

impl Sub for &Value {
    type Output = Value;

    fn sub(self, other: &Value) -> Value {
        self + &(-other)
    }
}

impl Div for &Value {
    type Output = Value;

    fn div(self, other: &Value) -> Value {
        self * &other.powf(-1.0)
    }
}

/// Implements the remaining owned/borrowed combinations of an operator on top of
/// `&Value op &Value`, raw `f64` operands are promoted to leaves in the graph of the other operand
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt) => {
        impl $trait for Value {
            type Output = Value;

            fn $trait_method(self, other: Value) -> Value {
                &self $operator &other
            }
        }

        impl $trait<&Value> for Value {
            type Output = Value;

            fn $trait_method(self, other: &Value) -> Value {
                &self $operator other
            }
        }

        impl $trait<Value> for &Value {
            type Output = Value;

            fn $trait_method(self, other: Value) -> Value {
                self $operator &other
            }
        }

        impl $trait<f64> for &Value {
            type Output = Value;

            fn $trait_method(self, other: f64) -> Value {
                self $operator &self.graph.leaf(other)
            }
        }

        impl $trait<f64> for Value {
            type Output = Value;

            fn $trait_method(self, other: f64) -> Value {
                &self $operator other
            }
        }

        impl $trait<&Value> for f64 {
            type Output = Value;

            fn $trait_method(self, other: &Value) -> Value {
                &other.graph.leaf(self) $operator other
            }
        }

        impl $trait<Value> for f64 {
            type Output = Value;

            fn $trait_method(self, other: Value) -> Value {
                self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +);
impl_arithmetic!(Sub, sub, -);
impl_arithmetic!(Mul, mul, *);
impl_arithmetic!(Div, div, /);

// unfortunate that there isn't a blanket impl for AsRef<T> for T
// <https://doc.rust-lang.org/std/convert/trait.AsRef.html#reflexivity>
impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}
