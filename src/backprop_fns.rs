//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph. Subtraction, division and negation are composed from
//! these primitives, so they have no rule of their own.

use std::fmt::{self, Display};

use serde::Serialize;

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum BackpropFunc {
    Add,
    Mul,
    /// Power with a constant exponent, the exponent is not a node
    Pow(f64),
    ReLU,
    Tanh,
    Exp,
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add => 2,
            BackpropFunc::Mul => 2,
            BackpropFunc::Pow(_) => 1,
            BackpropFunc::ReLU => 1,
            BackpropFunc::Tanh => 1,
            BackpropFunc::Exp => 1,
        }
    }

    /// Maps the operation tag to its gradient formula.
    ///
    /// `inputs` holds the forward values of the operands (one or two, see [`Self::n_operands`]).
    /// Returns the contribution for each operand; unused slots are zero.
    pub fn local_grads(&self, inputs: &[f64], out: Upstream) -> [f64; 2] {
        debug_assert_eq!(inputs.len(), self.n_operands());
        match *self {
            BackpropFunc::Add => add(out),
            BackpropFunc::Mul => mul(inputs[0], inputs[1], out),
            BackpropFunc::Pow(exponent) => [pow(inputs[0], exponent, out), 0.0],
            BackpropFunc::ReLU => [relu(out), 0.0],
            BackpropFunc::Tanh => [tanh(out), 0.0],
            BackpropFunc::Exp => [exp(out), 0.0],
        }
    }
}

impl Display for BackpropFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpropFunc::Add => write!(f, "+"),
            BackpropFunc::Mul => write!(f, "*"),
            BackpropFunc::Pow(exponent) => write!(f, "**{}", exponent),
            BackpropFunc::ReLU => write!(f, "ReLU"),
            BackpropFunc::Tanh => write!(f, "tanh"),
            BackpropFunc::Exp => write!(f, "exp"),
        }
    }
}

/// Forward value and gradient of the node whose rule is being applied
#[derive(Debug, Clone, Copy)]
pub struct Upstream {
    pub data: f64,
    pub grad: f64,
}

/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(out: Upstream) -> [f64; 2] {
    [out.grad, out.grad]
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: f64, in2: f64, out: Upstream) -> [f64; 2] {
    [in2 * out.grad, in1 * out.grad]
}

/// Represents backprop for the operation `in^exponent = out`
/// only support numerical float powers, so no gradient flows to the exponent
pub fn pow(in1: f64, exponent: f64, out: Upstream) -> f64 {
    exponent * in1.powf(exponent - 1.0) * out.grad
}

/// Represents backprop for the operation `relu(in) = out`
pub fn relu(out: Upstream) -> f64 {
    if out.data > 0.0 { out.grad } else { 0.0 }
}

/// Represents backprop for the operation `tanh(in) = out`
pub fn tanh(out: Upstream) -> f64 {
    (1.0 - out.data * out.data) * out.grad
}

/// Represents backprop for the operation `exp(in) = out`
pub fn exp(out: Upstream) -> f64 {
    out.data * out.grad // exp(in) is its own derivative
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: Upstream = Upstream {
        data: 0.0,
        grad: 1.0,
    };

    #[test]
    fn test_arity() {
        assert_eq!(BackpropFunc::Add.n_operands(), 2);
        assert_eq!(BackpropFunc::Mul.n_operands(), 2);
        assert_eq!(BackpropFunc::Pow(3.0).n_operands(), 1);
        assert_eq!(BackpropFunc::Tanh.n_operands(), 1);
    }

    #[test]
    fn test_mul_swaps_operands() {
        let out = Upstream {
            data: -6.0,
            grad: 2.0,
        };
        let grads = BackpropFunc::Mul.local_grads(&[2.0, -3.0], out);
        assert_eq!(grads, [-6.0, 4.0]);
    }

    #[test]
    fn test_relu_at_zero_blocks_gradient() {
        assert_eq!(relu(SEED), 0.0);
        assert_eq!(relu(Upstream { data: 0.5, grad: 3.0 }), 3.0);
    }

    #[test]
    fn test_pow_rule() {
        let grads = BackpropFunc::Pow(3.0).local_grads(&[2.0], SEED);
        assert_eq!(grads, [12.0, 0.0]);
    }

    #[test]
    fn test_display() {
        assert_eq!(BackpropFunc::Pow(2.0).to_string(), "**2");
        assert_eq!(BackpropFunc::Add.to_string(), "+");
    }
}
