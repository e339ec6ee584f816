//! Optimizer(s)

use crate::values::{EngineError, Value};

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self) -> Result<(), EngineError>;
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Value>,
    lr: f64,
    momentum: f64,
    // velocity per parameter
    velocity: Vec<f64>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f64, momentum: f64) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Changes the learning rate for the following steps, e.g. to decay it over epochs
    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f64] {
        &self.velocity
    }
}

impl Optim for SGD {
    /// Leaves every parameter untouched if one of them is not a leaf
    fn step(&mut self) -> Result<(), EngineError> {
        if let Some(param) = self.params.iter().find(|p| !p.is_leaf()) {
            return Err(EngineError::NotALeaf { id: param.id() });
        }
        for (idx, param) in self.params.iter_mut().enumerate() {
            // SGD with momentum
            let velocity = self.momentum * self.velocity[idx] - self.lr * param.grad();
            let new_val = param.data() + velocity;
            self.velocity[idx] = velocity;
            param.set_data(new_val)?;
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.reset_grad();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{assert_eq_float, graph::Graph};

    use super::*;

    #[test]
    fn test_sgd_no_momentum() {
        let g = Graph::new();
        let a = g.leaf(1.0);
        let b = g.leaf(2.0);
        let c = &a * &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.0);
        optim.step().unwrap();
        assert_eq!(a.grad(), 2.0);
        assert_eq!(b.grad(), 1.0);
        assert_eq_float!(a.data(), 0.8);
        assert_eq_float!(b.data(), 1.9);
        // derived values are not recomputed
        assert_eq!(c.data(), 2.0);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let g = Graph::new();
        let a = g.leaf(1.0);
        let b = g.leaf(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.9);
        optim.step().unwrap();
        assert_eq_float!(a.data(), 0.9);
        assert_eq_float!(b.data(), 1.9);
        assert_eq_float!(optim.velocities()[0], -0.1);
        optim.step().unwrap();
        assert_eq_float!(a.data(), 0.71);
        assert_eq_float!(b.data(), 1.71);
        assert_eq_float!(optim.velocities()[1], -0.19);
    }

    #[test]
    fn test_sgd_zero_grad_and_lr() {
        let g = Graph::new();
        let a = g.leaf(3.0);
        let loss = a.pow(2.0).unwrap();
        loss.backward();
        let mut optim = SGD::new(vec![a.clone()], 0.1, 0.0);
        optim.set_lr(0.5);
        assert_eq!(optim.lr(), 0.5);
        optim.step().unwrap();
        assert_eq_float!(a.data(), 0.0);
        optim.zero_grad();
        assert_eq!(a.grad(), 0.0);
    }

    #[test]
    fn test_sgd_rejects_derived_parameters() {
        let g = Graph::new();
        let a = g.leaf(1.0);
        let c = a.exp();
        c.backward();
        let mut optim = SGD::new(vec![c.clone()], 0.1, 0.0);
        assert!(matches!(optim.step(), Err(EngineError::NotALeaf { .. })));
    }

    #[test]
    fn test_sgd_rejected_step_updates_nothing() {
        let g = Graph::new();
        let a = g.leaf(1.0);
        let b = g.leaf(2.0);
        let c = &a * &b;
        c.backward();
        let mut optim = SGD::new(vec![a.clone(), c.clone()], 0.1, 0.9);
        assert_eq!(optim.step(), Err(EngineError::NotALeaf { id: c.id() }));
        assert_eq!(a.data(), 1.0);
        assert_eq!(c.data(), 2.0);
        assert_eq!(optim.velocities(), &[0.0, 0.0]);
    }
}
