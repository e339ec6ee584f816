//! Components to build a neural network

use std::{
    cmp::Ordering,
    sync::atomic::{self, AtomicUsize},
};

use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

use crate::{
    graph::Graph,
    values::{EngineError, Value},
};

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Shape mismatch: expected {expected} inputs, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }

    fn parameters(&self) -> Vec<Value>;
    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError>;
}

/// Nonlinearity applied to the output of a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    ReLU,
    Tanh,
}

impl Activation {
    fn apply(&self, value: Value) -> Value {
        match self {
            Activation::Linear => value,
            Activation::ReLU => value.relu(),
            Activation::Tanh => value.tanh(),
        }
    }
}

/// A single neuron in a layer of a NN
pub struct Neuron {
    /// weights of the neuron
    pub weights: Vec<Value>,
    /// bias of the neuron
    pub bias: Value,
    activation: Activation,
}

impl Neuron {
    pub fn new(graph: &Graph, n_inputs: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing gradients (or even just
        // activation values for that matter, e.g. softmax)
        let std = (2.0 / n_inputs.max(1) as f64).sqrt();
        let mut sample = || std * rng.sample::<f64, _>(StandardNormal);
        let weights = (0..n_inputs).map(|_| graph.leaf(sample())).collect();
        let bias = graph.leaf(sample());
        Self {
            weights,
            bias,
            activation,
        }
    }

    // Testing utility for a deterministic and simple neuron
    #[cfg(test)]
    fn new_ones(graph: &Graph, n_inputs: usize, activation: Activation) -> Self {
        Self {
            weights: (0..n_inputs).map(|_| graph.leaf(1.0)).collect(),
            bias: graph.leaf(1.0),
            activation,
        }
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.weights
            .iter()
            .chain(std::iter::once(&self.bias))
            .cloned()
            .collect()
    }

    pub fn forward(&self, inputs: &[Value]) -> Result<Value, NNError> {
        if inputs.len() != self.weights.len() {
            return Err(NNError::ShapeMismatch {
                expected: self.weights.len(),
                got: inputs.len(),
            });
        }
        let output = self.bias.graph().sum(
            self.weights
                .iter()
                .zip(inputs.iter())
                .map(|(w, i)| w * i),
        );
        let output = &output + &self.bias;
        Ok(self.activation.apply(output))
    }
}

/// A layer of a neural network
pub struct Layer {
    neurons: Vec<Neuron>,
    n_output_nans: AtomicUsize,
    n_parameters_nans: AtomicUsize,
}

impl Layer {
    /// Creates a new layer with the given number of inputs and outputs
    pub fn new(
        graph: &Graph,
        n_inputs: usize,
        n_outputs: usize,
        activation: Activation,
        rng: &mut impl Rng,
    ) -> Self {
        let neurons = (0..n_outputs)
            .map(|_| Neuron::new(graph, n_inputs, activation, rng))
            .collect();
        Self::from_neurons(neurons)
    }

    #[cfg(test)]
    fn new_ones(graph: &Graph, n_inputs: usize, n_outputs: usize, activation: Activation) -> Self {
        let neurons = (0..n_outputs)
            .map(|_| Neuron::new_ones(graph, n_inputs, activation))
            .collect();
        Self::from_neurons(neurons)
    }

    fn from_neurons(neurons: Vec<Neuron>) -> Self {
        Self {
            neurons,
            n_output_nans: AtomicUsize::new(0),
            n_parameters_nans: AtomicUsize::new(0),
        }
    }

    pub fn n_outputs(&self) -> usize {
        self.neurons.len()
    }

    /// Number of NaN outputs seen in the latest forward pass (used for debugging)
    pub fn n_output_nans(&self) -> usize {
        self.n_output_nans.load(atomic::Ordering::Relaxed)
    }

    /// Returns all the parameters in the layer
    pub fn parameters(&self) -> Vec<Value> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }

    /// Computes forward pass for a layer
    pub fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let outputs = self
            .neurons
            .iter()
            .map(|n| n.forward(inputs))
            .collect::<Result<Vec<_>, _>>()?;
        let n_output_nans = outputs.iter().filter(|v| v.data().is_nan()).count();
        self.n_output_nans
            .store(n_output_nans, atomic::Ordering::Relaxed);
        let n_parameters_nans = self
            .parameters()
            .iter()
            .filter(|v| v.data().is_nan())
            .count();
        self.n_parameters_nans
            .store(n_parameters_nans, atomic::Ordering::Relaxed);
        log::trace!(
            "n_output_nans: {}, n_parameters_nans: {}",
            n_output_nans,
            n_parameters_nans
        );
        Ok(outputs)
    }
}

/// Multi layer perceptron, hidden layers use ReLU and the last layer is linear
pub struct MLP {
    layers: Vec<Layer>,
}

impl MLP {
    /// `sizes` lists the number of outputs of every layer, the last entry is the output size
    pub fn new(graph: &Graph, n_inputs: usize, sizes: &[usize], rng: &mut impl Rng) -> Self {
        let mut layers = Vec::with_capacity(sizes.len());
        let mut fan_in = n_inputs;
        for (i, &size) in sizes.iter().enumerate() {
            let activation = if i + 1 == sizes.len() {
                Activation::Linear
            } else {
                Activation::ReLU
            };
            layers.push(Layer::new(graph, fan_in, size, activation, rng));
            fan_in = size;
        }
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

impl Module for MLP {
    fn parameters(&self) -> Vec<Value> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let mut outputs = inputs.to_vec();
        for layer in self.layers.iter() {
            outputs = layer.forward(&outputs)?;
        }
        Ok(outputs)
    }
}

/// Applies ReLU to a set of values, works for arbitrary number of inputs
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_neurons: AtomicUsize::new(0),
        }
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let n_dead_neurons = inputs.iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        inputs.iter().map(|v| v.relu()).collect()
    }

    /// Returns the number of dead neurons in the layer (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

/// Applies softmax to a set of values
#[derive(Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        Self {}
    }

    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let Some(first) = inputs.first() else {
            return vec![];
        };
        let exps: Vec<Value> = inputs.iter().map(|v| v.exp()).collect();
        let exp_sum = first.graph().sum(exps.iter().cloned());
        // Note: Large weights can cause overflow in the exponential function, leading to dividing
        // by `inf` for example, which causes the softmax to return NaN, so it is important to
        // initialize the weights properly
        exps.iter().map(|v| v / &exp_sum).collect()
    }
}

/// Predicted class of a model output: the sign for a single score (positive is class 1),
/// otherwise the index of the largest output
pub fn predict_class(outputs: &[Value]) -> usize {
    match outputs {
        [score] => usize::from(score.data() > 0.0),
        _ => outputs
            .iter()
            .enumerate()
            .max_by(|(_, v), (_, v2)| v.data().partial_cmp(&v2.data()).unwrap_or(Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use crate::assert_eq_float;

    use super::*;

    #[test]
    fn test_layer_forward() {
        let g = Graph::new();
        let layer = Layer::new_ones(&g, 2, 3, Activation::Linear);
        let inputs = g.leaves(&[1.0, 2.0]);
        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].data(), 4.0);
        assert_eq!(outputs[1].data(), 4.0);
        assert_eq!(outputs[2].data(), 4.0);
        assert_eq!(layer.n_output_nans(), 0);
    }

    #[test]
    fn test_tanh_neuron() {
        let g = Graph::new();
        let neuron = Neuron::new_ones(&g, 2, Activation::Tanh);
        let inputs = g.leaves(&[0.5, -1.0]);
        let out = neuron.forward(&inputs).unwrap();
        // tanh(0.5 - 1 + 1)
        assert_eq_float!(out.data(), 0.5f64.tanh());
        out.backward();
        let local = 1.0 - 0.5f64.tanh().powi(2);
        assert_eq_float!(neuron.weights[0].grad(), 0.5 * local);
        assert_eq_float!(neuron.weights[1].grad(), -local);
        assert_eq_float!(neuron.bias.grad(), local);
    }

    #[test]
    fn test_dim_mismatch() {
        let g = Graph::new();
        let layer = Layer::new_ones(&g, 2, 3, Activation::ReLU);
        let inputs = vec![g.leaf(1.0)];
        let outputs = layer.forward(&inputs).unwrap_err();
        assert!(matches!(
            outputs,
            NNError::ShapeMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_mlp_shapes() {
        let g = Graph::new();
        let mut rng = Pcg64Mcg::seed_from_u64(42);
        let mlp = MLP::new(&g, 2, &[16, 16, 1], &mut rng);
        // (2 + 1) * 16 + (16 + 1) * 16 + (16 + 1) * 1
        assert_eq!(mlp.parameters().len(), 337);
        assert_eq!(mlp.layers().len(), 3);
        assert_eq!(mlp.layers()[2].n_outputs(), 1);
        let out = mlp.forward(&g.leaves(&[0.5, -0.5])).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].data().is_finite());
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let params = |seed| {
            let g = Graph::new();
            let mut rng = Pcg64Mcg::seed_from_u64(seed);
            MLP::new(&g, 2, &[4, 2], &mut rng)
                .parameters()
                .iter()
                .map(|p| p.data())
                .collect::<Vec<_>>()
        };
        assert_eq!(params(7), params(7));
        assert_ne!(params(7), params(8));
    }

    #[test]
    fn test_module_zero_grad() {
        let g = Graph::new();
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let mut mlp = MLP::new(&g, 2, &[3, 1], &mut rng);
        let out = mlp.forward(&g.leaves(&[1.0, 2.0])).unwrap();
        out[0].backward();
        assert!(mlp.parameters().iter().any(|p| p.grad() != 0.0));
        mlp.zero_grad();
        assert!(mlp.parameters().iter().all(|p| p.grad() == 0.0));
    }

    #[test]
    fn test_relu_module_counts_dead_neurons() {
        let g = Graph::new();
        let relu = ReLU::new();
        let out = relu.forward(&g.leaves(&[-1.0, 0.0, 2.0]));
        assert_eq!(out.iter().map(|v| v.data()).collect::<Vec<_>>(), [0.0, 0.0, 2.0]);
        assert_eq!(relu.n_dead_neurons(), 2);
    }

    #[test]
    fn test_softmax() {
        let g = Graph::new();
        let softmax = Softmax::new();
        let inputs = g.leaves(&[1.0, 2.0]);
        let mut outputs = softmax.forward(&inputs);
        assert_eq!(outputs.len(), 2);
        assert_eq_float!(outputs[0].data(), 0.2689414);
        assert_eq_float!(outputs[1].data(), 0.7310585);

        // Softmax(x1, x2) = (exp(x1) / (exp(x1) + exp(x2)), exp(x2) / (exp(x1) + exp(x2)))
        // Let s1 = exp(x1) / (exp(x1) + exp(x2)) and s2 = exp(x2) / (exp(x1) + exp(x2))
        // d s1 / dx1 = s1 * (1 - s1)
        // d s1 / dx2 = -s1 * s2
        outputs[0].backward();
        let s1 = outputs[0].data();
        let s2 = outputs[1].data();
        assert_eq_float!(inputs[0].grad(), s1 * (1.0 - s1));
        assert_eq_float!(inputs[1].grad(), -s1 * s2);

        // Note that `inputs[i].zero_grad()` (zeroing leaf nodes) is insufficient because there are
        // many intermediate nodes created to compute the output that will not be zeroed out!
        // Printing `outputs[0]` will show these intermediate nodes.
        outputs[0].zero_grad();
        // d s2 / dx1 = -s1 * s2
        // d s2 / dx2 = s2 * (1 - s2)
        outputs[1].backward();
        assert_eq_float!(inputs[0].grad(), -s1 * s2);
        assert_eq_float!(inputs[1].grad(), s2 * (1.0 - s2));
    }

    #[test]
    fn test_predict_class() {
        let g = Graph::new();
        assert_eq!(predict_class(&g.leaves(&[0.3])), 1);
        assert_eq!(predict_class(&g.leaves(&[-0.3])), 0);
        assert_eq!(predict_class(&g.leaves(&[0.1, 0.7, 0.2])), 1);
    }
}
