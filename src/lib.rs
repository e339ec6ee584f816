//! A minimal library for building rudimentary neural networks on top of a scalar
//! reverse-mode autograd engine, using a PyTorch-like API.
//!
//! ```
//! use grad_rs_scalar::graph::Graph;
//!
//! let g = Graph::new();
//! let a = g.leaf(2.0);
//! let b = g.leaf(-3.0);
//! let c = g.leaf(10.0);
//! let f = g.leaf(-2.0);
//! let l = &(&(&a * &b) + &c) * &f;
//! assert_eq!(l.data(), -8.0);
//!
//! l.backward();
//! assert_eq!(a.grad(), 6.0);
//! assert_eq!(f.grad(), 4.0);
//! ```

pub mod backprop_fns;
pub mod dataloader;
pub mod datasets;
pub mod graph;
pub mod loss;
pub mod nn;
pub mod optim;
pub mod values;
pub mod viz;
