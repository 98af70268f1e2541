//! Loss functions and activations with their gradients, computed both in closed form
//! and through a small scalar autograd engine with a PyTorch-like API.

pub mod backprop_fns;
pub mod graphviz;
pub mod loss;
pub mod nn;
pub mod values;
