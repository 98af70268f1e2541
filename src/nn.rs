//! Activation functions applied over slices of values

use std::sync::atomic::{self, AtomicUsize};

use crate::values::Value;

/// Represents an activation module from torch.nn, e.g. torch.nn.GELU.
/// <https://pytorch.org/docs/stable/nn.html#non-linear-activations-weighted-sum-nonlinearity>
pub trait Activation {
    /// Name used when reporting results
    fn name(&self) -> &'static str;
    fn forward(&self, inputs: &[Value]) -> Vec<Value>;
}

/// GELU with the tanh approximation, torch.nn.GELU(approximate='tanh')
#[derive(Default)]
pub struct GELU {}

impl GELU {
    pub fn new() -> Self {
        Self {}
    }
}

impl Activation for GELU {
    fn name(&self) -> &'static str {
        "GELU"
    }

    fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        inputs.iter().map(|v| v.gelu()).collect()
    }
}

#[derive(Default)]
pub struct Sigmoid {}

impl Sigmoid {
    pub fn new() -> Self {
        Self {}
    }
}

impl Activation for Sigmoid {
    fn name(&self) -> &'static str {
        "Sigmoid"
    }

    fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        inputs.iter().map(|v| v.sigmoid()).collect()
    }
}

#[derive(Default)]
pub struct Tanh {}

impl Tanh {
    pub fn new() -> Self {
        Self {}
    }
}

impl Activation for Tanh {
    fn name(&self) -> &'static str {
        "Tanh"
    }

    fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        inputs.iter().map(|v| v.tanh()).collect()
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

    /// Number of inputs clamped to zero by the last forward pass (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

impl Activation for ReLU {
    fn name(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let n_dead_neurons = inputs.iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        log::debug!("ReLU n_dead_neurons: {}", n_dead_neurons);
        inputs.iter().map(|v| v.relu()).collect()
    }
}

/// Applies softmax to a set of values
#[derive(Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        Self {}
    }
}

impl Activation for Softmax {
    fn name(&self) -> &'static str {
        "Softmax"
    }

    fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        // Shift by the max so large logits don't overflow `exp`. The shift is a fresh leaf,
        // so it acts as a constant and leaves the gradients on the inputs unchanged.
        let max = inputs
            .iter()
            .map(|v| v.data())
            .fold(f64::NEG_INFINITY, f64::max);
        let shift = Value::new(if max.is_finite() { max } else { 0.0 });
        let exps = inputs
            .iter()
            .map(|v| (v - &shift).exp())
            .collect::<Vec<_>>();
        let exp_sum = exps.iter().cloned().sum::<Value>();
        exps.iter().map(|e| e / &exp_sum).collect()
    }
}
