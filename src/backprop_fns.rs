//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph.

use std::f64::consts::PI;
use std::fmt::{self, Display};

use crate::values::Value;

/// Coefficient of the cubic term in the tanh approximation of GELU
pub const GELU_CUBIC_COEFF: f64 = 0.044715;

/// `sqrt(2 / pi)`, the scale inside the tanh approximation of GELU
pub fn gelu_scale() -> f64 {
    (2.0 / PI).sqrt()
}

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    /// Raise to a constant power, the exponent is not part of the graph
    Pow(f64),
    Exp,
    Log,
    Tanh,
    Sigmoid,
    ReLU,
    Gelu,
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add | BackpropFunc::Sub | BackpropFunc::Mul | BackpropFunc::Div => 2,
            BackpropFunc::Neg
            | BackpropFunc::Pow(_)
            | BackpropFunc::Exp
            | BackpropFunc::Log
            | BackpropFunc::Tanh
            | BackpropFunc::Sigmoid
            | BackpropFunc::ReLU
            | BackpropFunc::Gelu => 1,
        }
    }
}

impl Display for BackpropFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpropFunc::Add => write!(f, "+"),
            BackpropFunc::Sub => write!(f, "-"),
            BackpropFunc::Mul => write!(f, "*"),
            BackpropFunc::Div => write!(f, "/"),
            BackpropFunc::Neg => write!(f, "neg"),
            BackpropFunc::Pow(p) => write!(f, "^{}", p),
            BackpropFunc::Exp => write!(f, "exp"),
            BackpropFunc::Log => write!(f, "log"),
            BackpropFunc::Tanh => write!(f, "tanh"),
            BackpropFunc::Sigmoid => write!(f, "sigmoid"),
            BackpropFunc::ReLU => write!(f, "relu"),
            BackpropFunc::Gelu => write!(f, "gelu"),
        }
    }
}

// Operand data and the output gradient are always read into locals before taking
// `borrow_mut`, since both operands may be the same node (e.g. `&a * &a`).

/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    in1.0.borrow_mut().grad += grad;
    in2.0.borrow_mut().grad += grad;
}

/// Represents backprop for the operation `in1 - in2 = out`
pub fn sub(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    in1.0.borrow_mut().grad += grad;
    in2.0.borrow_mut().grad -= grad;
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    let in2_data = in2.data();
    in1.0.borrow_mut().grad += in2_data * grad;
    in2.0.borrow_mut().grad += in1_data * grad;
}

/// Represents backprop for the operation `in1 / in2 = out`
pub fn div(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    let in2_data = in2.data();
    in1.0.borrow_mut().grad += grad / in2_data;
    in2.0.borrow_mut().grad += -in1_data * grad / in2_data.powi(2);
}

/// Represents backprop for the operation `-in = out`
pub fn neg(in1: &Value, out: &Value) {
    let grad = out.grad();
    in1.0.borrow_mut().grad -= grad;
}

/// Represents backprop for the operation `in^exponent = out`
pub fn pow(in1: &Value, exponent: f64, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.0.borrow_mut().grad += exponent * in1_data.powf(exponent - 1.0) * grad;
}

/// Represents backprop for the operation `exp(in) = out`
pub fn exp(in1: &Value, out: &Value) {
    let grad = out.grad(); // accumulated gradient
    let out_data = out.data(); // exp(in)
    in1.0.borrow_mut().grad += out_data * grad;
}

/// Represents backprop for the operation `ln(in) = out`
///
/// The forward pass rejects non-positive inputs, so `in` is never zero here
pub fn log(in1: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.0.borrow_mut().grad += grad / in1_data;
}

/// Represents backprop for the operation `tanh(in) = out`
pub fn tanh(in1: &Value, out: &Value) {
    let grad = out.grad();
    let out_data = out.data();
    in1.0.borrow_mut().grad += (1.0 - out_data.powi(2)) * grad;
}

/// Represents backprop for the operation `sigmoid(in) = out`
pub fn sigmoid(in1: &Value, out: &Value) {
    let grad = out.grad();
    let out_data = out.data();
    in1.0.borrow_mut().grad += out_data * (1.0 - out_data) * grad;
}

/// Represents backprop for the operation `relu(in) = out`
pub fn relu(in1: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.0.borrow_mut().grad += if in1_data > 0.0 { grad } else { 0.0 };
}

/// Represents backprop for the operation `gelu(in) = out` (tanh approximation)
///
/// With `u = c * (x + k * x^3)`:
/// d gelu / dx = 0.5 * (1 + tanh(u)) + 0.5 * x * sech^2(u) * c * (1 + 3 * k * x^2)
pub fn gelu(in1: &Value, out: &Value) {
    let grad = out.grad();
    let x = in1.data();
    in1.0.borrow_mut().grad += gelu_derivative(x) * grad;
}

/// Local derivative of the tanh-approximated GELU at `x`
pub fn gelu_derivative(x: f64) -> f64 {
    let c = gelu_scale();
    let tanh_u = (c * (x + GELU_CUBIC_COEFF * x.powi(3))).tanh();
    let sech2_u = 1.0 - tanh_u * tanh_u;
    let du_dx = c * (1.0 + 3.0 * GELU_CUBIC_COEFF * x.powi(2));
    0.5 * (1.0 + tanh_u) + 0.5 * x * sech2_u * du_dx
}

/// Applies a backprop function for operators with two operands
pub fn update_gradients_two_operands(in1: &Value, in2: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Add) => add(in1, in2, out),
        Some(BackpropFunc::Sub) => sub(in1, in2, out),
        Some(BackpropFunc::Mul) => mul(in1, in2, out),
        Some(BackpropFunc::Div) => div(in1, in2, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}

/// Applies a backprop function for operators with one operand
pub fn update_gradients_one_operand(in1: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Neg) => neg(in1, out),
        Some(BackpropFunc::Pow(exponent)) => pow(in1, exponent, out),
        Some(BackpropFunc::Exp) => exp(in1, out),
        Some(BackpropFunc::Log) => log(in1, out),
        Some(BackpropFunc::Tanh) => tanh(in1, out),
        Some(BackpropFunc::Sigmoid) => sigmoid(in1, out),
        Some(BackpropFunc::ReLU) => relu(in1, out),
        Some(BackpropFunc::Gelu) => gelu(in1, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}
