//! Scalar values which form a computation graph
use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
};

use rand::Rng;
use thiserror::Error;

use crate::backprop_fns::{
    BackpropFunc, GELU_CUBIC_COEFF, gelu_scale, update_gradients_one_operand,
    update_gradients_two_operands,
};

type SharedValue = Rc<RefCell<InnerValue>>;

/// Errors raised by operations on values
#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("Logarithm of non-positive number {data}")]
    NonPositiveLog { data: f64 },
}

/// Newtype representing a shared value in a computation graph
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f64) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None))))
    }

    /// Create a new value derived from an operation on other values (i.e. not a leaf node)
    fn new_derived(data: f64, backprop_fn: BackpropFunc) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(
            data,
            Some(backprop_fn),
        ))))
    }

    fn add_child(&self, child: Value) {
        self.0.borrow_mut().children.push(child.0);
    }

    pub fn data(&self) -> f64 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f64 {
        self.0.borrow().grad
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    pub fn set_data(&mut self, data: f64) {
        self.0.borrow_mut().data = data;
    }

    /// Unique identifier of the node
    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    /// The operation which produced this value, `None` for leaf nodes
    pub fn backprop_fn(&self) -> Option<BackpropFunc> {
        self.0.borrow().backprop_fn
    }

    /// Operands of the operation which produced this value, in operand order
    pub fn children(&self) -> Vec<Value> {
        self.0
            .borrow()
            .children
            .iter()
            .map(|c| Value(c.clone()))
            .collect()
    }

    /// Unlike PyTorch which only zeros out the gradients of the leaf nodes, this zeros out
    /// all gradients in the computation graph which are children of this node
    pub fn zero_grad(&mut self) {
        for value in self.topological_order() {
            value.0.borrow_mut().grad = 0.0;
        }
    }

    /// Accumulates d self / d node into every node of the graph rooted at `self`
    ///
    /// Gradients add up across calls, call `zero_grad` between independent passes
    pub fn backward(&self) {
        // d out / d out = 1
        self.0.borrow_mut().grad = 1.0;

        // apply backprop, reversed to start from root first
        for value in self.topological_order().into_iter().rev() {
            let children = value.children();
            if let Some(f) = value.backprop_fn() {
                debug_assert!(f.n_operands() == children.len());
            }
            match children.as_slice() {
                [] => {}
                [in1] => update_gradients_one_operand(in1, &value),
                [in1, in2] => update_gradients_two_operands(in1, in2, &value),
                _ => {
                    panic!("Unsupported number of operands: {}", children.len());
                }
            }
        }
    }

    /// All nodes reachable from `self` in post order (operands before results)
    ///
    /// Walks the graph with an explicit stack, graphs can be far deeper than the call stack
    pub(crate) fn topological_order(&self) -> Vec<Value> {
        let mut order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();
        // (node, whether its operands have already been pushed)
        let mut stack = vec![(self.clone(), false)];
        while let Some((value, expanded)) = stack.pop() {
            if expanded {
                order.push(value);
                continue;
            }
            if !visited.insert(value.id()) {
                continue;
            }
            let children = value.children();
            stack.push((value, true));
            // reversed so operands are visited in operand order
            for child in children.into_iter().rev() {
                if !visited.contains(&child.id()) {
                    stack.push((child, false));
                }
            }
        }
        order
    }
}

// Various operations on values
impl Value {
    /// Raises the value to a constant power
    pub fn pow(&self, exponent: f64) -> Value {
        let result = Value::new_derived(
            self.data().powf(exponent),
            BackpropFunc::Pow(exponent),
        );
        result.add_child(self.clone());

        result
    }

    pub fn exp(&self) -> Value {
        let result = Value::new_derived(self.data().exp(), BackpropFunc::Exp);
        result.add_child(self.clone());

        result
    }

    /// Natural logarithm, only defined for strictly positive values
    pub fn log(&self) -> Result<Value, ValueError> {
        let data = self.data();
        if data <= 0.0 {
            return Err(ValueError::NonPositiveLog { data });
        }
        let result = Value::new_derived(data.ln(), BackpropFunc::Log);
        result.add_child(self.clone());

        Ok(result)
    }

    pub fn tanh(&self) -> Value {
        let result = Value::new_derived(self.data().tanh(), BackpropFunc::Tanh);
        result.add_child(self.clone());

        result
    }

    pub fn sigmoid(&self) -> Value {
        let data = 1.0 / (1.0 + (-self.data()).exp());
        let result = Value::new_derived(data, BackpropFunc::Sigmoid);
        result.add_child(self.clone());

        result
    }

    pub fn relu(&self) -> Value {
        let result = Value::new_derived(self.data().max(0.0), BackpropFunc::ReLU);
        result.add_child(self.clone());

        result
    }

    /// GELU using the tanh approximation
    /// `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`
    pub fn gelu(&self) -> Value {
        let x = self.data();
        let data = 0.5 * x * (1.0 + (gelu_scale() * (x + GELU_CUBIC_COEFF * x.powi(3))).tanh());
        let result = Value::new_derived(data, BackpropFunc::Gelu);
        result.add_child(self.clone());

        result
    }
}

// pretty print a value and its children recursively in a JSON-like format
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_value(value: &Value, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let inner = value.0.borrow();
            let indent_str = " ".repeat(indent);
            let indent_inner = " ".repeat(indent + 2);
            writeln!(f, "{}{{", indent_str)?;
            writeln!(f, "{}\"data\": {},", indent_inner, inner.data)?;
            writeln!(f, "{}\"grad\": {},", indent_inner, inner.grad)?;
            writeln!(f, "{}\"id\": {},", indent_inner, inner.id)?;
            match inner.backprop_fn {
                Some(op) => writeln!(f, "{}\"op\": \"{}\",", indent_inner, op)?,
                None => writeln!(f, "{}\"op\": null,", indent_inner)?,
            }
            writeln!(f, "{}\"children\": [", indent_inner)?;
            for (i, child) in inner.children.iter().enumerate() {
                let child_value = Value(child.clone());
                fmt_value(&child_value, indent + 4, f)?;
                if i < inner.children.len() - 1 {
                    writeln!(f, ",")?;
                } else {
                    writeln!(f)?;
                }
            }
            writeln!(f, "{}]", indent_inner)?;
            write!(f, "{}}}", indent_str)
        }
        fmt_value(self, 0, f)
    }
}

/// Implements a binary operator on `&Value` which records both operands in the graph
macro_rules! impl_binary_op(
    ($trait:ident, $trait_method:ident, $operator:tt, $backprop_fn:expr) => {
        impl $trait for &Value {
            type Output = Value;

            fn $trait_method(self, other: &Value) -> Value {
                let result = Value::new_derived(self.data() $operator other.data(), $backprop_fn);
                result.add_child(self.clone());
                result.add_child(other.clone());

                result
            }
        }
    }
);
impl_binary_op!(Add, add, +, BackpropFunc::Add);
impl_binary_op!(Sub, sub, -, BackpropFunc::Sub);
impl_binary_op!(Mul, mul, *, BackpropFunc::Mul);
impl_binary_op!(Div, div, /, BackpropFunc::Div);

impl Neg for &Value {
    type Output = Value;

    fn neg(self) -> Value {
        let result = Value::new_derived(-self.data(), BackpropFunc::Neg);
        result.add_child(self.clone());

        result
    }
}

// Adds pairwise so the resulting graph is O(log n) deep rather than a chain of n additions
impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let mut values = iter.collect::<Vec<_>>();
        if values.is_empty() {
            return Value::new(0.0);
        }
        while values.len() > 1 {
            let mut next = Vec::with_capacity(values.len().div_ceil(2));
            let mut pairs = values.into_iter();
            while let Some(a) = pairs.next() {
                match pairs.next() {
                    Some(b) => next.push(&a + &b),
                    None => next.push(a),
                }
            }
            values = next;
        }
        values.remove(0)
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data()
    }
}

// unfortunate that there isn't a blanket impl for AsRef<T> for T
// <https://doc.rust-lang.org/std/convert/trait.AsRef.html#reflexivity>
impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}

#[derive(Debug)]
pub(crate) struct InnerValue {
    // double precision, matching the closed-form evaluator
    pub(crate) data: f64,
    /// gradient of the value with respect to the output
    pub(crate) grad: f64,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    children: Vec<SharedValue>,
    /// Unique identifier for the node
    id: u64,
    /// The function which created this value from its children
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

// The default drop recurses through the operands, which overflows the stack on long
// chains (e.g. a value updated in a loop), so unlink them one node at a time
impl Drop for InnerValue {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(child) = stack.pop() {
            if let Ok(cell) = Rc::try_unwrap(child) {
                let mut inner = cell.into_inner();
                stack.append(&mut inner.children);
            }
        }
    }
}

impl InnerValue {
    pub fn new(data: f64, backprop_fn: Option<BackpropFunc>) -> Self {
        Self {
            data,
            grad: 0.0,
            children: vec![],
            id: generate_random_id(),
            backprop_fn,
        }
    }
}

fn generate_random_id() -> u64 {
    let mut rng = rand::rng();
    rng.random() // generates a random u64
}
