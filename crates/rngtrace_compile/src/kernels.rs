//! Numeric kernels shared by eager execution and the interpreter.
//!
//! Both executors call exactly these functions in the same order, so a
//! compiled replay from the same generator state is bit-identical to eager
//! execution.

use rngtrace_core::StatefulGenerator;

use crate::error::{TraceError, TraceResult};

/// Elementwise binary operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `lhs + rhs`
    Add,
    /// `lhs * rhs`
    Mul,
}

impl BinaryOp {
    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Mul => a * b,
        }
    }

    /// Lower-case operation name.
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Mul => "mul",
        }
    }
}

/// Elementwise unary operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `sin(x)`
    Sin,
    /// `cos(x)`
    Cos,
    /// `1 / (1 + exp(-x))`
    Sigmoid,
}

impl UnaryOp {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Lower-case operation name.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Sigmoid => "sigmoid",
        }
    }
}

/// Draws `len` uniform variates in [0, 1).
pub fn uniform<G: StatefulGenerator + ?Sized>(generator: &mut G, len: usize) -> Vec<f64> {
    let mut values = vec![0.0; len];
    generator.fill_uniform(&mut values);
    values
}

/// Draws `len` standard normal variates.
pub fn normal<G: StatefulGenerator + ?Sized>(generator: &mut G, len: usize) -> Vec<f64> {
    let mut values = vec![0.0; len];
    generator.fill_normal(&mut values);
    values
}

/// Checks a dropout probability.
pub fn check_probability(p: f64) -> TraceResult<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(TraceError::InvalidProbability(p))
    }
}

/// Applies inverted dropout with an already drawn uniform mask.
///
/// Element `i` is zeroed when `mask[i] < p` and scaled by `1 / (1 - p)`
/// otherwise. One uniform is always drawn per element, even when `p` is
/// zero, so the generator offset does not depend on `p`.
pub fn dropout(input: &[f64], mask: &[f64], p: f64) -> Vec<f64> {
    let keep = 1.0 / (1.0 - p);
    input
        .iter()
        .zip(mask)
        .map(|(&x, &u)| if u < p { 0.0 } else { x * keep })
        .collect()
}

/// Applies `op` elementwise, broadcasting a length-1 operand.
pub fn binary(op: BinaryOp, lhs: &[f64], rhs: &[f64]) -> TraceResult<Vec<f64>> {
    let len = broadcast_len(lhs.len(), rhs.len()).ok_or(TraceError::ShapeMismatch {
        op: op.name(),
        lhs: lhs.len(),
        rhs: rhs.len(),
    })?;
    let at = |t: &[f64], i: usize| if t.len() == 1 { t[0] } else { t[i] };
    Ok((0..len).map(|i| op.apply(at(lhs, i), at(rhs, i))).collect())
}

/// Length of the result of a binary op, if the operands are compatible.
pub fn broadcast_len(lhs: usize, rhs: usize) -> Option<usize> {
    match (lhs, rhs) {
        (a, b) if a == b => Some(a),
        (1, b) => Some(b),
        (a, 1) => Some(a),
        _ => None,
    }
}

/// Applies `op` elementwise.
pub fn unary(op: UnaryOp, input: &[f64]) -> Vec<f64> {
    input.iter().map(|&x| op.apply(x)).collect()
}

/// Sum of all elements, as a length-1 tensor.
pub fn sum(input: &[f64]) -> Vec<f64> {
    vec![input.iter().sum()]
}

/// Sums a row-major `rows x width` tensor over its rows.
pub fn sum_columns(input: &[f64], width: usize) -> TraceResult<Vec<f64>> {
    if width == 0 || input.len() % width != 0 {
        return Err(TraceError::ShapeMismatch {
            op: "sum_columns",
            lhs: input.len(),
            rhs: width,
        });
    }
    let mut out = vec![0.0; width];
    for row in input.chunks_exact(width) {
        for (acc, &x) in out.iter_mut().zip(row) {
            *acc += x;
        }
    }
    Ok(out)
}

/// Multiplies every element by `factor`.
pub fn scale(input: &[f64], factor: f64) -> Vec<f64> {
    input.iter().map(|&x| x * factor).collect()
}
