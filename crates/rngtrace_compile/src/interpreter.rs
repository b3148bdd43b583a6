//! Graph interpreter.
//!
//! Executes a captured [`Graph`] op by op against a caller-supplied
//! generator, calling the same kernels as eager execution. Generator ops
//! run in recorded order, which is the order the validator approved.

use rngtrace_core::{GeneratorStateSnapshot, StatefulGenerator};
use tracing::trace;

use crate::context::{Invocation, SavedActivations, SavedState};
use crate::error::ExecError;
use crate::graph::{Graph, Op, StateOperand};
use crate::kernels;

/// Checks `inputs` against the lengths the graph was traced with.
pub fn check_inputs(graph: &Graph, inputs: &[Vec<f64>]) -> Result<(), ExecError> {
    let expected = graph.input_lens();
    if inputs.len() != expected.len() {
        return Err(ExecError::InputCount {
            expected: expected.len(),
            actual: inputs.len(),
        });
    }
    for (index, (input, &len)) in inputs.iter().zip(expected).enumerate() {
        if input.len() != len {
            return Err(ExecError::InputShape {
                index,
                expected: len,
                actual: input.len(),
            });
        }
    }
    Ok(())
}

/// Executes `graph` once.
///
/// `saved` must be supplied when the graph loads activations saved by a
/// forward pass.
pub fn execute<G: StatefulGenerator + ?Sized>(
    graph: &Graph,
    inputs: &[Vec<f64>],
    generator: &mut G,
    saved: Option<&SavedActivations>,
) -> Result<Invocation, ExecError> {
    check_inputs(graph, inputs)?;
    let empty = SavedActivations::default();
    let saved_in = match saved {
        Some(saved) => saved,
        None if graph.loads_saved() => {
            return Err(ExecError::SavedMismatch(
                "graph loads saved activations but none were supplied".to_string(),
            ))
        }
        None => &empty,
    };

    let mut tensors: Vec<Vec<f64>> = vec![Vec::new(); graph.tensor_slots()];
    let mut states = vec![GeneratorStateSnapshot::new(0, 0); graph.state_slots()];
    let mut result = Invocation {
        outputs: Vec::with_capacity(graph.outputs().len()),
        draws: Vec::new(),
        saved: SavedActivations {
            tensors: Vec::with_capacity(graph.saved_tensors),
            states: Vec::with_capacity(graph.saved_states),
        },
    };

    for op in graph.ops() {
        trace!(?op, "execute");
        match *op {
            Op::Input { out, index } => tensors[out] = inputs[index].clone(),
            Op::Rand { out, len } => {
                let values = kernels::uniform(&mut *generator, len);
                result.draws.push(values.clone());
                tensors[out] = values;
            }
            Op::Randn { out, len } => {
                let values = kernels::normal(&mut *generator, len);
                result.draws.push(values.clone());
                tensors[out] = values;
            }
            Op::Dropout { out, input, p } => {
                let mask = kernels::uniform(&mut *generator, tensors[input].len());
                tensors[out] = kernels::dropout(&tensors[input], &mask, p);
                result.draws.push(mask);
            }
            Op::Binary { out, op, lhs, rhs } => {
                tensors[out] = kernels::binary(op, &tensors[lhs], &tensors[rhs])?;
            }
            Op::Unary { out, op, input } => tensors[out] = kernels::unary(op, &tensors[input]),
            Op::Sum { out, input } => tensors[out] = kernels::sum(&tensors[input]),
            Op::SumColumns { out, input, width } => {
                tensors[out] = kernels::sum_columns(&tensors[input], width)?;
            }
            Op::Scale { out, input, factor } => {
                tensors[out] = kernels::scale(&tensors[input], factor);
            }
            Op::GetState { out, .. } => states[out] = generator.capture(),
            Op::SetState { source } => match source {
                StateOperand::Slot(slot) => generator.restore(&states[slot]),
                StateOperand::Literal(snapshot) => generator.restore(&snapshot),
            },
            Op::ManualSeed { seed } => generator.manual_seed(seed),
            Op::SaveTensor { input, .. } => result.saved.tensors.push(tensors[input].clone()),
            Op::SaveState { state, read, .. } => result.saved.states.push(SavedState {
                snapshot: states[state],
                read,
            }),
            Op::LoadSavedTensor { out, slot } => {
                tensors[out] = saved_in.tensors.get(slot).cloned().ok_or_else(|| {
                    ExecError::SavedMismatch(format!("no saved tensor at slot {slot}"))
                })?;
            }
            Op::LoadSavedState { out, slot } => {
                states[out] = saved_in
                    .states
                    .get(slot)
                    .map(|s| s.snapshot)
                    .ok_or_else(|| {
                        ExecError::SavedMismatch(format!("no saved state at slot {slot}"))
                    })?;
            }
        }
    }

    result.outputs = graph
        .outputs()
        .iter()
        .map(|&slot| tensors[slot].clone())
        .collect();
    Ok(result)
}
