//! Trace capture context.
//!
//! [`TraceContext`] is the only handle traced code has on the generator.
//! Every op runs concretely against the borrowed generator, is appended to
//! the graph, and reports its generator effects to the capture session. The
//! same context therefore doubles as the eager executor: [`run_eager`] is a
//! capture whose graph and log are thrown away.
//!
//! # Example
//!
//! ```rust
//! use rngtrace_compile::context::{trace, TraceContext};
//! use rngtrace_compile::error::TraceResult;
//! use rngtrace_compile::graph::TensorRef;
//! use rngtrace_compile::tracker::EffectTracker;
//! use rngtrace_core::{DeviceGenerator, StatefulGenerator};
//!
//! fn restore_in_between(
//!     ctx: &mut TraceContext<'_, DeviceGenerator>,
//!     inputs: &[TensorRef],
//! ) -> TraceResult<Vec<TensorRef>> {
//!     let state = ctx.get_state();
//!     let x = ctx.sin(inputs[0])?;
//!     let noise = ctx.rand(4);
//!     let x = ctx.add(x, noise)?;
//!     ctx.set_state(state)?;
//!     let noise = ctx.rand(4);
//!     Ok(vec![ctx.add(x, noise)?])
//! }
//!
//! let mut tracker = EffectTracker::new();
//! let mut gen = DeviceGenerator::from_seed(16);
//! let capture = trace(&mut tracker, &mut gen, &restore_in_between, &[vec![0.5; 4]], None)?;
//!
//! assert_eq!(capture.log.len(), 4);
//! assert_eq!(gen.capture().offset(), 8);
//! # Ok::<(), rngtrace_compile::error::TraceError>(())
//! ```

use rngtrace_core::{GeneratorStateSnapshot, StatefulGenerator};

use crate::effect::{EffectLog, ReadId, SnapshotOrigin};
use crate::error::{TraceError, TraceResult};
use crate::graph::{Graph, GraphBuilder, Op, StateOperand, StateRef, StateSource, TensorRef};
use crate::kernels::{self, BinaryOp, UnaryOp};
use crate::tracker::{CaptureSession, EffectObserver, EffectTracker};

/// Generator state kept for a backward pass, with the read it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SavedState {
    /// State value
    pub snapshot: GeneratorStateSnapshot,
    /// Read that produced the value during capture
    pub read: ReadId,
}

/// Activations a forward pass hands to its backward pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SavedActivations {
    /// Saved tensors, by slot
    pub tensors: Vec<Vec<f64>>,
    /// Saved generator states, by slot
    pub states: Vec<SavedState>,
}

impl SavedActivations {
    /// Returns true if nothing was saved.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty() && self.states.is_empty()
    }
}

/// Result of one execution, eager or compiled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Invocation {
    /// Returned tensors
    pub outputs: Vec<Vec<f64>>,
    /// Raw variates of every draw op, in execution order
    pub draws: Vec<Vec<f64>>,
    /// Activations saved for a backward pass
    pub saved: SavedActivations,
}

/// Everything one capture produced.
#[derive(Clone, Debug)]
pub struct Capture {
    /// Recorded ops
    pub graph: Graph,
    /// Generator effects in program order
    pub log: EffectLog,
    /// Concrete results of the capture run
    pub run: Invocation,
}

/// Capture-time handle on the generator and the graph being built.
pub struct TraceContext<'a, G: StatefulGenerator> {
    generator: &'a mut G,
    session: CaptureSession<'a>,
    graph: GraphBuilder,
    tensors: Vec<Vec<f64>>,
    states: Vec<SavedState>,
    inputs: Vec<TensorRef>,
    draws: Vec<Vec<f64>>,
    saved_in: SavedActivations,
    saved_out: SavedActivations,
}

impl<'a, G: StatefulGenerator> TraceContext<'a, G> {
    fn new(
        generator: &'a mut G,
        session: CaptureSession<'a>,
        inputs: &[Vec<f64>],
        saved: Option<&SavedActivations>,
    ) -> Self {
        let mut ctx = Self {
            generator,
            session,
            graph: GraphBuilder::new(inputs.iter().map(Vec::len).collect()),
            tensors: Vec::with_capacity(inputs.len()),
            states: Vec::new(),
            inputs: Vec::with_capacity(inputs.len()),
            draws: Vec::new(),
            saved_in: saved.cloned().unwrap_or_default(),
            saved_out: SavedActivations::default(),
        };
        for (index, values) in inputs.iter().enumerate() {
            let handle = ctx.push_tensor(values.clone(), |out| Op::Input { out, index });
            ctx.inputs.push(handle);
        }
        ctx
    }

    fn finish(self, outputs: &[TensorRef]) -> TraceResult<Capture> {
        let values = outputs
            .iter()
            .map(|&t| self.value(t).map(<[f64]>::to_vec))
            .collect::<TraceResult<Vec<_>>>()?;

        let TraceContext {
            session,
            graph,
            draws,
            saved_out,
            ..
        } = self;

        Ok(Capture {
            graph: graph.finish(outputs),
            log: session.finish(),
            run: Invocation {
                outputs: values,
                draws,
                saved: saved_out,
            },
        })
    }

    fn push_tensor(&mut self, values: Vec<f64>, op: impl FnOnce(usize) -> Op) -> TensorRef {
        let out = self.graph.tensor();
        self.graph.push(op(out));
        self.tensors.push(values);
        TensorRef(out)
    }

    fn draw(&mut self, len: usize, normal: bool) -> Vec<f64> {
        let before = self.generator.capture();
        let values = if normal {
            kernels::normal(&mut *self.generator, len)
        } else {
            kernels::uniform(&mut *self.generator, len)
        };
        let after = self.generator.capture();
        self.session.record_draw(after.units_since(&before));
        self.draws.push(values.clone());
        values
    }

    /// Handles of the function inputs.
    pub fn inputs(&self) -> &[TensorRef] {
        &self.inputs
    }

    /// Handle of input `index`.
    pub fn input(&self, index: usize) -> TraceResult<TensorRef> {
        self.inputs
            .get(index)
            .copied()
            .ok_or(TraceError::InputCount {
                expected: index + 1,
                actual: self.inputs.len(),
            })
    }

    /// Concrete value of `tensor` in this run.
    ///
    /// Values observed here are not part of the graph; branching on them
    /// bakes the capture run's outcome into the compiled artifact.
    pub fn value(&self, tensor: TensorRef) -> TraceResult<&[f64]> {
        self.tensors
            .get(tensor.0)
            .map(Vec::as_slice)
            .ok_or(TraceError::UnknownTensor(tensor.0))
    }

    /// Number of elements of `tensor`.
    pub fn len_of(&self, tensor: TensorRef) -> TraceResult<usize> {
        self.value(tensor).map(<[f64]>::len)
    }

    // ------------------------------------------------------------------
    // Random ops
    // ------------------------------------------------------------------

    /// Draws `len` uniform variates in [0, 1).
    pub fn rand(&mut self, len: usize) -> TensorRef {
        let values = self.draw(len, false);
        self.push_tensor(values, |out| Op::Rand { out, len })
    }

    /// Draws `len` standard normal variates.
    pub fn randn(&mut self, len: usize) -> TensorRef {
        let values = self.draw(len, true);
        self.push_tensor(values, |out| Op::Randn { out, len })
    }

    /// Inverted dropout with drop probability `p` in `[0, 1)`.
    ///
    /// Always draws one uniform per element.
    pub fn dropout(&mut self, input: TensorRef, p: f64) -> TraceResult<TensorRef> {
        kernels::check_probability(p)?;
        let len = self.len_of(input)?;
        let mask = self.draw(len, false);
        let values = kernels::dropout(self.value(input)?, &mask, p);
        Ok(self.push_tensor(values, |out| Op::Dropout {
            out,
            input: input.0,
            p,
        }))
    }

    // ------------------------------------------------------------------
    // Deterministic ops
    // ------------------------------------------------------------------

    fn binary(&mut self, op: BinaryOp, lhs: TensorRef, rhs: TensorRef) -> TraceResult<TensorRef> {
        let values = kernels::binary(op, self.value(lhs)?, self.value(rhs)?)?;
        Ok(self.push_tensor(values, |out| Op::Binary {
            out,
            op,
            lhs: lhs.0,
            rhs: rhs.0,
        }))
    }

    fn unary(&mut self, op: UnaryOp, input: TensorRef) -> TraceResult<TensorRef> {
        let values = kernels::unary(op, self.value(input)?);
        Ok(self.push_tensor(values, |out| Op::Unary {
            out,
            op,
            input: input.0,
        }))
    }

    /// Elementwise sum, broadcasting a length-1 operand.
    pub fn add(&mut self, lhs: TensorRef, rhs: TensorRef) -> TraceResult<TensorRef> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// Elementwise product, broadcasting a length-1 operand.
    pub fn mul(&mut self, lhs: TensorRef, rhs: TensorRef) -> TraceResult<TensorRef> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// Elementwise sine.
    pub fn sin(&mut self, input: TensorRef) -> TraceResult<TensorRef> {
        self.unary(UnaryOp::Sin, input)
    }

    /// Elementwise cosine.
    pub fn cos(&mut self, input: TensorRef) -> TraceResult<TensorRef> {
        self.unary(UnaryOp::Cos, input)
    }

    /// Elementwise logistic sigmoid.
    pub fn sigmoid(&mut self, input: TensorRef) -> TraceResult<TensorRef> {
        self.unary(UnaryOp::Sigmoid, input)
    }

    /// Sum of all elements, as a length-1 tensor.
    pub fn sum(&mut self, input: TensorRef) -> TraceResult<TensorRef> {
        let values = kernels::sum(self.value(input)?);
        Ok(self.push_tensor(values, |out| Op::Sum { out, input: input.0 }))
    }

    /// Column sums of `input` viewed as a row-major matrix of the given
    /// width.
    pub fn sum_columns(&mut self, input: TensorRef, width: usize) -> TraceResult<TensorRef> {
        let values = kernels::sum_columns(self.value(input)?, width)?;
        Ok(self.push_tensor(values, |out| Op::SumColumns {
            out,
            input: input.0,
            width,
        }))
    }

    /// Multiplies every element by a constant.
    pub fn scale(&mut self, input: TensorRef, factor: f64) -> TraceResult<TensorRef> {
        let values = kernels::scale(self.value(input)?, factor);
        Ok(self.push_tensor(values, |out| Op::Scale {
            out,
            input: input.0,
            factor,
        }))
    }

    // ------------------------------------------------------------------
    // Generator state
    // ------------------------------------------------------------------

    /// Reads the generator state.
    pub fn get_state(&mut self) -> StateRef {
        let snapshot = self.generator.capture();
        let read = self.session.record_read(snapshot);
        let out = self.graph.state();
        self.graph.push(Op::GetState { out, read });
        self.states.push(SavedState { snapshot, read });
        StateRef { slot: out, read }
    }

    /// Overwrites the generator state.
    ///
    /// Accepts a [`StateRef`] read inside this trace, or a literal
    /// [`GeneratorStateSnapshot`] captured before it.
    pub fn set_state(&mut self, source: impl Into<StateSource>) -> TraceResult<()> {
        match source.into() {
            StateSource::Traced(state) => {
                let value = self
                    .states
                    .get(state.slot)
                    .copied()
                    .ok_or(TraceError::UnknownState(state.slot))?;
                self.generator.restore(&value.snapshot);
                self.session.record_write(
                    value.snapshot,
                    SnapshotOrigin::Traced { read: value.read },
                );
                self.graph.push(Op::SetState {
                    source: StateOperand::Slot(state.slot),
                });
            }
            StateSource::Literal(snapshot) => {
                self.generator.restore(&snapshot);
                self.session
                    .record_write(snapshot, SnapshotOrigin::External);
                self.graph.push(Op::SetState {
                    source: StateOperand::Literal(snapshot),
                });
            }
        }
        Ok(())
    }

    /// Reseeds the generator, resetting the offset to zero.
    pub fn manual_seed(&mut self, seed: u64) {
        self.generator.manual_seed(seed);
        self.session.record_write(
            GeneratorStateSnapshot::new(seed, 0),
            SnapshotOrigin::Seeded { seed },
        );
        self.graph.push(Op::ManualSeed { seed });
    }

    // ------------------------------------------------------------------
    // Saved activations
    // ------------------------------------------------------------------

    /// Saves a tensor for the backward pass and returns its slot.
    pub fn save_tensor(&mut self, tensor: TensorRef) -> TraceResult<usize> {
        let values = self.value(tensor)?.to_vec();
        let slot = self.graph.saved_tensor();
        self.graph.push(Op::SaveTensor {
            input: tensor.0,
            slot,
        });
        self.saved_out.tensors.push(values);
        Ok(slot)
    }

    /// Saves a generator state for the backward pass and returns its slot.
    pub fn save_state(&mut self, state: StateRef) -> TraceResult<usize> {
        let value = self
            .states
            .get(state.slot)
            .copied()
            .ok_or(TraceError::UnknownState(state.slot))?;
        let slot = self.graph.saved_state();
        self.graph.push(Op::SaveState {
            state: state.slot,
            read: value.read,
            slot,
        });
        self.saved_out.states.push(value);
        Ok(slot)
    }

    /// Loads a tensor saved by the forward pass.
    pub fn saved_tensor(&mut self, slot: usize) -> TraceResult<TensorRef> {
        let values = self
            .saved_in
            .tensors
            .get(slot)
            .cloned()
            .ok_or(TraceError::MissingSaved {
                kind: "tensor",
                slot,
            })?;
        Ok(self.push_tensor(values, |out| Op::LoadSavedTensor { out, slot }))
    }

    /// Loads a generator state saved by the forward pass.
    pub fn saved_state(&mut self, slot: usize) -> TraceResult<StateRef> {
        let value = self
            .saved_in
            .states
            .get(slot)
            .copied()
            .ok_or(TraceError::MissingSaved {
                kind: "state",
                slot,
            })?;
        let out = self.graph.state();
        self.graph.push(Op::LoadSavedState { out, slot });
        self.states.push(value);
        Ok(StateRef {
            slot: out,
            read: value.read,
        })
    }
}

/// Captures `function` on `generator`, executing it concretely.
///
/// The generator is advanced exactly as eager execution would advance it.
/// `saved` supplies the forward pass's activations when capturing a
/// backward pass.
pub fn trace<G, F>(
    tracker: &mut EffectTracker,
    generator: &mut G,
    function: &F,
    inputs: &[Vec<f64>],
    saved: Option<&SavedActivations>,
) -> TraceResult<Capture>
where
    G: StatefulGenerator,
    F: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>> + ?Sized,
{
    let entry = generator.capture();
    let session = tracker.begin_capture(entry);
    let mut ctx = TraceContext::new(generator, session, inputs, saved);
    let handles = ctx.inputs.clone();
    let outputs = function(&mut ctx, &handles)?;
    ctx.finish(&outputs)
}

/// Runs `function` eagerly on `generator`.
pub fn run_eager<G, F>(
    generator: &mut G,
    function: &F,
    inputs: &[Vec<f64>],
    saved: Option<&SavedActivations>,
) -> TraceResult<Invocation>
where
    G: StatefulGenerator,
    F: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>> + ?Sized,
{
    let mut tracker = EffectTracker::new();
    trace(&mut tracker, generator, function, inputs, saved).map(|capture| capture.run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectKind, StateEffect};
    use rngtrace_core::DeviceGenerator;

    type Ctx<'a> = TraceContext<'a, DeviceGenerator>;
    type Out = TraceResult<Vec<TensorRef>>;

    fn kinds(log: &EffectLog) -> Vec<EffectKind> {
        log.effects().iter().map(|e| e.effect.kind()).collect()
    }

    #[test]
    fn test_draw_records_consumed_units() {
        let f = |ctx: &mut Ctx<'_>, _: &[TensorRef]| -> Out { Ok(vec![ctx.rand(4)]) };
        let mut tracker = EffectTracker::new();
        let mut gen = DeviceGenerator::from_seed(1);
        let capture = trace(&mut tracker, &mut gen, &f, &[], None).unwrap();

        assert_eq!(
            capture.log.effects()[0].effect,
            StateEffect::Draw { consumed: 8 }
        );
        assert_eq!(capture.run.draws.len(), 1);
        assert_eq!(capture.run.outputs[0], capture.run.draws[0]);
    }

    #[test]
    fn test_state_effects_in_program_order() {
        let f = |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> Out {
            let state = ctx.get_state();
            let r = ctx.rand(4);
            ctx.set_state(state)?;
            let s = ctx.rand(4);
            let y = ctx.add(inputs[0], r)?;
            Ok(vec![ctx.add(y, s)?])
        };
        let mut tracker = EffectTracker::new();
        let mut gen = DeviceGenerator::from_seed(16);
        let capture = trace(&mut tracker, &mut gen, &f, &[vec![0.0; 4]], None).unwrap();

        use EffectKind::*;
        assert_eq!(kinds(&capture.log), vec![Read, Draw, Write, Draw]);
        // Both draws start from the same state, so they agree.
        assert_eq!(capture.run.draws[0], capture.run.draws[1]);
        assert_eq!(gen.capture().offset(), 8);
    }

    #[test]
    fn test_literal_restore_is_external() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let f = move |ctx: &mut Ctx<'_>, _: &[TensorRef]| -> Out {
            ctx.manual_seed(32);
            ctx.set_state(frozen)?;
            Ok(vec![ctx.rand(2)])
        };
        let mut tracker = EffectTracker::new();
        let mut gen = DeviceGenerator::from_seed(7);
        let capture = trace(&mut tracker, &mut gen, &f, &[], None).unwrap();

        let origins: Vec<_> = capture
            .log
            .effects()
            .iter()
            .filter_map(|e| match e.effect {
                StateEffect::Write { origin, .. } => Some(origin),
                _ => None,
            })
            .collect();
        assert_eq!(
            origins,
            vec![SnapshotOrigin::Seeded { seed: 32 }, SnapshotOrigin::External]
        );
    }

    #[test]
    fn test_invalid_dropout_probability() {
        let f = |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> Out { Ok(vec![ctx.dropout(inputs[0], 1.0)?]) };
        let mut gen = DeviceGenerator::from_seed(1);
        let err = run_eager(&mut gen, &f, &[vec![1.0; 4]], None).unwrap_err();
        assert_eq!(err, TraceError::InvalidProbability(1.0));
        // Nothing was drawn before the check.
        assert_eq!(gen.capture().offset(), 0);
    }

    #[test]
    fn test_error_ends_capture() {
        let f = |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> Out {
            let r = ctx.rand(3);
            Ok(vec![ctx.add(inputs[0], r)?])
        };
        let mut tracker = EffectTracker::new();
        let mut gen = DeviceGenerator::from_seed(1);
        let err = trace(&mut tracker, &mut gen, &f, &[vec![1.0; 4]], None).unwrap_err();
        assert!(matches!(err, TraceError::ShapeMismatch { op: "add", .. }));
        assert!(!tracker.is_capturing());
    }

    #[test]
    fn test_saved_state_keeps_read_identity() {
        let forward = |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> Out {
            let state = ctx.get_state();
            ctx.save_state(state)?;
            ctx.save_tensor(inputs[0])?;
            Ok(vec![ctx.rand(4)])
        };
        let backward = |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> Out {
            let state = ctx.saved_state(0)?;
            let x = ctx.saved_tensor(0)?;
            ctx.set_state(state)?;
            let r = ctx.rand(4);
            let y = ctx.mul(inputs[0], r)?;
            Ok(vec![ctx.mul(y, x)?])
        };

        let mut tracker = EffectTracker::new();
        let mut gen = DeviceGenerator::from_seed(16);
        let fwd = trace(&mut tracker, &mut gen, &forward, &[vec![2.0; 4]], None).unwrap();
        let bwd = trace(
            &mut tracker,
            &mut gen,
            &backward,
            &[vec![1.0; 4]],
            Some(&fwd.run.saved),
        )
        .unwrap();

        let read = fwd.run.saved.states[0].read;
        assert_eq!(
            bwd.log.effects()[0].effect,
            StateEffect::Write {
                snapshot: GeneratorStateSnapshot::new(16, 0),
                origin: SnapshotOrigin::Traced { read },
            }
        );
        // Backward replays the forward's draws.
        assert_eq!(bwd.run.draws[0], fwd.run.draws[0]);
        assert!(bwd.graph.loads_saved());
    }

    #[test]
    fn test_missing_saved_slot() {
        let backward = |ctx: &mut Ctx<'_>, _: &[TensorRef]| -> Out {
            let _ = ctx.saved_state(0)?;
            Ok(vec![])
        };
        let mut gen = DeviceGenerator::from_seed(16);
        let err = run_eager(&mut gen, &backward, &[], None).unwrap_err();
        assert_eq!(
            err,
            TraceError::MissingSaved {
                kind: "state",
                slot: 0
            }
        );
    }

    #[test]
    fn test_input_out_of_range() {
        let f = |ctx: &mut Ctx<'_>, _: &[TensorRef]| -> Out { Ok(vec![ctx.input(1)?]) };
        let mut gen = DeviceGenerator::from_seed(16);
        let err = run_eager(&mut gen, &f, &[vec![1.0]], None).unwrap_err();
        assert_eq!(
            err,
            TraceError::InputCount {
                expected: 2,
                actual: 1
            }
        );
    }
}
