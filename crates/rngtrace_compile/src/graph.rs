//! Captured trace graph.
//!
//! A [`Graph`] is a linear op list over numbered tensor and state slots, in
//! the order the traced function executed them. Generator effects appear as
//! ops of their own, so an executor that runs the list front to back applies
//! them in the validated order.

use std::fmt;

use rngtrace_core::GeneratorStateSnapshot;

use crate::effect::ReadId;
use crate::kernels::{BinaryOp, UnaryOp};

/// Handle of a tensor produced during capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TensorRef(pub(crate) usize);

impl TensorRef {
    /// Slot index in the graph.
    #[inline]
    pub fn slot(self) -> usize {
        self.0
    }
}

/// Handle of a generator state produced by `get_state` or loaded from saved
/// activations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateRef {
    pub(crate) slot: usize,
    pub(crate) read: ReadId,
}

impl StateRef {
    /// Slot index in the graph.
    #[inline]
    pub fn slot(self) -> usize {
        self.slot
    }

    /// The read this state value came from.
    #[inline]
    pub fn read(self) -> ReadId {
        self.read
    }
}

/// Value passed to `set_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateSource {
    /// A state read inside the traced region.
    Traced(StateRef),
    /// A snapshot captured before the region and closed over.
    Literal(GeneratorStateSnapshot),
}

impl From<StateRef> for StateSource {
    fn from(state: StateRef) -> Self {
        StateSource::Traced(state)
    }
}

impl From<GeneratorStateSnapshot> for StateSource {
    fn from(snapshot: GeneratorStateSnapshot) -> Self {
        StateSource::Literal(snapshot)
    }
}

/// Operand of a recorded `set_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateOperand {
    /// State slot
    Slot(usize),
    /// Baked literal
    Literal(GeneratorStateSnapshot),
}

/// One recorded operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Bind function input `index` to tensor slot `out`.
    Input {
        /// Output slot
        out: usize,
        /// Input position
        index: usize,
    },
    /// Uniform draw.
    Rand {
        /// Output slot
        out: usize,
        /// Number of values
        len: usize,
    },
    /// Standard normal draw.
    Randn {
        /// Output slot
        out: usize,
        /// Number of values
        len: usize,
    },
    /// Inverted dropout with a freshly drawn uniform mask.
    Dropout {
        /// Output slot
        out: usize,
        /// Input slot
        input: usize,
        /// Drop probability
        p: f64,
    },
    /// Elementwise binary op.
    Binary {
        /// Output slot
        out: usize,
        /// Operation
        op: BinaryOp,
        /// Left operand slot
        lhs: usize,
        /// Right operand slot
        rhs: usize,
    },
    /// Elementwise unary op.
    Unary {
        /// Output slot
        out: usize,
        /// Operation
        op: UnaryOp,
        /// Input slot
        input: usize,
    },
    /// Sum reduction.
    Sum {
        /// Output slot
        out: usize,
        /// Input slot
        input: usize,
    },
    /// Column sums of a row-major matrix.
    SumColumns {
        /// Output slot
        out: usize,
        /// Input slot
        input: usize,
        /// Row width
        width: usize,
    },
    /// Multiplication by a constant.
    Scale {
        /// Output slot
        out: usize,
        /// Input slot
        input: usize,
        /// Constant factor
        factor: f64,
    },
    /// Generator state read.
    GetState {
        /// Output state slot
        out: usize,
        /// Read handle assigned at capture
        read: ReadId,
    },
    /// Generator state write.
    SetState {
        /// State written
        source: StateOperand,
    },
    /// Reseed.
    ManualSeed {
        /// New seed
        seed: u64,
    },
    /// Save a tensor for the backward pass.
    SaveTensor {
        /// Tensor slot
        input: usize,
        /// Saved-activation slot
        slot: usize,
    },
    /// Save a generator state for the backward pass.
    SaveState {
        /// State slot
        state: usize,
        /// Read the state came from
        read: ReadId,
        /// Saved-activation slot
        slot: usize,
    },
    /// Load a tensor saved by the forward pass.
    LoadSavedTensor {
        /// Output slot
        out: usize,
        /// Saved-activation slot
        slot: usize,
    },
    /// Load a generator state saved by the forward pass.
    LoadSavedState {
        /// Output state slot
        out: usize,
        /// Saved-activation slot
        slot: usize,
    },
}

impl Op {
    /// Returns true if executing this op touches the generator.
    pub fn touches_generator(&self) -> bool {
        matches!(
            self,
            Op::Rand { .. }
                | Op::Randn { .. }
                | Op::Dropout { .. }
                | Op::GetState { .. }
                | Op::SetState { .. }
                | Op::ManualSeed { .. }
        )
    }
}

/// Captured trace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub(crate) ops: Vec<Op>,
    pub(crate) input_lens: Vec<usize>,
    pub(crate) outputs: Vec<usize>,
    pub(crate) tensor_slots: usize,
    pub(crate) state_slots: usize,
    pub(crate) saved_tensors: usize,
    pub(crate) saved_states: usize,
    pub(crate) loads_saved: bool,
}

impl Graph {
    /// Ops in execution order.
    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Lengths of the inputs the trace was captured with.
    #[inline]
    pub fn input_lens(&self) -> &[usize] {
        &self.input_lens
    }

    /// Tensor slots returned as outputs.
    #[inline]
    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    /// Number of tensor slots.
    #[inline]
    pub fn tensor_slots(&self) -> usize {
        self.tensor_slots
    }

    /// Number of state slots.
    #[inline]
    pub fn state_slots(&self) -> usize {
        self.state_slots
    }

    /// Numbers of tensors and states the graph saves for a backward pass.
    #[inline]
    pub fn saved_counts(&self) -> (usize, usize) {
        (self.saved_tensors, self.saved_states)
    }

    /// Returns true if the graph reads activations saved by a forward pass.
    #[inline]
    pub fn loads_saved(&self) -> bool {
        self.loads_saved
    }

    /// Number of ops that touch the generator.
    pub fn generator_ops(&self) -> usize {
        self.ops.iter().filter(|op| op.touches_generator()).count()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lens: Vec<String> = self.input_lens.iter().map(|l| format!("[{l}]")).collect();
        writeln!(f, "graph({}):", lens.join(", "))?;
        for op in &self.ops {
            write!(f, "    ")?;
            match op {
                Op::Input { out, index } => writeln!(f, "t{out} = input({index})")?,
                Op::Rand { out, len } => writeln!(f, "t{out} = rand({len})")?,
                Op::Randn { out, len } => writeln!(f, "t{out} = randn({len})")?,
                Op::Dropout { out, input, p } => writeln!(f, "t{out} = dropout(t{input}, p={p})")?,
                Op::Binary { out, op, lhs, rhs } => {
                    writeln!(f, "t{out} = {}(t{lhs}, t{rhs})", op.name())?
                }
                Op::Unary { out, op, input } => writeln!(f, "t{out} = {}(t{input})", op.name())?,
                Op::Sum { out, input } => writeln!(f, "t{out} = sum(t{input})")?,
                Op::SumColumns { out, input, width } => {
                    writeln!(f, "t{out} = sum_columns(t{input}, width={width})")?
                }
                Op::Scale { out, input, factor } => {
                    writeln!(f, "t{out} = scale(t{input}, {factor})")?
                }
                Op::GetState { out, read } => writeln!(f, "s{out} = get_state()  # read {}", read.0)?,
                Op::SetState { source } => match source {
                    StateOperand::Slot(slot) => writeln!(f, "set_state(s{slot})")?,
                    StateOperand::Literal(snapshot) => {
                        writeln!(f, "set_state(<literal {snapshot}>)")?
                    }
                },
                Op::ManualSeed { seed } => writeln!(f, "manual_seed({seed})")?,
                Op::SaveTensor { input, slot } => writeln!(f, "saved.tensor[{slot}] = t{input}")?,
                Op::SaveState { state, slot, .. } => writeln!(f, "saved.state[{slot}] = s{state}")?,
                Op::LoadSavedTensor { out, slot } => writeln!(f, "t{out} = saved.tensor[{slot}]")?,
                Op::LoadSavedState { out, slot } => writeln!(f, "s{out} = saved.state[{slot}]")?,
            }
        }
        let outputs: Vec<String> = self.outputs.iter().map(|o| format!("t{o}")).collect();
        write!(f, "    return ({})", outputs.join(", "))
    }
}

/// Incremental graph construction, used by the trace context.
#[derive(Debug, Default)]
pub(crate) struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub(crate) fn new(input_lens: Vec<usize>) -> Self {
        Self {
            graph: Graph {
                input_lens,
                ..Graph::default()
            },
        }
    }

    pub(crate) fn tensor(&mut self) -> usize {
        let slot = self.graph.tensor_slots;
        self.graph.tensor_slots += 1;
        slot
    }

    pub(crate) fn state(&mut self) -> usize {
        let slot = self.graph.state_slots;
        self.graph.state_slots += 1;
        slot
    }

    pub(crate) fn saved_tensor(&mut self) -> usize {
        let slot = self.graph.saved_tensors;
        self.graph.saved_tensors += 1;
        slot
    }

    pub(crate) fn saved_state(&mut self) -> usize {
        let slot = self.graph.saved_states;
        self.graph.saved_states += 1;
        slot
    }

    pub(crate) fn push(&mut self, op: Op) {
        if matches!(op, Op::LoadSavedTensor { .. } | Op::LoadSavedState { .. }) {
            self.graph.loads_saved = true;
        }
        self.graph.ops.push(op);
    }

    pub(crate) fn finish(mut self, outputs: &[TensorRef]) -> Graph {
        self.graph.outputs = outputs.iter().map(|t| t.0).collect();
        self.graph
    }
}
