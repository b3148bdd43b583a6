//! Execution driver: eager versus compiled comparison.
//!
//! The [`Driver`] runs a traced function three ways and reports whether the
//! compiled artifact reproduced eager execution bit for bit:
//!
//! - [`Driver::direct`]: compile once, invoke from several entry states
//! - [`Driver::checkpointed`]: forward plus checkpoint recompute, repeated
//! - [`Driver::forward_backward`]: a compiled forward/backward pair with a
//!   reseed between the passes
//!
//! Validator rejections are outcomes, not errors: a scenario may be expected
//! to be rejected.

use rngtrace_core::{DeviceGenerator, GeneratorStateSnapshot, StatefulGenerator};
use thiserror::Error;
use tracing::{debug, info};

use crate::checkpoint::CheckpointedRegion;
use crate::compiler::Compiler;
use crate::context::{run_eager, Invocation, TraceContext};
use crate::error::{
    CheckpointError, CompileError, ExecError, PatternKind, TraceError, TraceResult,
    UnsupportedPattern,
};
use crate::graph::TensorRef;

/// Errors that stop a driver run.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Eager execution failed.
    #[error("Eager execution failed: {0}")]
    Eager(#[from] TraceError),

    /// A compiled artifact failed.
    #[error("Compiled execution failed: {0}")]
    Exec(#[from] ExecError),

    /// A checkpointed region failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Compilation failed for a reason other than a validator rejection.
    #[error("Compilation failed: {0}")]
    Compile(CompileError),
}

/// Result type for driver runs.
pub type DriverResult<T> = Result<T, DriverError>;

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Compiled execution matched eager execution everywhere.
    Consistent,
    /// The validator refused to compile.
    Rejected(UnsupportedPattern),
    /// Compiled execution produced different values or state.
    Diverged(String),
}

impl std::fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consistent => write!(f, "consistent"),
            Self::Rejected(pattern) => write!(f, "rejected: {pattern}"),
            Self::Diverged(detail) => write!(f, "diverged: {detail}"),
        }
    }
}

/// What a scenario is expected to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// Compiles and matches eager execution.
    Succeeds,
    /// Is rejected with the given pattern.
    Rejects(PatternKind),
}

impl Expectation {
    /// Returns true if `outcome` is what was expected.
    pub fn is_met_by(&self, outcome: &ScenarioOutcome) -> bool {
        match (self, outcome) {
            (Expectation::Succeeds, ScenarioOutcome::Consistent) => true,
            (Expectation::Rejects(kind), ScenarioOutcome::Rejected(pattern)) => {
                pattern.kind() == *kind
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeds => write!(f, "succeeds"),
            Self::Rejects(kind) => write!(f, "rejects with {kind}"),
        }
    }
}

/// Outcome of a checkpointed run with the generator state observed before
/// each iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointReport {
    /// How the run ended
    pub outcome: ScenarioOutcome,
    /// Generator state at the start of every completed iteration
    pub progression: Vec<GeneratorStateSnapshot>,
}

/// Bitwise comparison of two executions; returns the first difference.
pub fn compare_invocations(eager: &Invocation, compiled: &Invocation) -> Option<String> {
    fn first_difference(what: &str, a: &[Vec<f64>], b: &[Vec<f64>]) -> Option<String> {
        if a.len() != b.len() {
            return Some(format!("{what}: {} tensors vs {}", a.len(), b.len()));
        }
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            if x.len() != y.len() {
                return Some(format!("{what}[{i}]: length {} vs {}", x.len(), y.len()));
            }
            if let Some(j) = x.iter().zip(y).position(|(p, q)| p.to_bits() != q.to_bits()) {
                return Some(format!("{what}[{i}][{j}]: {} vs {}", x[j], y[j]));
            }
        }
        None
    }

    first_difference("outputs", &eager.outputs, &compiled.outputs)
        .or_else(|| first_difference("draws", &eager.draws, &compiled.draws))
        .or_else(|| first_difference("saved tensors", &eager.saved.tensors, &compiled.saved.tensors))
        .or_else(|| {
            let a: Vec<_> = eager.saved.states.iter().map(|s| s.snapshot).collect();
            let b: Vec<_> = compiled.saved.states.iter().map(|s| s.snapshot).collect();
            (a != b).then(|| format!("saved states: {a:?} vs {b:?}"))
        })
}

fn compare_states(
    what: &str,
    eager: GeneratorStateSnapshot,
    compiled: GeneratorStateSnapshot,
) -> Option<String> {
    (eager != compiled).then(|| format!("{what}: eager ({eager}) vs compiled ({compiled})"))
}

/// Runs traced functions eagerly and compiled, and compares.
#[derive(Debug, Default)]
pub struct Driver {
    compiler: Compiler,
}

impl Driver {
    /// Creates a driver that compiles with `compiler`.
    pub fn new(compiler: Compiler) -> Self {
        Self { compiler }
    }

    /// The compiler in use.
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Compiles `function` once, then from every entry state compares eager
    /// and compiled outputs, draws and exit state.
    pub fn direct<F>(
        &self,
        function: &F,
        inputs: &[Vec<f64>],
        entries: &[GeneratorStateSnapshot],
    ) -> DriverResult<ScenarioOutcome>
    where
        F: Fn(&mut TraceContext<'_, DeviceGenerator>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>
            + ?Sized,
    {
        let capture_state = entries
            .first()
            .copied()
            .unwrap_or_else(|| GeneratorStateSnapshot::new(0, 0));
        let compiled = match self.compiler.compile(
            function,
            inputs,
            &DeviceGenerator::from_snapshot(&capture_state),
        ) {
            Ok(compiled) => compiled,
            Err(err) => return rejection(err),
        };

        for entry in entries {
            let mut eager_gen = DeviceGenerator::from_snapshot(entry);
            let eager = run_eager(&mut eager_gen, function, inputs, None)?;

            let mut compiled_gen = DeviceGenerator::from_snapshot(entry);
            let replay = compiled.invoke(inputs, &mut compiled_gen)?;

            let difference = compare_invocations(&eager, &replay).or_else(|| {
                compare_states("exit state", eager_gen.capture(), compiled_gen.capture())
            });
            if let Some(detail) = difference {
                return Ok(ScenarioOutcome::Diverged(format!("from ({entry}): {detail}")));
            }
            debug!(%entry, "compiled run matches eager");
        }

        info!(entries = entries.len(), "direct runs consistent");
        Ok(ScenarioOutcome::Consistent)
    }

    /// Runs a checkpointed region `iterations` times from `seed`.
    ///
    /// Each iteration runs forward and then recomputes, as a backward pass
    /// would. The recompute must replay the forward's draws exactly, and the
    /// compiled generator must track an eager generator running the same
    /// sequence.
    pub fn checkpointed<F>(
        &self,
        function: &F,
        inputs: &[Vec<f64>],
        seed: u64,
        iterations: usize,
    ) -> DriverResult<CheckpointReport>
    where
        F: Fn(&mut TraceContext<'_, DeviceGenerator>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>
            + ?Sized,
    {
        let mut progression = Vec::with_capacity(iterations);
        let mut gen = DeviceGenerator::from_seed(seed);
        let callable = match self.compiler.compile_recompute(function, inputs, &gen) {
            Ok(callable) => callable,
            Err(err) => {
                return rejection(err).map(|outcome| CheckpointReport {
                    outcome,
                    progression,
                })
            }
        };
        let mut region = CheckpointedRegion::new(callable);
        let mut eager_gen = DeviceGenerator::from_seed(seed);

        for iteration in 0..iterations {
            let state = gen.capture();
            info!(iteration, %state, "checkpointed iteration");
            progression.push(state);

            let eager_entry = eager_gen.capture();
            let eager = run_eager(&mut eager_gen, function, inputs, None)?;
            let eager_exit = eager_gen.capture();
            eager_gen.restore(&eager_entry);
            let eager_recompute = run_eager(&mut eager_gen, function, inputs, None)?;
            eager_gen.restore(&eager_exit);

            let forward = region.forward(inputs, &mut gen)?;
            let recompute = region.recompute(inputs, &mut gen)?;

            let difference = compare_invocations(&eager, &forward)
                .map(|d| format!("forward {d}"))
                .or_else(|| compare_invocations(&forward, &recompute).map(|d| format!("recompute {d}")))
                .or_else(|| {
                    compare_invocations(&eager_recompute, &recompute)
                        .map(|d| format!("eager recompute {d}"))
                })
                .or_else(|| compare_states("state after backward", eager_gen.capture(), gen.capture()));
            if let Some(detail) = difference {
                return Ok(CheckpointReport {
                    outcome: ScenarioOutcome::Diverged(format!("iteration {iteration}: {detail}")),
                    progression,
                });
            }
        }

        Ok(CheckpointReport {
            outcome: ScenarioOutcome::Consistent,
            progression,
        })
    }

    /// Runs a forward/backward pair eagerly and compiled from `seed`,
    /// reseeding to `backward_seed` between the passes when given.
    pub fn forward_backward<F, B>(
        &self,
        forward: &F,
        backward: &B,
        inputs: &[Vec<f64>],
        grad_lens: &[usize],
        seed: u64,
        backward_seed: Option<u64>,
    ) -> DriverResult<ScenarioOutcome>
    where
        F: Fn(&mut TraceContext<'_, DeviceGenerator>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>
            + ?Sized,
        B: Fn(&mut TraceContext<'_, DeviceGenerator>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>
            + ?Sized,
    {
        let compiled = match self.compiler.compile_function(
            forward,
            backward,
            inputs,
            grad_lens,
            &DeviceGenerator::from_seed(seed),
        ) {
            Ok(compiled) => compiled,
            Err(err) => return rejection(err),
        };
        let grads: Vec<Vec<f64>> = grad_lens.iter().map(|&len| vec![1.0; len]).collect();

        let mut eager_gen = DeviceGenerator::from_seed(seed);
        let eager_fwd = run_eager(&mut eager_gen, forward, inputs, None)?;
        if let Some(s) = backward_seed {
            eager_gen.manual_seed(s);
        }
        let eager_bwd = run_eager(&mut eager_gen, backward, &grads, Some(&eager_fwd.saved))?;

        let mut gen = DeviceGenerator::from_seed(seed);
        let fwd = compiled.forward(inputs, &mut gen)?;
        if let Some(s) = backward_seed {
            gen.manual_seed(s);
        }
        let bwd = compiled.backward(&fwd.saved, &grads, &mut gen)?;

        let difference = compare_invocations(&eager_fwd, &fwd)
            .map(|d| format!("forward {d}"))
            .or_else(|| compare_invocations(&eager_bwd, &bwd).map(|d| format!("backward {d}")))
            .or_else(|| compare_states("exit state", eager_gen.capture(), gen.capture()));
        Ok(match difference {
            Some(detail) => ScenarioOutcome::Diverged(detail),
            None => ScenarioOutcome::Consistent,
        })
    }
}

fn rejection(err: CompileError) -> DriverResult<ScenarioOutcome> {
    match err {
        CompileError::Unsupported(pattern) => Ok(ScenarioOutcome::Rejected(pattern)),
        other => Err(DriverError::Compile(other)),
    }
}
