//! Checkpointed regions.
//!
//! A [`CheckpointedRegion`] runs a compiled artifact forward, keeps only the
//! generator state it was entered with, and recomputes the forward on
//! demand during backward. The recompute forks the generator: the caller's
//! current state is saved, the entry state restored, the artifact replayed,
//! and the caller's state put back. Backward therefore sees the same draws
//! as forward without disturbing the stream it is itself drawing from.

use rngtrace_core::{GeneratorStateSnapshot, StatefulGenerator};
use tracing::debug;

use crate::compiler::CompiledCallable;
use crate::context::Invocation;
use crate::error::{CheckpointError, CheckpointResult};

/// Compiled region whose forward is recomputed instead of stored.
///
/// The callable should come from
/// [`Compiler::compile_recompute`](crate::compiler::Compiler::compile_recompute),
/// which validates it for re-execution.
///
/// # Example
///
/// ```rust
/// use rngtrace_compile::checkpoint::CheckpointedRegion;
/// use rngtrace_compile::compiler::Compiler;
/// use rngtrace_compile::context::TraceContext;
/// use rngtrace_compile::error::TraceResult;
/// use rngtrace_compile::graph::TensorRef;
/// use rngtrace_core::{DeviceGenerator, StatefulGenerator};
///
/// fn block(
///     ctx: &mut TraceContext<'_, DeviceGenerator>,
///     inputs: &[TensorRef],
/// ) -> TraceResult<Vec<TensorRef>> {
///     let noise = ctx.rand(4);
///     let x = ctx.add(inputs[0], noise)?;
///     Ok(vec![ctx.dropout(x, 0.5)?])
/// }
///
/// let x = vec![vec![0.5; 4]];
/// let mut gen = DeviceGenerator::from_seed(16);
/// let callable = Compiler::default().compile_recompute(block, &x, &gen)?;
/// let mut region = CheckpointedRegion::new(callable);
///
/// let forward = region.forward(&x, &mut gen)?;
/// let after_forward = gen.capture();
/// let recomputed = region.recompute(&x, &mut gen)?;
///
/// assert_eq!(recomputed.draws, forward.draws);
/// assert_eq!(gen.capture(), after_forward);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct CheckpointedRegion {
    callable: CompiledCallable,
    entry: Option<GeneratorStateSnapshot>,
    recomputes: usize,
}

impl CheckpointedRegion {
    /// Wraps a compiled region.
    pub fn new(callable: CompiledCallable) -> Self {
        Self {
            callable,
            entry: None,
            recomputes: 0,
        }
    }

    /// State the last forward call was entered with.
    #[inline]
    pub fn entry(&self) -> Option<GeneratorStateSnapshot> {
        self.entry
    }

    /// Number of recomputes performed.
    #[inline]
    pub fn recomputes(&self) -> usize {
        self.recomputes
    }

    /// Runs the region forward, remembering the entry state.
    pub fn forward<G: StatefulGenerator + ?Sized>(
        &mut self,
        inputs: &[Vec<f64>],
        generator: &mut G,
    ) -> CheckpointResult<Invocation> {
        let entry = generator.capture();
        let result = self.callable.invoke(inputs, generator)?;
        self.entry = Some(entry);
        Ok(result)
    }

    /// Replays the last forward from its entry state on a fork of
    /// `generator`.
    ///
    /// On return the generator is back where it was before the call, also
    /// when the replay fails.
    pub fn recompute<G: StatefulGenerator + ?Sized>(
        &mut self,
        inputs: &[Vec<f64>],
        generator: &mut G,
    ) -> CheckpointResult<Invocation> {
        let entry = self.entry.ok_or(CheckpointError::NoForward)?;
        let current = generator.capture();
        debug!(%entry, %current, "recomputing checkpointed region");

        generator.restore(&entry);
        let result = self.callable.invoke(inputs, generator);
        generator.restore(&current);

        self.recomputes += 1;
        Ok(result?)
    }
}
