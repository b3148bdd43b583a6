//! Compiled forward/backward pairs.
//!
//! A [`CompiledFunction`] holds the two artifacts produced by
//! [`Compiler::compile_function`](crate::compiler::Compiler::compile_function).
//! The backward consumes the activations its forward saved, including
//! generator states, so a backward can replay the forward's draws.

use rngtrace_core::StatefulGenerator;

use crate::compiler::CompiledCallable;
use crate::context::{Invocation, SavedActivations};
use crate::error::ExecError;

/// Forward and backward artifacts of one custom function.
#[derive(Clone, Debug)]
pub struct CompiledFunction {
    forward: CompiledCallable,
    backward: CompiledCallable,
}

impl CompiledFunction {
    /// Pairs two compiled artifacts.
    pub fn new(forward: CompiledCallable, backward: CompiledCallable) -> Self {
        Self { forward, backward }
    }

    /// The forward artifact.
    pub fn forward_callable(&self) -> &CompiledCallable {
        &self.forward
    }

    /// The backward artifact.
    pub fn backward_callable(&self) -> &CompiledCallable {
        &self.backward
    }

    /// Runs the forward pass.
    pub fn forward<G: StatefulGenerator + ?Sized>(
        &self,
        inputs: &[Vec<f64>],
        generator: &mut G,
    ) -> Result<Invocation, ExecError> {
        self.forward.invoke(inputs, generator)
    }

    /// Runs the backward pass on incoming gradients.
    ///
    /// `saved` must be the activations of a forward invocation of this
    /// function.
    pub fn backward<G: StatefulGenerator + ?Sized>(
        &self,
        saved: &SavedActivations,
        grads: &[Vec<f64>],
        generator: &mut G,
    ) -> Result<Invocation, ExecError> {
        let (tensors, states) = self.forward.graph().saved_counts();
        if saved.tensors.len() != tensors || saved.states.len() != states {
            return Err(ExecError::SavedMismatch(format!(
                "forward saves {tensors} tensors and {states} states, got {} and {}",
                saved.tensors.len(),
                saved.states.len()
            )));
        }
        self.backward.invoke_with_saved(grads, generator, saved)
    }
}
