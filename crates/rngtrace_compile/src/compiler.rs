//! Trace compilation.
//!
//! [`Compiler`] captures a function on a private copy of the caller's
//! generator, validates the generator effects, and submits the graph with
//! the verdict to a [`TraceBackend`]. The backend either finalises a
//! [`CompiledCallable`] or fails with the validator's diagnostic.
//!
//! # Example
//!
//! ```rust
//! use rngtrace_compile::compiler::Compiler;
//! use rngtrace_compile::context::{run_eager, TraceContext};
//! use rngtrace_compile::error::TraceResult;
//! use rngtrace_compile::graph::TensorRef;
//! use rngtrace_core::DeviceGenerator;
//!
//! fn noisy(
//!     ctx: &mut TraceContext<'_, DeviceGenerator>,
//!     inputs: &[TensorRef],
//! ) -> TraceResult<Vec<TensorRef>> {
//!     let state = ctx.get_state();
//!     let _discarded = ctx.rand(4);
//!     ctx.set_state(state)?;
//!     let noise = ctx.rand(4);
//!     Ok(vec![ctx.add(inputs[0], noise)?])
//! }
//!
//! let x = vec![vec![1.0; 4]];
//! let compiled = Compiler::default().compile(noisy, &x, &DeviceGenerator::from_seed(0))?;
//!
//! let mut gen = DeviceGenerator::from_seed(16);
//! let mut eager_gen = gen.clone();
//! let out = compiled.invoke(&x, &mut gen)?;
//! let expected = run_eager(&mut eager_gen, &noisy, &x, None)?;
//! assert_eq!(out.outputs, expected.outputs);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use rngtrace_core::StatefulGenerator;
use tracing::{info, warn};

use crate::autograd::CompiledFunction;
use crate::config::CompilerConfig;
use crate::context::{trace, Invocation, SavedActivations, TraceContext};
use crate::error::{CompileError, ExecError, TraceResult};
use crate::graph::{Graph, TensorRef};
use crate::interpreter;
use crate::tracker::EffectTracker;
use crate::validator::{ConsistencyValidator, Verdict};

/// Finalises a validated trace into an executable artifact.
pub trait TraceBackend {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Builds a callable, or fails if `verdict` is unsupported.
    fn submit(&self, graph: Graph, verdict: &Verdict) -> Result<CompiledCallable, CompileError>;
}

/// Backend that executes graphs with the [`interpreter`].
#[derive(Clone, Copy, Debug, Default)]
pub struct InterpreterBackend;

impl TraceBackend for InterpreterBackend {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn submit(&self, graph: Graph, verdict: &Verdict) -> Result<CompiledCallable, CompileError> {
        match verdict {
            Verdict::Supported => Ok(CompiledCallable::new(graph)),
            Verdict::Unsupported(pattern) => Err(CompileError::Unsupported(pattern.clone())),
        }
    }
}

/// Backend wrapper that logs every submitted graph before delegating.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrintingBackend<B> {
    inner: B,
}

impl<B: TraceBackend> PrintingBackend<B> {
    /// Wraps `inner`.
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

impl<B: TraceBackend> TraceBackend for PrintingBackend<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn submit(&self, graph: Graph, verdict: &Verdict) -> Result<CompiledCallable, CompileError> {
        info!(backend = self.inner.name(), "captured graph\n{graph}");
        self.inner.submit(graph, verdict)
    }
}

/// Immutable artifact bound to one validated graph.
///
/// Cheap to clone and safe to share across threads; each invocation takes
/// the generator of its own execution unit.
#[derive(Clone, Debug)]
pub struct CompiledCallable {
    graph: Arc<Graph>,
}

impl CompiledCallable {
    /// Wraps a validated graph.
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    /// The compiled graph.
    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Runs the artifact, applying generator effects to `generator` in the
    /// validated order.
    pub fn invoke<G: StatefulGenerator + ?Sized>(
        &self,
        inputs: &[Vec<f64>],
        generator: &mut G,
    ) -> Result<Invocation, ExecError> {
        interpreter::execute(&self.graph, inputs, generator, None)
    }

    /// Runs a backward artifact with the activations its forward saved.
    pub fn invoke_with_saved<G: StatefulGenerator + ?Sized>(
        &self,
        inputs: &[Vec<f64>],
        generator: &mut G,
        saved: &SavedActivations,
    ) -> Result<Invocation, ExecError> {
        interpreter::execute(&self.graph, inputs, generator, Some(saved))
    }
}

/// Capture, validation and submission front end.
pub struct Compiler {
    config: CompilerConfig,
    validator: ConsistencyValidator,
    backend: Box<dyn TraceBackend + Send + Sync>,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl Compiler {
    /// Creates a compiler with the interpreter backend, wrapped in a
    /// [`PrintingBackend`] when `print_graph` is set.
    pub fn new(config: CompilerConfig) -> Self {
        if config.print_graph {
            Self::with_backend(config, PrintingBackend::new(InterpreterBackend))
        } else {
            Self::with_backend(config, InterpreterBackend)
        }
    }

    /// Creates a compiler that submits to `backend`.
    pub fn with_backend(
        config: CompilerConfig,
        backend: impl TraceBackend + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            validator: ConsistencyValidator::new(config.validator),
            backend: Box::new(backend),
        }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// The validator used for every compilation.
    #[inline]
    pub fn validator(&self) -> &ConsistencyValidator {
        &self.validator
    }

    fn submit(&self, graph: Graph, verdict: &Verdict) -> Result<CompiledCallable, CompileError> {
        let ops = graph.ops().len();
        let generator_ops = graph.generator_ops();
        match self.backend.submit(graph, verdict) {
            Ok(callable) => {
                info!(backend = self.backend.name(), ops, generator_ops, "compiled trace");
                Ok(callable)
            }
            Err(err) => {
                warn!(backend = self.backend.name(), error = %err, "compilation failed");
                Err(err)
            }
        }
    }

    /// Compiles `function`, capturing it on a copy of `generator`.
    ///
    /// The caller's generator is not advanced.
    pub fn compile<G, F>(
        &self,
        function: F,
        example_inputs: &[Vec<f64>],
        generator: &G,
    ) -> Result<CompiledCallable, CompileError>
    where
        G: StatefulGenerator + Clone,
        F: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>,
    {
        let mut scratch = generator.clone();
        let mut tracker = EffectTracker::new();
        let capture = trace(&mut tracker, &mut scratch, &function, example_inputs, None)?;
        let verdict = self.validator.validate(&capture.log);
        self.submit(capture.graph, &verdict)
    }

    /// Compiles `function` as a checkpointed region whose forward will be
    /// recomputed during backward.
    pub fn compile_recompute<G, F>(
        &self,
        function: F,
        example_inputs: &[Vec<f64>],
        generator: &G,
    ) -> Result<CompiledCallable, CompileError>
    where
        G: StatefulGenerator + Clone,
        F: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>,
    {
        let mut scratch = generator.clone();
        let mut tracker = EffectTracker::new();
        let capture = trace(&mut tracker, &mut scratch, &function, example_inputs, None)?;
        let verdict = self.validator.validate_recompute(&capture.log);
        self.submit(capture.graph, &verdict)
    }

    /// Compiles a forward/backward pair.
    ///
    /// The backward is captured right after the forward, on the same
    /// generator copy, with the forward's saved activations and unit
    /// gradients of lengths `grad_lens`. Both passes are validated together,
    /// so the backward may restore states the forward read.
    pub fn compile_function<G, F, B>(
        &self,
        forward: F,
        backward: B,
        example_inputs: &[Vec<f64>],
        grad_lens: &[usize],
        generator: &G,
    ) -> Result<CompiledFunction, CompileError>
    where
        G: StatefulGenerator + Clone,
        F: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>,
        B: Fn(&mut TraceContext<'_, G>, &[TensorRef]) -> TraceResult<Vec<TensorRef>>,
    {
        let mut scratch = generator.clone();
        let mut tracker = EffectTracker::new();
        let fwd = trace(&mut tracker, &mut scratch, &forward, example_inputs, None)?;

        let grads: Vec<Vec<f64>> = grad_lens.iter().map(|&len| vec![1.0; len]).collect();
        let bwd = trace(
            &mut tracker,
            &mut scratch,
            &backward,
            &grads,
            Some(&fwd.run.saved),
        )?;

        let verdict = self.validator.validate_passes(&[&fwd.log, &bwd.log]);
        let forward = self.submit(fwd.graph, &verdict)?;
        let backward = self.submit(bwd.graph, &verdict)?;
        Ok(CompiledFunction::new(forward, backward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;
    use crate::error::PatternKind;
    use rngtrace_core::{DeviceGenerator, GeneratorStateSnapshot};

    type Ctx<'a> = TraceContext<'a, DeviceGenerator>;

    fn draws_only(ctx: &mut Ctx<'_>, inputs: &[TensorRef]) -> TraceResult<Vec<TensorRef>> {
        let noise = ctx.rand(4);
        Ok(vec![ctx.add(inputs[0], noise)?])
    }

    #[test]
    fn test_compile_leaves_caller_generator_untouched() {
        let gen = DeviceGenerator::from_seed(16);
        let before = gen.capture();
        Compiler::default()
            .compile(draws_only, &[vec![0.0; 4]], &gen)
            .unwrap();
        assert_eq!(gen.capture(), before);
    }

    #[test]
    fn test_rejection_is_compile_error() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let f = move |ctx: &mut Ctx<'_>, inputs: &[TensorRef]| -> TraceResult<Vec<TensorRef>> {
            ctx.manual_seed(32);
            let a = ctx.rand(4);
            ctx.set_state(frozen)?;
            let b = ctx.rand(4);
            let y = ctx.add(inputs[0], a)?;
            Ok(vec![ctx.add(y, b)?])
        };

        let err = Compiler::default()
            .compile(f, &[vec![0.0; 4]], &DeviceGenerator::from_seed(16))
            .unwrap_err();
        assert_eq!(
            err.unsupported().map(|p| p.kind()),
            Some(PatternKind::StaleRestoreTarget)
        );
    }

    #[test]
    fn test_single_use_accepts_literal_restore() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let f = move |ctx: &mut Ctx<'_>, _: &[TensorRef]| -> TraceResult<Vec<TensorRef>> {
            ctx.set_state(frozen)?;
            Ok(vec![ctx.rand(2)])
        };
        let config = CompilerConfig {
            validator: ValidatorConfig::default()
                .with_reuse(crate::config::ArtifactReuse::SingleUse),
            print_graph: false,
        };
        let compiled = Compiler::new(config)
            .compile(f, &[], &DeviceGenerator::from_seed(1))
            .unwrap();

        let mut gen = DeviceGenerator::from_seed(99);
        compiled.invoke(&[], &mut gen).unwrap();
        assert_eq!(gen.capture(), GeneratorStateSnapshot::new(16, 4));
    }

    #[test]
    fn test_printing_backend_delegates() {
        let config = CompilerConfig {
            print_graph: true,
            ..CompilerConfig::default()
        };
        let compiler = Compiler::new(config);
        let compiled = compiler
            .compile(draws_only, &[vec![0.0; 4]], &DeviceGenerator::from_seed(0))
            .unwrap();
        assert_eq!(compiled.graph().generator_ops(), 1);
    }

    #[test]
    fn test_interpreter_backend_refuses_unsupported() {
        let pattern = crate::error::UnsupportedPattern::StaleRestoreTarget {
            pass: 0,
            index: 0,
            snapshot: GeneratorStateSnapshot::new(1, 0),
        };
        let err = InterpreterBackend
            .submit(Graph::default(), &Verdict::Unsupported(pattern.clone()))
            .unwrap_err();
        assert_eq!(err, CompileError::Unsupported(pattern));
    }

    #[test]
    fn test_callable_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledCallable>();
        assert_send_sync::<Compiler>();
    }
}
