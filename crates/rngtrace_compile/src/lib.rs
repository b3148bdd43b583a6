//! # rngtrace_compile: Generator-State Consistency Under Trace Compilation
//!
//! ## Layer 2 (Engine) Role
//!
//! rngtrace_compile captures functions that draw from, read and restore a
//! pseudo-random generator, and decides whether a compiled replay of the
//! capture reproduces eager execution. It provides:
//! - State effect model and log (`effect`)
//! - Scoped effect tracking during capture (`tracker`)
//! - The consistency validator and its phase machine (`validator`)
//! - Trace IR, capture context and shared kernels (`graph`, `context`, `kernels`)
//! - Graph interpreter, backends and compiler front end (`interpreter`, `compiler`)
//! - Forward/backward pairs and checkpoint recompute (`autograd`, `checkpoint`)
//! - Eager-versus-compiled driver and scenario catalogue (`driver`, `scenarios`)
//!
//! ## Usage Example
//!
//! ```rust
//! use rngtrace_compile::compiler::Compiler;
//! use rngtrace_compile::context::TraceContext;
//! use rngtrace_compile::error::{PatternKind, TraceResult};
//! use rngtrace_compile::graph::TensorRef;
//! use rngtrace_core::{DeviceGenerator, StatefulGenerator};
//!
//! // A snapshot frozen before the traced region.
//! let frozen = DeviceGenerator::from_seed(16).capture();
//!
//! let restores_stale = move |ctx: &mut TraceContext<'_, DeviceGenerator>,
//!                            _: &[TensorRef]|
//!       -> TraceResult<Vec<TensorRef>> {
//!     ctx.manual_seed(32);
//!     ctx.set_state(frozen)?;
//!     Ok(vec![ctx.rand(4)])
//! };
//!
//! let err = Compiler::default()
//!     .compile(restores_stale, &[], &DeviceGenerator::from_seed(0))
//!     .unwrap_err();
//! assert_eq!(err.unsupported().map(|p| p.kind()), Some(PatternKind::StaleRestoreTarget));
//! ```

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod autograd;
pub mod checkpoint;
pub mod compiler;
pub mod config;
pub mod context;
pub mod driver;
pub mod effect;
pub mod error;
pub mod graph;
pub mod interpreter;
pub mod kernels;
pub mod scenarios;
pub mod tracker;
pub mod validator;

pub use compiler::{CompiledCallable, Compiler, InterpreterBackend, PrintingBackend, TraceBackend};
pub use config::{ArtifactReuse, CompilerConfig, ValidatorConfig};
pub use context::{Invocation, SavedActivations, TraceContext};
pub use driver::{Driver, Expectation, ScenarioOutcome};
pub use effect::{EffectLog, ReadId, SnapshotOrigin, StateEffect};
pub use error::{CompileError, ExecError, PatternKind, TraceError, UnsupportedPattern};
pub use validator::{ConsistencyValidator, Phase, ValidationReport, Verdict};
