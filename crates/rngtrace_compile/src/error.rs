//! Error types for capture, validation, compilation and execution.
//!
//! This module provides:
//! - [`UnsupportedPattern`]: why a trace's generator-state effects cannot be
//!   compiled soundly
//! - [`TraceError`]: failures raised by the traced function during capture or
//!   eager execution
//! - [`ExecError`]: failures invoking a compiled artifact
//! - [`CompileError`]: everything that aborts compilation
//! - [`CheckpointError`]: failures of a checkpointed region

use rngtrace_core::GeneratorStateSnapshot;
use thiserror::Error;

use crate::effect::ReadId;

/// Generator-state pattern the validator refuses to compile.
///
/// Every variant is a static property of the trace: retrying cannot help,
/// and the only recovery is to run the original function eagerly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedPattern {
    /// A read's value is not a provable function of entry state and prior
    /// draws in the region.
    #[error("ambiguous captured state at effect {index} (pass {pass}): {detail}")]
    AmbiguousCapturedState {
        /// Pass the effect belongs to
        pass: usize,
        /// Sequence index of the effect
        index: usize,
        /// What could not be proven
        detail: String,
    },

    /// A restore target frozen from outside the region cannot be proven
    /// valid across re-executions.
    #[error(
        "stale restore target at effect {index} (pass {pass}): {snapshot} was captured outside the traced region"
    )]
    StaleRestoreTarget {
        /// Pass the effect belongs to
        pass: usize,
        /// Sequence index of the effect
        index: usize,
        /// The frozen snapshot
        snapshot: GeneratorStateSnapshot,
    },

    /// A later pass restores a read that its own pass discarded, re-exposing
    /// draws an earlier restore made invisible.
    #[error(
        "bracketed draws leak past restore at effect {index} (pass {pass}): read {} was discarded by the restore at effect {closed_at} of an earlier pass",
        read.0
    )]
    UnsupportedLeakage {
        /// Pass the effect belongs to
        pass: usize,
        /// Sequence index of the offending restore
        index: usize,
        /// Read whose value carries the bracketed draws
        read: ReadId,
        /// Sequence index, within the read's own pass, of the restore that
        /// closed the bracket
        closed_at: usize,
    },
}

impl UnsupportedPattern {
    /// Returns the kind of pattern without its payload.
    pub fn kind(&self) -> PatternKind {
        match self {
            Self::AmbiguousCapturedState { .. } => PatternKind::AmbiguousCapturedState,
            Self::StaleRestoreTarget { .. } => PatternKind::StaleRestoreTarget,
            Self::UnsupportedLeakage { .. } => PatternKind::UnsupportedLeakage,
        }
    }
}

/// Payload-free discriminant of [`UnsupportedPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// See [`UnsupportedPattern::AmbiguousCapturedState`]
    AmbiguousCapturedState,
    /// See [`UnsupportedPattern::StaleRestoreTarget`]
    StaleRestoreTarget,
    /// See [`UnsupportedPattern::UnsupportedLeakage`]
    UnsupportedLeakage,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AmbiguousCapturedState => "AmbiguousCapturedState",
            Self::StaleRestoreTarget => "StaleRestoreTarget",
            Self::UnsupportedLeakage => "UnsupportedLeakage",
        };
        f.write_str(name)
    }
}

/// Errors raised by traced code, during capture or eager execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    /// Operand lengths are incompatible.
    #[error("Shape mismatch in {op}: lengths {lhs} and {rhs}")]
    ShapeMismatch {
        /// Operation name
        op: &'static str,
        /// Left operand length
        lhs: usize,
        /// Right operand length
        rhs: usize,
    },

    /// Dropout probability outside `[0, 1)`.
    #[error("Invalid dropout probability {0}: must be in [0, 1)")]
    InvalidProbability(f64),

    /// Wrong number of inputs supplied to a traced function.
    #[error("Expected {expected} inputs, got {actual}")]
    InputCount {
        /// Inputs the function was traced with
        expected: usize,
        /// Inputs supplied
        actual: usize,
    },

    /// A saved-activation slot does not exist.
    #[error("No saved {kind} at slot {slot}")]
    MissingSaved {
        /// `"tensor"` or `"state"`
        kind: &'static str,
        /// Requested slot
        slot: usize,
    },

    /// A tensor handle does not belong to this trace.
    #[error("Unknown tensor handle t{0}")]
    UnknownTensor(usize),

    /// A state handle does not belong to this trace.
    #[error("Unknown state handle s{0}")]
    UnknownState(usize),

    /// The traced function reported its own failure.
    #[error("Traced function failed: {0}")]
    Function(String),
}

/// Result type for traced code.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors raised when invoking a compiled artifact.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    /// Wrong number of inputs.
    #[error("Expected {expected} inputs, got {actual}")]
    InputCount {
        /// Inputs the artifact was traced with
        expected: usize,
        /// Inputs supplied
        actual: usize,
    },

    /// An input's length differs from the traced length.
    #[error("Input {index} has length {actual}, traced with length {expected}")]
    InputShape {
        /// Input position
        index: usize,
        /// Traced length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// The backward artifact needs activations saved by its forward.
    #[error("Saved activations do not match the forward trace: {0}")]
    SavedMismatch(String),

    /// A kernel failed on replayed values.
    #[error("Kernel failed during replay: {0}")]
    Kernel(#[from] TraceError),
}

/// Errors raised by a checkpointed region.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    /// Recompute was requested before any forward call.
    #[error("Recompute requested before the region ran forward")]
    NoForward,

    /// The compiled region failed.
    #[error("Checkpointed region failed: {0}")]
    Exec(#[from] ExecError),
}

/// Result type for checkpointed regions.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors that abort compilation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The validator rejected the trace.
    #[error("unsupported generator-state pattern: {0}")]
    Unsupported(#[from] UnsupportedPattern),

    /// The traced function failed during capture.
    #[error("trace capture failed: {0}")]
    Capture(#[from] TraceError),

    /// The backend refused the trace for its own reasons.
    #[error("backend '{backend}' rejected the trace: {reason}")]
    Backend {
        /// Backend name
        backend: &'static str,
        /// Reason given
        reason: String,
    },
}

impl CompileError {
    /// Returns the unsupported pattern if this is a validator rejection.
    pub fn unsupported(&self) -> Option<&UnsupportedPattern> {
        match self {
            Self::Unsupported(pattern) => Some(pattern),
            _ => None,
        }
    }
}
