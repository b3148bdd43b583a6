//! Error types for generator state handling.

use thiserror::Error;

/// Errors raised when decoding or applying generator state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A snapshot byte sequence had the wrong length.
    #[error("Invalid snapshot length {actual}: expected {expected} bytes")]
    InvalidLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
