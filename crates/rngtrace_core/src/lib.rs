//! # rngtrace_core: Generator State Foundation
//!
//! ## Layer 1 (Foundation) Role
//!
//! rngtrace_core is the bottom layer of the workspace, providing:
//! - Generator state snapshots with a fixed seed/offset byte layout (`snapshot`)
//! - The [`StatefulGenerator`] capability trait (`generator`)
//! - A counter-based [`DeviceGenerator`] with O(1) restore (`generator`)
//! - Error types: [`StateError`] (`error`)
//!
//! Higher layers receive generators as explicit dependencies; nothing in this
//! workspace reads or writes a process-wide generator.
//!
//! ## Usage Example
//!
//! ```rust
//! use rngtrace_core::{DeviceGenerator, StatefulGenerator};
//!
//! let mut gen = DeviceGenerator::from_seed(16);
//! let state = gen.capture();
//! println!("{state}"); // seed=16, offset=0
//!
//! let mut discarded = [0.0; 4];
//! gen.fill_uniform(&mut discarded);
//! gen.restore(&state);
//! assert_eq!(gen.capture(), state);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub mod error;
pub mod generator;
pub mod snapshot;

pub use error::{StateError, StateResult};
pub use generator::{DeviceGenerator, StatefulGenerator};
pub use snapshot::{GeneratorStateSnapshot, OFFSET_BYTES, SEED_BYTES, SNAPSHOT_BYTES};
