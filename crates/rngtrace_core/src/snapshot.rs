//! Generator state snapshots.
//!
//! A [`GeneratorStateSnapshot`] is the minimal data needed to resume a
//! pseudo-random stream deterministically: a seed and a stream offset.
//!
//! # Byte Layout
//!
//! | Bytes      | Field    | Encoding          |
//! |------------|----------|-------------------|
//! | `[0, 8)`   | `seed`   | little-endian u64 |
//! | `[8, 16)`  | `offset` | little-endian u64 |
//!
//! Both fields are extracted by fixed-width slicing, so two snapshots with
//! identical bytes are interchangeable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Width of the seed field in bytes.
pub const SEED_BYTES: usize = 8;

/// Width of the offset field in bytes.
pub const OFFSET_BYTES: usize = 8;

/// Total width of a serialised snapshot in bytes.
pub const SNAPSHOT_BYTES: usize = SEED_BYTES + OFFSET_BYTES;

/// Immutable value describing a generator's full internal state.
///
/// Produced by [`StatefulGenerator::capture`](crate::StatefulGenerator::capture)
/// and consumed by [`StatefulGenerator::restore`](crate::StatefulGenerator::restore).
/// Equality is byte-wise equality of the seed and offset fields.
///
/// # Examples
///
/// ```rust
/// use rngtrace_core::GeneratorStateSnapshot;
///
/// let snapshot = GeneratorStateSnapshot::new(16, 4);
/// assert_eq!(snapshot.seed(), 16);
/// assert_eq!(snapshot.offset(), 4);
///
/// let roundtrip = GeneratorStateSnapshot::from_bytes(snapshot.as_bytes()).unwrap();
/// assert_eq!(roundtrip, snapshot);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SnapshotRepr", into = "SnapshotRepr")]
pub struct GeneratorStateSnapshot {
    bytes: [u8; SNAPSHOT_BYTES],
}

impl GeneratorStateSnapshot {
    /// Creates a snapshot from its seed and offset fields.
    #[inline]
    pub fn new(seed: u64, offset: u64) -> Self {
        let mut bytes = [0u8; SNAPSHOT_BYTES];
        bytes[..SEED_BYTES].copy_from_slice(&seed.to_le_bytes());
        bytes[SEED_BYTES..].copy_from_slice(&offset.to_le_bytes());
        Self { bytes }
    }

    /// Rebuilds a snapshot from its byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidLength`] unless `bytes` is exactly
    /// [`SNAPSHOT_BYTES`] long.
    pub fn from_bytes(bytes: &[u8]) -> StateResult<Self> {
        if bytes.len() != SNAPSHOT_BYTES {
            return Err(StateError::InvalidLength {
                expected: SNAPSHOT_BYTES,
                actual: bytes.len(),
            });
        }
        let mut owned = [0u8; SNAPSHOT_BYTES];
        owned.copy_from_slice(bytes);
        Ok(Self { bytes: owned })
    }

    /// Returns the raw byte representation.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; SNAPSHOT_BYTES] {
        &self.bytes
    }

    /// Returns the seed field.
    #[inline]
    pub fn seed(&self) -> u64 {
        read_u64(&self.bytes[..SEED_BYTES])
    }

    /// Returns the stream offset field.
    #[inline]
    pub fn offset(&self) -> u64 {
        read_u64(&self.bytes[SEED_BYTES..])
    }

    /// Returns the snapshot reached after consuming `units` more offset units
    /// from this one. The offset wraps on overflow, like a hardware counter.
    ///
    /// ```rust
    /// use rngtrace_core::GeneratorStateSnapshot;
    ///
    /// let start = GeneratorStateSnapshot::new(7, 10);
    /// assert_eq!(start.advanced(6), GeneratorStateSnapshot::new(7, 16));
    /// ```
    #[inline]
    pub fn advanced(&self, units: u64) -> Self {
        Self::new(self.seed(), self.offset().wrapping_add(units))
    }

    /// Number of offset units separating `earlier` from `self`, assuming both
    /// share a seed and `self` was reached by drawing from `earlier`.
    #[inline]
    pub fn units_since(&self, earlier: &Self) -> u64 {
        self.offset().wrapping_sub(earlier.offset())
    }
}

fn read_u64(slice: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(slice);
    u64::from_le_bytes(word)
}

impl fmt::Debug for GeneratorStateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorStateSnapshot")
            .field("seed", &self.seed())
            .field("offset", &self.offset())
            .finish()
    }
}

impl fmt::Display for GeneratorStateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seed={}, offset={}", self.seed(), self.offset())
    }
}

/// Serialised form: named fields rather than raw bytes.
#[derive(Serialize, Deserialize)]
struct SnapshotRepr {
    seed: u64,
    offset: u64,
}

impl From<SnapshotRepr> for GeneratorStateSnapshot {
    fn from(repr: SnapshotRepr) -> Self {
        Self::new(repr.seed, repr.offset)
    }
}

impl From<GeneratorStateSnapshot> for SnapshotRepr {
    fn from(snapshot: GeneratorStateSnapshot) -> Self {
        Self {
            seed: snapshot.seed(),
            offset: snapshot.offset(),
        }
    }
}
