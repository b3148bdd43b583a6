//! Generator-state effects recorded during trace capture.
//!
//! An [`EffectLog`] is the ordered list of state reads, state writes and
//! draws performed by one captured pass, in eager program order. The log is
//! owned by the capture session that produced it and handed to the validator
//! once capture finishes.

use rngtrace_core::GeneratorStateSnapshot;
use serde::{Deserialize, Serialize};

/// Handle of a traced state read.
///
/// Read ids are unique per [`EffectTracker`](crate::tracker::EffectTracker),
/// across every session it opens, so a backward pass can name a read taken
/// during its forward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadId(pub usize);

/// Where the snapshot passed to a state write came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Value produced by a read recorded in this capture.
    Traced {
        /// The read that produced the value
        read: ReadId,
    },
    /// Literal captured before the traced region began and closed over.
    External,
    /// In-region reseed; the written state is `(seed, 0)`.
    Seeded {
        /// Seed passed to the reseed
        seed: u64,
    },
}

/// One generator-state effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum StateEffect {
    /// `get_state`: the generator state was observed.
    Read {
        /// Handle for later restores
        id: ReadId,
        /// Observed state
        snapshot: GeneratorStateSnapshot,
    },
    /// `set_state`: the generator state was overwritten.
    Write {
        /// State written
        snapshot: GeneratorStateSnapshot,
        /// Provenance of the written value
        origin: SnapshotOrigin,
    },
    /// A random draw consumed `consumed` offset units.
    Draw {
        /// Offset units consumed
        consumed: u64,
    },
}

impl StateEffect {
    /// Returns the coarse kind of this effect.
    #[inline]
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Read { .. } => EffectKind::Read,
            Self::Write { .. } => EffectKind::Write,
            Self::Draw { .. } => EffectKind::Draw,
        }
    }
}

/// Effect kind without payload, used by the validator state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// State read
    Read,
    /// State write
    Write,
    /// Draw
    Draw,
}

/// An effect together with its position in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEffect {
    /// Zero-based sequence index within the log
    pub index: usize,
    /// The effect
    #[serde(flatten)]
    pub effect: StateEffect,
}

/// Ordered effects of one captured pass.
///
/// # Example
///
/// ```rust
/// use rngtrace_compile::effect::{EffectLog, ReadId, SnapshotOrigin, StateEffect};
/// use rngtrace_core::GeneratorStateSnapshot;
///
/// let entry = GeneratorStateSnapshot::new(16, 0);
/// let mut log = EffectLog::new(entry);
/// log.push(StateEffect::Read { id: ReadId(0), snapshot: entry });
/// log.push(StateEffect::Draw { consumed: 8 });
/// log.push(StateEffect::Write {
///     snapshot: entry,
///     origin: SnapshotOrigin::Traced { read: ReadId(0) },
/// });
///
/// assert_eq!(log.len(), 3);
/// assert!(log.has_state_access());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectLog {
    entry: GeneratorStateSnapshot,
    #[serde(default)]
    effects: Vec<RecordedEffect>,
}

impl EffectLog {
    /// Creates an empty log for a pass entered at `entry`.
    pub fn new(entry: GeneratorStateSnapshot) -> Self {
        Self {
            entry,
            effects: Vec::new(),
        }
    }

    /// Appends an effect and returns its sequence index.
    pub fn push(&mut self, effect: StateEffect) -> usize {
        let index = self.effects.len();
        self.effects.push(RecordedEffect { index, effect });
        index
    }

    /// Generator state at the moment the pass was entered.
    #[inline]
    pub fn entry(&self) -> GeneratorStateSnapshot {
        self.entry
    }

    /// Recorded effects in program order.
    #[inline]
    pub fn effects(&self) -> &[RecordedEffect] {
        &self.effects
    }

    /// Number of recorded effects.
    #[inline]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Returns true if nothing was recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Returns true if any read or write was recorded.
    pub fn has_state_access(&self) -> bool {
        self.effects
            .iter()
            .any(|e| !matches!(e.effect, StateEffect::Draw { .. }))
    }

    /// Total offset units consumed by draws.
    pub fn consumed(&self) -> u64 {
        self.effects
            .iter()
            .filter_map(|e| match e.effect {
                StateEffect::Draw { consumed } => Some(consumed),
                _ => None,
            })
            .fold(0u64, u64::wrapping_add)
    }

    /// Returns true if the sequence indices are contiguous from zero.
    ///
    /// Logs built through [`push`](Self::push) always are; logs loaded from
    /// JSON are checked before validation.
    pub fn is_well_ordered(&self) -> bool {
        self.effects.iter().enumerate().all(|(i, e)| e.index == i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> GeneratorStateSnapshot {
        GeneratorStateSnapshot::new(16, 0)
    }

    #[test]
    fn test_push_assigns_sequence_indices() {
        let mut log = EffectLog::new(entry());
        assert_eq!(log.push(StateEffect::Draw { consumed: 2 }), 0);
        assert_eq!(log.push(StateEffect::Draw { consumed: 4 }), 1);
        assert!(log.is_well_ordered());
        assert_eq!(log.consumed(), 6);
    }

    #[test]
    fn test_draws_only_has_no_state_access() {
        let mut log = EffectLog::new(entry());
        log.push(StateEffect::Draw { consumed: 8 });
        assert!(!log.has_state_access());
    }

    #[test]
    fn test_kind() {
        let read = StateEffect::Read {
            id: ReadId(0),
            snapshot: entry(),
        };
        assert_eq!(read.kind(), EffectKind::Read);
        assert_eq!(StateEffect::Draw { consumed: 1 }.kind(), EffectKind::Draw);
    }

    #[test]
    fn test_json_shape() {
        let mut log = EffectLog::new(entry());
        log.push(StateEffect::Read {
            id: ReadId(0),
            snapshot: entry(),
        });
        log.push(StateEffect::Write {
            snapshot: entry(),
            origin: SnapshotOrigin::Traced { read: ReadId(0) },
        });

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["effects"][0]["effect"], "read");
        assert_eq!(json["effects"][0]["id"], 0);
        assert_eq!(json["effects"][1]["origin"]["kind"], "traced");

        let back: EffectLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn test_out_of_order_json_detected() {
        let json = r#"{
            "entry": {"seed": 1, "offset": 0},
            "effects": [{"index": 3, "effect": "draw", "consumed": 2}]
        }"#;
        let log: EffectLog = serde_json::from_str(json).unwrap();
        assert!(!log.is_well_ordered());
    }
}
