//! Validator phase machine.
//!
//! The scan keeps one [`Phase`] across all passes. Before an effect is
//! applied, [`Phase::check`] decides which rule the scan runs for it; after
//! the effect, [`Phase::next`] moves the machine on. Both functions are pure;
//! the validator supplies whether some bracket still holds draws.

use rngtrace_core::GeneratorStateSnapshot;
use serde::Serialize;

use crate::effect::{EffectKind, ReadId, SnapshotOrigin, StateEffect};

/// Coarse position of the scan relative to generator-state effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No read or write seen yet; draws alone keep the scan here.
    #[default]
    NoEffect,
    /// A read is open and nothing has been drawn under it.
    HasRead,
    /// A write was applied and no bracket holds draws.
    HasWrite,
    /// At least one open bracket contains draws that a restore could
    /// discard.
    Bracketed,
}

/// Rule the scan applies to one effect, chosen by the phase it arrives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Check {
    /// Draw before any state access: only the simulated state moves.
    Advance {
        /// Units consumed
        consumed: u64,
    },
    /// Draw that every open bracket counts.
    CountDraw {
        /// Units consumed
        consumed: u64,
    },
    /// Read that must agree with the simulated state.
    Read {
        /// Read id
        id: ReadId,
        /// Observed snapshot
        snapshot: GeneratorStateSnapshot,
    },
    /// Restore that must name a recorded read.
    Restore {
        /// Read being restored
        read: ReadId,
        /// Written snapshot
        snapshot: GeneratorStateSnapshot,
    },
    /// Restore arriving before any read or write: it cannot name a
    /// recorded read.
    RestoreWithoutRead {
        /// Read being restored
        read: ReadId,
    },
    /// Write of a snapshot frozen outside the region.
    Literal {
        /// Written snapshot
        snapshot: GeneratorStateSnapshot,
    },
    /// In-region reseed.
    Reseed {
        /// New seed
        seed: u64,
        /// Written snapshot
        snapshot: GeneratorStateSnapshot,
    },
}

impl Phase {
    /// Rule for `effect` arriving in this phase.
    ///
    /// | phase \ effect | Draw | Read | traced Write | literal Write | reseed |
    /// |---|---|---|---|---|---|
    /// | `NoEffect` | `Advance` | `Read` | `RestoreWithoutRead` | `Literal` | `Reseed` |
    /// | any other | `CountDraw` | `Read` | `Restore` | `Literal` | `Reseed` |
    pub fn check(self, effect: &StateEffect) -> Check {
        match *effect {
            StateEffect::Draw { consumed } if !self.has_state_access() => {
                Check::Advance { consumed }
            }
            StateEffect::Draw { consumed } => Check::CountDraw { consumed },
            StateEffect::Read { id, snapshot } => Check::Read { id, snapshot },
            StateEffect::Write {
                origin: SnapshotOrigin::Traced { read },
                ..
            } if !self.has_state_access() => Check::RestoreWithoutRead { read },
            StateEffect::Write {
                snapshot,
                origin: SnapshotOrigin::Traced { read },
            } => Check::Restore { read, snapshot },
            StateEffect::Write {
                snapshot,
                origin: SnapshotOrigin::External,
            } => Check::Literal { snapshot },
            StateEffect::Write {
                snapshot,
                origin: SnapshotOrigin::Seeded { seed },
            } => Check::Reseed { seed, snapshot },
        }
    }

    /// Phase after an effect of `kind`.
    ///
    /// `bracket_open` is true if, after the effect, some open bracket
    /// contains at least one draw.
    ///
    /// | from \ effect | Read | Draw | Write |
    /// |---|---|---|---|
    /// | `NoEffect` | `HasRead` | `NoEffect` | `HasWrite`* |
    /// | `HasRead` | `HasRead`* | `Bracketed` | `HasWrite`* |
    /// | `HasWrite` | `HasRead`* | `HasWrite`* | `HasWrite`* |
    /// | `Bracketed` | `Bracketed` | `Bracketed` | `HasWrite`* |
    ///
    /// Entries marked * become `Bracketed` when `bracket_open` holds.
    pub fn next(self, kind: EffectKind, bracket_open: bool) -> Phase {
        match (self, kind) {
            (Phase::Bracketed, EffectKind::Read | EffectKind::Draw) => Phase::Bracketed,
            (_, _) if bracket_open => Phase::Bracketed,
            (_, EffectKind::Read) => Phase::HasRead,
            (_, EffectKind::Write) => Phase::HasWrite,
            (Phase::HasRead, EffectKind::Draw) => Phase::Bracketed,
            (other, EffectKind::Draw) => other,
        }
    }

    /// Returns true once any read or write has been seen.
    #[inline]
    pub fn has_state_access(self) -> bool {
        !matches!(self, Phase::NoEffect)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::NoEffect => "no-effect",
            Phase::HasRead => "has-read",
            Phase::HasWrite => "has-write",
            Phase::Bracketed => "bracketed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EffectKind::{Draw, Read, Write};

    const ALL: [Phase; 4] = [
        Phase::NoEffect,
        Phase::HasRead,
        Phase::HasWrite,
        Phase::Bracketed,
    ];

    #[test]
    fn test_draws_alone_stay_in_no_effect() {
        let mut phase = Phase::NoEffect;
        for _ in 0..5 {
            phase = phase.next(Draw, false);
        }
        assert_eq!(phase, Phase::NoEffect);
        assert!(!phase.has_state_access());
    }

    #[test]
    fn test_read_draw_restore_draw() {
        let phase = Phase::NoEffect
            .next(Read, false)
            .next(Draw, true);
        assert_eq!(phase, Phase::Bracketed);

        // Restore re-opens the bracket empty.
        let phase = phase.next(Write, false);
        assert_eq!(phase, Phase::HasWrite);

        let phase = phase.next(Draw, true);
        assert_eq!(phase, Phase::Bracketed);
    }

    #[test]
    fn test_inner_restore_keeps_outer_bracket() {
        let phase = Phase::Bracketed.next(Write, true);
        assert_eq!(phase, Phase::Bracketed);
    }

    #[test]
    fn test_bracket_open_always_wins() {
        for from in ALL {
            for kind in [Read, Draw, Write] {
                assert_eq!(from.next(kind, true), Phase::Bracketed);
            }
        }
    }

    #[test]
    fn test_closed_transitions() {
        for from in ALL {
            assert_eq!(
                from.next(Write, false),
                Phase::HasWrite,
                "{from} + write"
            );
        }
        assert_eq!(Phase::NoEffect.next(Read, false), Phase::HasRead);
        assert_eq!(Phase::HasRead.next(Read, false), Phase::HasRead);
        assert_eq!(Phase::HasWrite.next(Read, false), Phase::HasRead);
        assert_eq!(Phase::Bracketed.next(Read, false), Phase::Bracketed);
        assert_eq!(Phase::HasWrite.next(Draw, false), Phase::HasWrite);
        assert_eq!(Phase::HasRead.next(Draw, false), Phase::Bracketed);
    }

    #[test]
    fn test_check_depends_on_phase() {
        let snapshot = GeneratorStateSnapshot::new(16, 0);
        let draw = StateEffect::Draw { consumed: 2 };
        let restore = StateEffect::Write {
            snapshot,
            origin: SnapshotOrigin::Traced { read: ReadId(3) },
        };

        assert_eq!(Phase::NoEffect.check(&draw), Check::Advance { consumed: 2 });
        assert_eq!(
            Phase::NoEffect.check(&restore),
            Check::RestoreWithoutRead { read: ReadId(3) }
        );
        for from in [Phase::HasRead, Phase::HasWrite, Phase::Bracketed] {
            assert_eq!(from.check(&draw), Check::CountDraw { consumed: 2 });
            assert_eq!(
                from.check(&restore),
                Check::Restore {
                    read: ReadId(3),
                    snapshot
                }
            );
        }
    }

    #[test]
    fn test_untraced_writes_ignore_phase() {
        let literal = StateEffect::Write {
            snapshot: GeneratorStateSnapshot::new(16, 0),
            origin: SnapshotOrigin::External,
        };
        let reseed = StateEffect::Write {
            snapshot: GeneratorStateSnapshot::new(32, 0),
            origin: SnapshotOrigin::Seeded { seed: 32 },
        };
        for from in ALL {
            assert!(matches!(from.check(&literal), Check::Literal { .. }));
            assert!(matches!(from.check(&reseed), Check::Reseed { seed: 32, .. }));
        }
    }
}
