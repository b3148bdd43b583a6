//! Consistency validation of captured generator-state effects.
//!
//! The [`ConsistencyValidator`] decides whether replaying a trace reproduces
//! the draws eager execution would produce, from any entry state. It is a
//! pure function of the effect logs and the [`ValidatorConfig`].
//!
//! # Algorithm
//!
//! Logs without any read or write are accepted without a scan. Otherwise one
//! forward scan per pass tracks:
//! - the [`Phase`], which picks the [`Check`] applied to each effect
//! - the expected concrete state, simulated from the pass's entry state by
//!   advancing over every draw
//! - the symbolic base the current state derives from: the pass entry, an
//!   in-region reseed, or a literal frozen outside the region
//! - every read taken so far, shared across passes
//! - a stack of open brackets, one per read whose state may still be
//!   restored
//!
//! A restore of an outer read closes every bracket opened after it. Reads
//! taken inside those brackets that saw a different state are marked as
//! discarded. Restoring one later in the same pass is an ordinary restore:
//! the compiled graph takes the read again when it runs. Restoring one from
//! a later pass re-exposes draws its own pass made invisible, and is
//! rejected as [`UnsupportedPattern::UnsupportedLeakage`].

mod phase;

pub use phase::{Check, Phase};

use std::collections::HashMap;

use rngtrace_core::GeneratorStateSnapshot;
use tracing::{debug, warn};

use crate::config::{ArtifactReuse, ValidatorConfig};
use crate::effect::{EffectLog, ReadId, RecordedEffect};
use crate::error::UnsupportedPattern;

/// Outcome of validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Replay reproduces eager draws from any entry state.
    Supported,
    /// Compilation must fail.
    Unsupported(UnsupportedPattern),
}

impl Verdict {
    /// Returns true for [`Verdict::Supported`].
    #[inline]
    pub fn is_supported(&self) -> bool {
        matches!(self, Verdict::Supported)
    }

    /// Converts into a `Result`, for `?` propagation.
    pub fn into_result(self) -> Result<(), UnsupportedPattern> {
        match self {
            Verdict::Supported => Ok(()),
            Verdict::Unsupported(pattern) => Err(pattern),
        }
    }
}

/// Verdict plus the scan diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// The decision
    pub verdict: Verdict,
    /// Phase when the scan stopped
    pub final_phase: Phase,
    /// Effects examined, across all passes
    pub effects_scanned: usize,
    /// Restores that closed an open bracket
    pub brackets_closed: usize,
}

/// Symbolic origin of the current generator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Base {
    Entry { pass: usize },
    Seeded(u64),
    External(GeneratorStateSnapshot),
}

impl std::fmt::Display for Base {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Base::Entry { pass } => write!(f, "entry of pass {pass}"),
            Base::Seeded(seed) => write!(f, "reseed to {seed}"),
            Base::External(snapshot) => write!(f, "literal ({snapshot})"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ReadRecord {
    pass: usize,
    snapshot: GeneratorStateSnapshot,
    base: Base,
    discarded_at: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
struct Bracket {
    read: ReadId,
    snapshot: GeneratorStateSnapshot,
    draws: usize,
}

/// Pure decision function over effect logs.
///
/// # Examples
///
/// ```rust
/// use rngtrace_compile::effect::{EffectLog, ReadId, SnapshotOrigin, StateEffect};
/// use rngtrace_compile::validator::{ConsistencyValidator, Verdict};
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
/// log.push(StateEffect::Draw { consumed: 8 });
///
/// let validator = ConsistencyValidator::default();
/// assert_eq!(validator.validate(&log), Verdict::Supported);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsistencyValidator {
    config: ValidatorConfig,
}

impl ConsistencyValidator {
    /// Creates a validator with the given policy.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// The active policy.
    #[inline]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates a single pass under the configured reuse model.
    pub fn validate(&self, log: &EffectLog) -> Verdict {
        self.report(&[log], self.config.reuse).verdict
    }

    /// Validates passes of one artifact in execution order, such as a
    /// forward and its backward.
    pub fn validate_passes(&self, passes: &[&EffectLog]) -> Verdict {
        self.report_passes(passes).verdict
    }

    /// [`validate_passes`](Self::validate_passes) with the scan diagnostics.
    ///
    /// Later passes may restore reads taken in earlier ones. More than one
    /// pass means the region is re-entered, so frozen literals are stale
    /// regardless of the configured reuse model.
    pub fn report_passes(&self, passes: &[&EffectLog]) -> ValidationReport {
        let reuse = if passes.len() > 1 {
            ArtifactReuse::Reusable
        } else {
            self.config.reuse
        };
        self.report(passes, reuse)
    }

    /// Validates a log that will be re-executed by checkpoint recompute.
    pub fn validate_recompute(&self, log: &EffectLog) -> Verdict {
        self.report(&[log], ArtifactReuse::Reusable).verdict
    }

    /// Runs the scan and returns the verdict with diagnostics.
    pub fn report(&self, passes: &[&EffectLog], reuse: ArtifactReuse) -> ValidationReport {
        if !passes.iter().any(|log| log.has_state_access()) {
            let effects = passes.iter().map(|log| log.len()).sum();
            debug!(passes = passes.len(), effects, "draw-only trace");
            return ValidationReport {
                verdict: Verdict::Supported,
                final_phase: Phase::NoEffect,
                effects_scanned: effects,
                brackets_closed: 0,
            };
        }

        let mut scan = Scan::new(reuse, self.config.allow_reseed);
        let mut result = Ok(());
        for (pass, log) in passes.iter().enumerate() {
            scan.begin_pass(pass, log.entry());
            result = log
                .effects()
                .iter()
                .try_for_each(|effect| scan.step(pass, effect));
            if result.is_err() {
                break;
            }
        }

        let verdict = match result {
            Ok(()) => {
                debug!(
                    passes = passes.len(),
                    effects = scan.scanned,
                    phase = %scan.phase,
                    "generator effects validated"
                );
                Verdict::Supported
            }
            Err(pattern) => {
                warn!(%pattern, phase = %scan.phase, "generator effects rejected");
                Verdict::Unsupported(pattern)
            }
        };

        ValidationReport {
            verdict,
            final_phase: scan.phase,
            effects_scanned: scan.scanned,
            brackets_closed: scan.closed,
        }
    }
}

/// Mutable scan state.
struct Scan {
    reuse: ArtifactReuse,
    allow_reseed: bool,
    phase: Phase,
    expected: GeneratorStateSnapshot,
    base: Base,
    reads: HashMap<ReadId, ReadRecord>,
    open: Vec<Bracket>,
    scanned: usize,
    closed: usize,
}

impl Scan {
    fn new(reuse: ArtifactReuse, allow_reseed: bool) -> Self {
        Self {
            reuse,
            allow_reseed,
            phase: Phase::NoEffect,
            expected: GeneratorStateSnapshot::new(0, 0),
            base: Base::Entry { pass: 0 },
            reads: HashMap::new(),
            open: Vec::new(),
            scanned: 0,
            closed: 0,
        }
    }

    fn begin_pass(&mut self, pass: usize, entry: GeneratorStateSnapshot) {
        self.expected = entry;
        self.base = Base::Entry { pass };
        self.open.clear();
    }

    fn bracket_open(&self) -> bool {
        self.open.iter().any(|b| b.draws > 0)
    }

    fn step(&mut self, pass: usize, recorded: &RecordedEffect) -> Result<(), UnsupportedPattern> {
        let index = recorded.index;
        match self.phase.check(&recorded.effect) {
            Check::Advance { consumed } => {
                self.expected = self.expected.advanced(consumed);
            }
            Check::CountDraw { consumed } => {
                self.expected = self.expected.advanced(consumed);
                for bracket in &mut self.open {
                    bracket.draws += 1;
                }
            }
            Check::Read { id, snapshot } => self.read(pass, index, id, snapshot)?,
            Check::RestoreWithoutRead { read } => {
                return Err(UnsupportedPattern::AmbiguousCapturedState {
                    pass,
                    index,
                    detail: format!("restore of read {} before any state access", read.0),
                });
            }
            Check::Restore { read, snapshot } => self.restore(pass, index, read, snapshot)?,
            Check::Literal { snapshot } => {
                if self.reuse.is_reusable() {
                    return Err(UnsupportedPattern::StaleRestoreTarget {
                        pass,
                        index,
                        snapshot,
                    });
                }
                self.base = Base::External(snapshot);
                self.expected = snapshot;
            }
            Check::Reseed { seed, snapshot } => self.reseed(pass, index, seed, snapshot)?,
        }

        self.scanned += 1;
        self.phase = self
            .phase
            .next(recorded.effect.kind(), self.bracket_open());
        Ok(())
    }

    fn read(
        &mut self,
        pass: usize,
        index: usize,
        id: ReadId,
        snapshot: GeneratorStateSnapshot,
    ) -> Result<(), UnsupportedPattern> {
        let ambiguous = |detail: String| UnsupportedPattern::AmbiguousCapturedState {
            pass,
            index,
            detail,
        };

        if let Base::External(_) = self.base {
            return Err(ambiguous(format!(
                "read observes state pinned by a restore of {}",
                self.base
            )));
        }
        if snapshot != self.expected {
            return Err(ambiguous(format!(
                "read observed ({snapshot}) but draws since entry give ({})",
                self.expected
            )));
        }
        if self.reads.contains_key(&id) {
            return Err(ambiguous(format!("read {} recorded twice", id.0)));
        }

        self.reads.insert(
            id,
            ReadRecord {
                pass,
                snapshot,
                base: self.base,
                discarded_at: None,
            },
        );
        self.open.push(Bracket {
            read: id,
            snapshot,
            draws: 0,
        });
        Ok(())
    }

    fn reseed(
        &mut self,
        pass: usize,
        index: usize,
        seed: u64,
        snapshot: GeneratorStateSnapshot,
    ) -> Result<(), UnsupportedPattern> {
        if !self.allow_reseed {
            return Err(UnsupportedPattern::StaleRestoreTarget {
                pass,
                index,
                snapshot,
            });
        }
        let seeded = GeneratorStateSnapshot::new(seed, 0);
        if snapshot != seeded {
            return Err(UnsupportedPattern::AmbiguousCapturedState {
                pass,
                index,
                detail: format!("reseed to {seed} wrote ({snapshot})"),
            });
        }
        self.base = Base::Seeded(seed);
        self.expected = seeded;
        Ok(())
    }

    fn restore(
        &mut self,
        pass: usize,
        index: usize,
        read: ReadId,
        snapshot: GeneratorStateSnapshot,
    ) -> Result<(), UnsupportedPattern> {
        let record = self.reads.get(&read).copied().ok_or_else(|| {
            UnsupportedPattern::AmbiguousCapturedState {
                pass,
                index,
                detail: format!("restore of read {} that was never recorded", read.0),
            }
        })?;
        if record.snapshot != snapshot {
            return Err(UnsupportedPattern::AmbiguousCapturedState {
                pass,
                index,
                detail: format!(
                    "restore writes ({snapshot}) but read {} observed ({})",
                    read.0, record.snapshot
                ),
            });
        }
        if let Some(closed_at) = record.discarded_at {
            if record.pass != pass {
                return Err(UnsupportedPattern::UnsupportedLeakage {
                    pass,
                    index,
                    read,
                    closed_at,
                });
            }
        }

        self.close_bracket(read, snapshot, index);
        debug!(index, read = read.0, base = %record.base, "state restored to read");
        self.base = record.base;
        self.expected = snapshot;
        Ok(())
    }

    /// Closes the bracket opened by `read` and every bracket inside it, then
    /// re-opens it empty.
    fn close_bracket(&mut self, read: ReadId, snapshot: GeneratorStateSnapshot, index: usize) {
        match self.open.iter().rposition(|b| b.read == read) {
            Some(position) => {
                for inner in self.open.split_off(position + 1) {
                    if inner.snapshot != snapshot {
                        if let Some(record) = self.reads.get_mut(&inner.read) {
                            record.discarded_at.get_or_insert(index);
                        }
                    }
                }
                self.open[position].draws = 0;
                self.closed += 1;
            }
            None => {
                // Read from an earlier pass, or one whose bracket an outer
                // restore already closed: the restore starts a new bracket.
                self.open.push(Bracket {
                    read,
                    snapshot,
                    draws: 0,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{SnapshotOrigin, StateEffect};
    use crate::error::PatternKind;

    fn entry() -> GeneratorStateSnapshot {
        GeneratorStateSnapshot::new(16, 0)
    }

    fn read(log: &mut EffectLog, id: usize, snapshot: GeneratorStateSnapshot) {
        log.push(StateEffect::Read {
            id: ReadId(id),
            snapshot,
        });
    }

    fn restore(log: &mut EffectLog, id: usize, snapshot: GeneratorStateSnapshot) {
        log.push(StateEffect::Write {
            snapshot,
            origin: SnapshotOrigin::Traced { read: ReadId(id) },
        });
    }

    fn draw(log: &mut EffectLog, consumed: u64) {
        log.push(StateEffect::Draw { consumed });
    }

    fn kind(verdict: Verdict) -> Option<PatternKind> {
        match verdict {
            Verdict::Supported => None,
            Verdict::Unsupported(pattern) => Some(pattern.kind()),
        }
    }

    #[test]
    fn test_draws_only_supported() {
        let mut log = EffectLog::new(entry());
        draw(&mut log, 8);
        draw(&mut log, 2);
        let report = ConsistencyValidator::default().report(&[&log], ArtifactReuse::Reusable);
        assert_eq!(report.verdict, Verdict::Supported);
        assert_eq!(report.final_phase, Phase::NoEffect);
        assert_eq!(report.effects_scanned, 2);
    }

    #[test]
    fn test_empty_log_supported() {
        let log = EffectLog::new(entry());
        assert!(ConsistencyValidator::default().validate(&log).is_supported());
    }

    #[test]
    fn test_read_modify_restore_supported() {
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        draw(&mut log, 8);
        restore(&mut log, 0, entry());
        draw(&mut log, 8);

        let report = ConsistencyValidator::default().report(&[&log], ArtifactReuse::Reusable);
        assert_eq!(report.verdict, Verdict::Supported);
        assert_eq!(report.final_phase, Phase::Bracketed);
        assert_eq!(report.brackets_closed, 1);
    }

    #[test]
    fn test_read_after_draws_must_match_simulation() {
        let mut log = EffectLog::new(entry());
        draw(&mut log, 8);
        read(&mut log, 0, entry().advanced(8));
        assert!(ConsistencyValidator::default().validate(&log).is_supported());

        let mut log = EffectLog::new(entry());
        draw(&mut log, 8);
        read(&mut log, 0, entry().advanced(6));
        assert_eq!(
            kind(ConsistencyValidator::default().validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_external_restore_rejected_when_reusable() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let mut log = EffectLog::new(GeneratorStateSnapshot::new(32, 0));
        draw(&mut log, 2);
        log.push(StateEffect::Write {
            snapshot: frozen,
            origin: SnapshotOrigin::External,
        });

        let verdict = ConsistencyValidator::default().validate(&log);
        match verdict {
            Verdict::Unsupported(UnsupportedPattern::StaleRestoreTarget {
                index, snapshot, ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(snapshot, frozen);
            }
            other => panic!("expected stale restore, got {other:?}"),
        }
    }

    #[test]
    fn test_external_restore_allowed_single_use() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let mut log = EffectLog::new(GeneratorStateSnapshot::new(32, 0));
        log.push(StateEffect::Write {
            snapshot: frozen,
            origin: SnapshotOrigin::External,
        });
        draw(&mut log, 2);

        let validator =
            ConsistencyValidator::new(ValidatorConfig::default().with_reuse(ArtifactReuse::SingleUse));
        assert!(validator.validate(&log).is_supported());
        // Recompute re-executes the region, so the literal is stale again.
        assert_eq!(
            kind(validator.validate_recompute(&log)),
            Some(PatternKind::StaleRestoreTarget)
        );
    }

    #[test]
    fn test_read_of_pinned_state_is_ambiguous() {
        let frozen = GeneratorStateSnapshot::new(16, 0);
        let mut log = EffectLog::new(GeneratorStateSnapshot::new(32, 0));
        log.push(StateEffect::Write {
            snapshot: frozen,
            origin: SnapshotOrigin::External,
        });
        read(&mut log, 0, frozen);

        let validator =
            ConsistencyValidator::new(ValidatorConfig::default().with_reuse(ArtifactReuse::SingleUse));
        assert_eq!(
            kind(validator.validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_reseed_then_read_supported() {
        let mut log = EffectLog::new(entry());
        draw(&mut log, 4);
        log.push(StateEffect::Write {
            snapshot: GeneratorStateSnapshot::new(32, 0),
            origin: SnapshotOrigin::Seeded { seed: 32 },
        });
        draw(&mut log, 2);
        read(&mut log, 0, GeneratorStateSnapshot::new(32, 2));
        assert!(ConsistencyValidator::default().validate(&log).is_supported());

        let strict =
            ConsistencyValidator::new(ValidatorConfig::default().with_allow_reseed(false));
        assert_eq!(
            kind(strict.validate(&log)),
            Some(PatternKind::StaleRestoreTarget)
        );
    }

    #[test]
    fn test_reseed_with_wrong_snapshot_is_ambiguous() {
        let mut log = EffectLog::new(entry());
        log.push(StateEffect::Write {
            snapshot: GeneratorStateSnapshot::new(32, 4),
            origin: SnapshotOrigin::Seeded { seed: 32 },
        });
        assert_eq!(
            kind(ConsistencyValidator::default().validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_restore_of_unknown_read_is_ambiguous() {
        let mut log = EffectLog::new(entry());
        restore(&mut log, 7, entry());
        assert_eq!(
            kind(ConsistencyValidator::default().validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_restore_with_mismatched_snapshot_is_ambiguous() {
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        draw(&mut log, 8);
        restore(&mut log, 0, entry().advanced(2));
        assert_eq!(
            kind(ConsistencyValidator::default().validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_nested_brackets_supported() {
        // read A, draw, read B, draw, restore B, draw, restore A, draw
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        draw(&mut log, 2);
        read(&mut log, 1, entry().advanced(2));
        draw(&mut log, 2);
        restore(&mut log, 1, entry().advanced(2));
        draw(&mut log, 2);
        restore(&mut log, 0, entry());
        draw(&mut log, 2);

        let report = ConsistencyValidator::default().report(&[&log], ArtifactReuse::Reusable);
        assert_eq!(report.verdict, Verdict::Supported);
        assert_eq!(report.brackets_closed, 2);
    }

    #[test]
    fn test_overlapping_restores_in_one_pass_supported() {
        // read A, draw, read B, draw, restore A, draw, restore B, draw
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        draw(&mut log, 2);
        read(&mut log, 1, entry().advanced(2));
        draw(&mut log, 2);
        restore(&mut log, 0, entry());
        draw(&mut log, 2);
        restore(&mut log, 1, entry().advanced(2));
        draw(&mut log, 2);

        let report = ConsistencyValidator::default().report(&[&log], ArtifactReuse::Reusable);
        assert_eq!(report.verdict, Verdict::Supported);
        assert_eq!(report.final_phase, Phase::Bracketed);
        assert_eq!(report.brackets_closed, 1);
    }

    #[test]
    fn test_later_pass_restoring_discarded_read_leaks() {
        // Forward: read A, draw, read B, restore A. Backward: restore B.
        let mut forward = EffectLog::new(entry());
        read(&mut forward, 0, entry());
        draw(&mut forward, 2);
        read(&mut forward, 1, entry().advanced(2));
        restore(&mut forward, 0, entry());
        draw(&mut forward, 2);

        let mut backward = EffectLog::new(GeneratorStateSnapshot::new(16, 0));
        draw(&mut backward, 4);
        restore(&mut backward, 1, entry().advanced(2));

        match ConsistencyValidator::default().validate_passes(&[&forward, &backward]) {
            Verdict::Unsupported(UnsupportedPattern::UnsupportedLeakage {
                pass,
                index,
                read,
                closed_at,
            }) => {
                assert_eq!(pass, 1);
                assert_eq!(index, 1);
                assert_eq!(read, ReadId(1));
                assert_eq!(closed_at, 3);
            }
            other => panic!("expected leakage, got {other:?}"),
        }
    }

    #[test]
    fn test_later_pass_restoring_kept_read_supported() {
        let mut forward = EffectLog::new(entry());
        read(&mut forward, 0, entry());
        draw(&mut forward, 2);
        read(&mut forward, 1, entry().advanced(2));
        restore(&mut forward, 0, entry());

        let mut backward = EffectLog::new(GeneratorStateSnapshot::new(16, 0));
        restore(&mut backward, 0, entry());
        draw(&mut backward, 2);

        let validator = ConsistencyValidator::default();
        assert!(validator.validate_passes(&[&forward, &backward]).is_supported());
    }

    #[test]
    fn test_draw_only_passes_skip_the_scan() {
        let mut forward = EffectLog::new(entry());
        draw(&mut forward, 8);
        let mut backward = EffectLog::new(entry().advanced(8));
        draw(&mut backward, 2);
        draw(&mut backward, 2);

        let report = ConsistencyValidator::default().report_passes(&[&forward, &backward]);
        assert_eq!(report.verdict, Verdict::Supported);
        assert_eq!(report.final_phase, Phase::NoEffect);
        assert_eq!(report.effects_scanned, 3);
    }

    /// Drives the scan into `phase` with a prefix log, then applies one
    /// effect and returns the resulting verdict kind.
    fn verdict_after(phase: Phase, effect: StateEffect) -> Option<PatternKind> {
        let mut log = EffectLog::new(entry());
        match phase {
            Phase::NoEffect => {}
            Phase::HasRead => read(&mut log, 0, entry()),
            Phase::HasWrite => {
                read(&mut log, 0, entry());
                draw(&mut log, 2);
                restore(&mut log, 0, entry());
            }
            Phase::Bracketed => {
                read(&mut log, 0, entry());
                draw(&mut log, 2);
            }
        }
        let prefix = ConsistencyValidator::default().report(&[&log], ArtifactReuse::Reusable);
        assert_eq!(prefix.final_phase, phase, "prefix for {phase}");
        log.push(effect);
        kind(ConsistencyValidator::default().validate(&log))
    }

    #[test]
    fn test_phase_effect_table() {
        use PatternKind::{AmbiguousCapturedState as Ambiguous, StaleRestoreTarget as Stale};

        let expected_state = |phase| match phase {
            Phase::Bracketed => entry().advanced(2),
            _ => entry(),
        };
        let phases = [
            Phase::NoEffect,
            Phase::HasRead,
            Phase::HasWrite,
            Phase::Bracketed,
        ];

        for phase in phases {
            let draw = StateEffect::Draw { consumed: 2 };
            let fresh_read = StateEffect::Read {
                id: ReadId(9),
                snapshot: expected_state(phase),
            };
            let restore = StateEffect::Write {
                snapshot: entry(),
                origin: SnapshotOrigin::Traced { read: ReadId(0) },
            };
            let literal = StateEffect::Write {
                snapshot: GeneratorStateSnapshot::new(99, 0),
                origin: SnapshotOrigin::External,
            };
            let reseed = StateEffect::Write {
                snapshot: GeneratorStateSnapshot::new(32, 0),
                origin: SnapshotOrigin::Seeded { seed: 32 },
            };

            let restore_expected = match phase {
                Phase::NoEffect => Some(Ambiguous),
                _ => None,
            };
            let table = [
                ("draw", draw, None),
                ("read", fresh_read, None),
                ("restore", restore, restore_expected),
                ("literal", literal, Some(Stale)),
                ("reseed", reseed, None),
            ];
            for (name, effect, expected) in table {
                assert_eq!(verdict_after(phase, effect), expected, "{phase} + {name}");
            }
        }
    }

    #[test]
    fn test_inner_read_without_draws_stays_valid() {
        // Inner read saw the same state as the outer one, so closing the
        // outer bracket discards nothing it depends on.
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        read(&mut log, 1, entry());
        draw(&mut log, 2);
        restore(&mut log, 0, entry());
        draw(&mut log, 2);
        restore(&mut log, 1, entry());
        assert!(ConsistencyValidator::default().validate(&log).is_supported());
    }

    #[test]
    fn test_repeated_restore_of_same_read() {
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        for _ in 0..3 {
            draw(&mut log, 8);
            restore(&mut log, 0, entry());
        }
        draw(&mut log, 8);
        assert!(ConsistencyValidator::default().validate(&log).is_supported());
    }

    #[test]
    fn test_backward_restores_forward_read() {
        let mut forward = EffectLog::new(entry());
        read(&mut forward, 0, entry());
        draw(&mut forward, 8);
        restore(&mut forward, 0, entry());
        draw(&mut forward, 8);

        let mut backward = EffectLog::new(GeneratorStateSnapshot::new(16, 0));
        restore(&mut backward, 0, entry());
        draw(&mut backward, 8);

        let validator = ConsistencyValidator::default();
        assert!(validator.validate_passes(&[&forward, &backward]).is_supported());
    }

    #[test]
    fn test_passes_force_reuse() {
        let forward = EffectLog::new(entry());
        let mut backward = EffectLog::new(entry());
        backward.push(StateEffect::Write {
            snapshot: entry(),
            origin: SnapshotOrigin::External,
        });

        let validator =
            ConsistencyValidator::new(ValidatorConfig::default().with_reuse(ArtifactReuse::SingleUse));
        assert_eq!(
            kind(validator.validate_passes(&[&forward, &backward])),
            Some(PatternKind::StaleRestoreTarget)
        );
        assert!(validator.validate_passes(&[&backward]).is_supported());
    }

    #[test]
    fn test_duplicate_read_id_is_ambiguous() {
        let mut log = EffectLog::new(entry());
        read(&mut log, 0, entry());
        read(&mut log, 0, entry());
        assert_eq!(
            kind(ConsistencyValidator::default().validate(&log)),
            Some(PatternKind::AmbiguousCapturedState)
        );
    }

    #[test]
    fn test_verdict_into_result() {
        assert!(Verdict::Supported.into_result().is_ok());
        let pattern = UnsupportedPattern::StaleRestoreTarget {
            pass: 0,
            index: 0,
            snapshot: entry(),
        };
        assert_eq!(
            Verdict::Unsupported(pattern.clone()).into_result(),
            Err(pattern)
        );
    }
}
