//! State effect tracking during trace capture.
//!
//! The [`EffectTracker`] hands out one [`CaptureSession`] at a time. The
//! session is the observer that [`TraceContext`](crate::context::TraceContext)
//! notifies on every generator read, write and draw; it appends to the
//! session's [`EffectLog`] and nothing else.
//!
//! # Scoping
//!
//! A session mutably borrows its tracker, so a second capture cannot start
//! while one is active. Interception ends when the session is finished or
//! dropped, including when the traced function returns an error or unwinds.
//!
//! ```rust
//! use rngtrace_compile::tracker::{EffectObserver, EffectTracker};
//! use rngtrace_core::GeneratorStateSnapshot;
//!
//! let mut tracker = EffectTracker::new();
//! let entry = GeneratorStateSnapshot::new(16, 0);
//!
//! let log = {
//!     let mut session = tracker.begin_capture(entry);
//!     session.record_draw(8);
//!     session.finish()
//! };
//!
//! assert_eq!(log.len(), 1);
//! assert!(!tracker.is_capturing());
//! ```

use rngtrace_core::GeneratorStateSnapshot;
use tracing::debug;

use crate::effect::{EffectLog, ReadId, SnapshotOrigin, StateEffect};

/// Receiver of generator-state effects during capture.
pub trait EffectObserver {
    /// Records a state read and returns the handle later writes refer to.
    fn record_read(&mut self, snapshot: GeneratorStateSnapshot) -> ReadId;

    /// Records a state write.
    fn record_write(&mut self, snapshot: GeneratorStateSnapshot, origin: SnapshotOrigin);

    /// Records a draw that consumed `consumed` offset units.
    fn record_draw(&mut self, consumed: u64);
}

/// Owner of capture sessions and of the read-id sequence.
#[derive(Debug, Default)]
pub struct EffectTracker {
    next_read: usize,
    capturing: bool,
    sessions_started: usize,
}

impl EffectTracker {
    /// Creates an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts intercepting effects for a region entered at `entry`.
    pub fn begin_capture(&mut self, entry: GeneratorStateSnapshot) -> CaptureSession<'_> {
        self.capturing = true;
        self.sessions_started += 1;
        debug!(session = self.sessions_started, %entry, "capture started");
        CaptureSession {
            tracker: self,
            log: EffectLog::new(entry),
            finished: false,
        }
    }

    /// Returns true while a session is open.
    #[inline]
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Number of sessions opened so far.
    #[inline]
    pub fn sessions_started(&self) -> usize {
        self.sessions_started
    }

    fn allocate_read(&mut self) -> ReadId {
        let id = ReadId(self.next_read);
        self.next_read += 1;
        id
    }
}

/// Scoped capture of one traced region.
#[derive(Debug)]
pub struct CaptureSession<'t> {
    tracker: &'t mut EffectTracker,
    log: EffectLog,
    finished: bool,
}

impl CaptureSession<'_> {
    /// Effects recorded so far.
    pub fn log(&self) -> &EffectLog {
        &self.log
    }

    /// Ends the session and returns its log.
    pub fn finish(mut self) -> EffectLog {
        self.finished = true;
        let entry = self.log.entry();
        let log = std::mem::replace(&mut self.log, EffectLog::new(entry));
        debug!(effects = log.len(), "capture finished");
        log
    }

    fn push(&mut self, effect: StateEffect) {
        self.log.push(effect);
    }
}

impl EffectObserver for CaptureSession<'_> {
    fn record_read(&mut self, snapshot: GeneratorStateSnapshot) -> ReadId {
        let id = self.tracker.allocate_read();
        self.push(StateEffect::Read { id, snapshot });
        id
    }

    fn record_write(&mut self, snapshot: GeneratorStateSnapshot, origin: SnapshotOrigin) {
        self.push(StateEffect::Write { snapshot, origin });
    }

    fn record_draw(&mut self, consumed: u64) {
        self.push(StateEffect::Draw { consumed });
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                effects = self.log.len(),
                "capture aborted; discarding effect log"
            );
        }
        self.tracker.capturing = false;
    }
}
