//! Generator capability and the counter-based device generator.
//!
//! Generator state is never a hidden global here: every component that
//! reads, restores or draws from a stream receives a [`StatefulGenerator`]
//! explicitly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::snapshot::GeneratorStateSnapshot;

/// Word positions an offset can name. Positions wrap past it, as
/// [`GeneratorStateSnapshot::advanced`] does.
const OFFSET_SPACE: u128 = 1 << 64;

/// Capability object over a pseudo-random stream with readable and
/// restorable state.
///
/// # Contract
///
/// - [`capture`](Self::capture) observes seed and offset atomically; the
///   `&self` receiver rules out a draw interleaving with the read.
/// - [`restore`](Self::restore) sets seed and offset exactly, and restoring
///   the same snapshot twice without an intervening draw is a no-op.
/// - Draws advance the offset by the number of stream units they consume.
pub trait StatefulGenerator {
    /// Returns the current seed and offset.
    fn capture(&self) -> GeneratorStateSnapshot;

    /// Sets the generator to exactly `snapshot`.
    fn restore(&mut self, snapshot: &GeneratorStateSnapshot);

    /// Reseeds the generator, resetting the offset to zero.
    fn manual_seed(&mut self, seed: u64) {
        self.restore(&GeneratorStateSnapshot::new(seed, 0));
    }

    /// Fills `buffer` with uniform variates in [0, 1).
    fn fill_uniform(&mut self, buffer: &mut [f64]);

    /// Fills `buffer` with standard normal variates.
    fn fill_normal(&mut self, buffer: &mut [f64]);
}

/// Counter-based generator modelling a single device's random stream.
///
/// The stream is ChaCha8 keyed by the seed; the offset is the stream's word
/// position. Restoring therefore costs O(1) regardless of how far the stream
/// has advanced, and a uniform `f64` draw always advances the offset by two
/// 32-bit words.
///
/// # Examples
///
/// ```rust
/// use rngtrace_core::{DeviceGenerator, StatefulGenerator};
///
/// let mut gen = DeviceGenerator::from_seed(16);
/// let entry = gen.capture();
///
/// let mut first = [0.0; 4];
/// gen.fill_uniform(&mut first);
/// assert_eq!(gen.capture().offset(), entry.offset() + 8);
///
/// gen.restore(&entry);
/// let mut again = [0.0; 4];
/// gen.fill_uniform(&mut again);
/// assert_eq!(first, again);
/// ```
#[derive(Clone, Debug)]
pub struct DeviceGenerator {
    seed: u64,
    inner: ChaCha8Rng,
}

impl DeviceGenerator {
    /// Creates a generator at offset zero of the stream keyed by `seed`.
    #[inline]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Creates a generator positioned exactly at `snapshot`.
    pub fn from_snapshot(snapshot: &GeneratorStateSnapshot) -> Self {
        let mut generator = Self::from_seed(snapshot.seed());
        generator.restore(snapshot);
        generator
    }

    /// Returns the seed of the active stream.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Folds a position past the end of the offset space back to its start.
    fn wrap_offset(&mut self) {
        let position = self.inner.get_word_pos();
        if position >= OFFSET_SPACE {
            self.inner.set_word_pos(position % OFFSET_SPACE);
        }
    }
}

impl Default for DeviceGenerator {
    fn default() -> Self {
        Self::from_seed(0)
    }
}

impl StatefulGenerator for DeviceGenerator {
    #[inline]
    fn capture(&self) -> GeneratorStateSnapshot {
        // Lossless: the position is reduced modulo 2^64 first.
        let offset = (self.inner.get_word_pos() % OFFSET_SPACE) as u64;
        GeneratorStateSnapshot::new(self.seed, offset)
    }

    fn restore(&mut self, snapshot: &GeneratorStateSnapshot) {
        if snapshot.seed() != self.seed {
            self.seed = snapshot.seed();
            self.inner = ChaCha8Rng::seed_from_u64(self.seed);
        }
        self.inner.set_word_pos(u128::from(snapshot.offset()));
    }

    #[inline]
    fn fill_uniform(&mut self, buffer: &mut [f64]) {
        for value in buffer.iter_mut() {
            *value = self.inner.gen();
        }
        self.wrap_offset();
    }

    #[inline]
    fn fill_normal(&mut self, buffer: &mut [f64]) {
        for value in buffer.iter_mut() {
            *value = StandardNormal.sample(&mut self.inner);
        }
        self.wrap_offset();
    }
}
