//! Double-hash probe sequences over a power-of-two slot array.
//!
//! The caller's hash function is treated as untrusted for distribution: both
//! the start index and the probe step are derived from a splitmix64-style
//! avalanche of the raw hash, so even an identity hash over small integers
//! spreads across the table.

/// 2^64 / phi, the splitmix64 increment.
const GOLDEN_GAMMA: u64 = 0x9e3779b97f4a7c15;
const MIX_MUL_1: u64 = 0xbf58476d1ce4e5b9;
const MIX_MUL_2: u64 = 0x94d049bb133111eb;

/// splitmix64 avalanche: add the golden-ratio increment, then two
/// xor-multiply rounds and a final xor-shift.
#[inline(always)]
pub(crate) fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(MIX_MUL_1);
    z = (z ^ (z >> 27)).wrapping_mul(MIX_MUL_2);
    z ^ (z >> 31)
}

/// The slot sequence probed for one key.
///
/// The start index is the first mixed hash masked to the capacity; the step
/// is the second mixed hash reduced to `[1, capacity - 1]` and forced odd.
/// An odd step is coprime with the power-of-two capacity, so the sequence
/// visits all `capacity` slots before returning to the start index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeSeq {
    index: usize,
    step: usize,
    mask: usize,
}

impl ProbeSeq {
    /// Builds the probe sequence for `raw_hash` against `capacity` slots.
    /// `capacity` must be a nonzero power of two.
    #[inline]
    pub(crate) fn new(raw_hash: u64, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());

        let mask = capacity - 1;
        let h1 = mix64(raw_hash);
        let h2 = mix64(raw_hash ^ GOLDEN_GAMMA);
        let step = if capacity > 1 {
            ((h2 % (capacity as u64 - 1)) as usize) | 1
        } else {
            1
        };

        ProbeSeq {
            index: h1 as usize & mask,
            step,
            mask,
        }
    }

    /// Current slot index.
    #[inline(always)]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Moves to the next slot in the sequence.
    #[inline(always)]
    pub(crate) fn advance(&mut self) {
        self.index = self.index.wrapping_add(self.step) & self.mask;
    }
}
