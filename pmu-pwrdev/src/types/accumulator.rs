//! Free-running accumulator tracking.
//!
//! Hardware accumulators count raw codes and wrap at their register width.
//! Each [`Accumulator`] remembers the last raw sample it saw and folds the
//! wrapped delta into a running value in physical units.
//!
//! A hardware reset changes what the raw counter means, so every snapshot
//! carries the device's sequence id. Deltas between snapshots with different
//! ids must be discarded.

use serde::Serialize;

/// Last-seen raw sample plus running value in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accumulator {
    last_raw: u64,
    value: u64,
}

impl Accumulator {
    pub const fn new() -> Self {
        Self {
            last_raw: 0,
            value: 0,
        }
    }

    /// Fold a new raw sample from a counter `counter_bits` wide.
    ///
    /// `to_units` converts a raw delta into physical units. Returns the raw
    /// delta that was folded. The running value saturates instead of wrapping.
    pub fn fold(&mut self, raw: u64, counter_bits: u32, to_units: impl Fn(u64) -> u64) -> u64 {
        let mask = if counter_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << counter_bits) - 1
        };
        let delta = raw.wrapping_sub(self.last_raw) & mask;
        self.last_raw = raw & mask;
        self.value = self.value.saturating_add(to_units(delta));
        delta
    }

    /// Running value in physical units.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Forget history, as after a hardware reset zeroes the counter.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Running accumulation snapshot for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccumulatedTuple {
    /// Device reset-sequence id at the time of the read
    pub seq_id: u32,
    /// Accumulated voltage-time in µV·µs
    pub voltage_uv_us: u64,
    /// Accumulated charge in nC
    pub charge_nc: u64,
    /// Accumulated energy in nJ
    pub energy_nj: u64,
}

impl AccumulatedTuple {
    /// Energy in whole mJ, rounded down.
    pub fn energy_mj(&self) -> u64 {
        self.energy_nj / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_accumulates_deltas() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.fold(100, 32, |d| d * 10), 100);
        assert_eq!(acc.fold(150, 32, |d| d * 10), 50);
        assert_eq!(acc.value(), 1500);
        // Repeating the last sample adds nothing
        assert_eq!(acc.fold(150, 32, |d| d * 10), 0);
    }

    #[test]
    fn fold_handles_counter_wrap() {
        let mut acc = Accumulator::new();
        acc.fold(0xFFF0, 16, |d| d);
        // Counter wrapped past 0xFFFF to 0x0010: true delta is 0x20
        assert_eq!(acc.fold(0x0010, 16, |d| d), 0x20);
        assert_eq!(acc.value(), 0xFFF0 + 0x20);
    }

    #[test]
    fn value_saturates() {
        let mut acc = Accumulator::new();
        acc.fold(1, 64, |_| u64::MAX);
        acc.fold(2, 64, |_| 5);
        assert_eq!(acc.value(), u64::MAX);
    }

    #[test]
    fn reset_clears_history() {
        let mut acc = Accumulator::new();
        acc.fold(500, 32, |d| d);
        acc.reset();
        assert_eq!(acc, Accumulator::new());
    }
}
