//! Instantaneous measurement snapshot.

use serde::Serialize;

/// Sentinel for a tuple field that cannot be computed for this provider,
/// e.g. a power/current cross-conversion across several rails.
pub const INVALID: u32 = u32::MAX;

/// A {voltage, current, power, energy} snapshot from one query.
///
/// Produced fresh on every tuple read; never cached across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Tuple {
    pub voltage_uv: u32,
    pub current_ma: u32,
    pub power_mw: u32,
    pub energy_mj: u32,
}

impl Tuple {
    /// Voltage in mV, rounded. Invalid voltage stays invalid.
    pub fn voltage_mv(&self) -> u32 {
        if self.voltage_uv == INVALID {
            INVALID
        } else {
            self.voltage_uv.saturating_add(500) / 1000
        }
    }
}
