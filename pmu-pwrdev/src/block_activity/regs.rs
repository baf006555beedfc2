//! Block-activity (BA) window register map.
//!
//! Eight windows, each with a configuration word, a window-sum readout, per
//! rail-slot Factor A / Factor C registers, a 16-entry Factor A calibration
//! table per slot, and four thresholds. Chip-wide registers hold the enabled
//! instance counts, peak-power (DBA) settings and the idle recompute trigger.

use crate::hw_trait::RegField;

/// Base of the BA register block.
pub const BASE: u32 = 0x0010_A000;

/// Number of hardware windows.
pub const WINDOW_COUNT: u8 = 8;
/// Rail slots per window.
pub const RAIL_SLOTS: u8 = 4;
/// Factor A calibration table entries per rail slot.
pub const LUT_ENTRIES: u8 = 16;
/// Hardware thresholds per window.
pub const THRESHOLD_COUNT: u8 = 4;
/// Peak-power model coefficients.
pub const DBA_COEFFS: usize = 3;

const WINDOW_STRIDE: u32 = 0x40;
const LUT_BASE: u32 = BASE + 0x400;
const LUT_WINDOW_STRIDE: u32 = 0x100;
const LUT_SLOT_STRIDE: u32 = 0x40;

fn window(w: u8) -> u32 {
    BASE + w as u32 * WINDOW_STRIDE
}

/// Window configuration word.
pub fn config(w: u8) -> u32 {
    window(w)
}

/// Window sum of scaled activity, in mW or mA.
pub fn window_sum(w: u8) -> u32 {
    window(w) + 0x04
}

pub fn factor_a(w: u8, slot: u8) -> u32 {
    window(w) + 0x08 + slot as u32 * 4
}

pub fn factor_c(w: u8, slot: u8) -> u32 {
    window(w) + 0x18 + slot as u32 * 4
}

pub fn threshold(w: u8, t: u8) -> u32 {
    window(w) + 0x28 + t as u32 * 4
}

pub fn lut(w: u8, slot: u8, entry: u8) -> u32 {
    LUT_BASE + w as u32 * LUT_WINDOW_STRIDE + slot as u32 * LUT_SLOT_STRIDE + entry as u32 * 4
}

/// Enabled TPC/FBPA/crossbar instance counts.
pub const INSTANCE_COUNTS: u32 = BASE + 0x800;
/// Peak-power period and enable.
pub const DBA_CONFIG: u32 = BASE + 0x804;

pub fn dba_coeff(i: usize) -> u32 {
    BASE + 0x808 + i as u32 * 4
}

/// Writing TRIGGER recomputes idle power from the instance counts.
pub const IDLE_CTRL: u32 = BASE + 0x814;

/// Window configuration word fields
pub mod config {
    use crate::hw_trait::RegField;

    pub const ENABLE: RegField = RegField::bit("BA_CONFIG_ENABLE", 0);
    /// log2 of the window length in samples
    pub const WINDOW_SIZE: RegField = RegField::new("BA_CONFIG_WINDOW_SIZE", 1, 4);
    /// log2 of the step between window evaluations
    pub const STEP_SIZE: RegField = RegField::new("BA_CONFIG_STEP_SIZE", 5, 5);
    /// Window sums are current rather than power
    pub const CURRENT_MODE: RegField = RegField::bit("BA_CONFIG_CURRENT_MODE", 10);

    /// Rail slot enable
    pub const fn rail_enable(slot: u8) -> RegField {
        RegField::bit("BA_CONFIG_RAIL_EN", 12 + 3 * slot as u32)
    }

    /// Slot takes Factor A from its calibration table
    pub const fn rail_lut(slot: u8) -> RegField {
        RegField::bit("BA_CONFIG_RAIL_LUT", 13 + 3 * slot as u32)
    }

    /// Slot takes its voltage from the ADC instead of the rail setpoint
    pub const fn rail_adc_select(slot: u8) -> RegField {
        RegField::bit("BA_CONFIG_RAIL_ADC_SEL", 14 + 3 * slot as u32)
    }
}

/// Factor A register fields
pub mod factor_a {
    use crate::hw_trait::RegField;

    pub const VALUE: RegField = RegField::new("BA_FACTOR_A", 0, 16);
    /// Right shift applied to VALUE by hardware
    pub const SHIFT: RegField = RegField::new("BA_FACTOR_A_SHIFT", 16, 5);
    /// Slot monitors a memory-subsystem rail
    pub const MEMORY_DOMAIN: RegField = RegField::bit("BA_FACTOR_A_MEM", 24);
}

/// Factor C (leakage) register field, integer mW or mA
pub const FACTOR_C: RegField = RegField::new("BA_FACTOR_C", 0, 24);

/// Factor A calibration table entry
pub const LUT_VALUE: RegField = RegField::new("BA_LUT_FACTOR_A", 0, 16);

/// Threshold register fields
pub mod threshold {
    use crate::hw_trait::RegField;

    pub const VALUE: RegField = RegField::new("BA_THRESHOLD", 0, 30);
    /// Compare against the dynamic (leakage-free) sum
    pub const DYNAMIC: RegField = RegField::bit("BA_THRESHOLD_DYNAMIC", 30);
    pub const ENABLE: RegField = RegField::bit("BA_THRESHOLD_ENABLE", 31);
}

/// Instance count fields
pub mod instance_counts {
    use crate::hw_trait::RegField;

    pub const TPC: RegField = RegField::new("BA_COUNT_TPC", 0, 8);
    pub const FBPA: RegField = RegField::new("BA_COUNT_FBPA", 8, 6);
    pub const XBAR: RegField = RegField::new("BA_COUNT_XBAR", 14, 6);
}

/// Peak-power configuration fields
pub mod dba {
    use crate::hw_trait::RegField;

    pub const PERIOD: RegField = RegField::new("BA_DBA_PERIOD", 0, 6);
    pub const ENABLE: RegField = RegField::bit("BA_DBA_ENABLE", 31);
    pub const COEFF: RegField = RegField::new("BA_DBA_COEFF", 0, 16);
}

pub const IDLE_TRIGGER: u32 = 1;
