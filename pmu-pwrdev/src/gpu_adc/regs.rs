//! ADC power-monitor register map, as offsets from the instance base.

use crate::hw_trait::RegField;

/// Pipeline control.
pub const CTRL: u32 = 0x000;

/// IIR-filtered reading of channel `ch`, summed over the oversample count.
pub const fn iir(ch: u8) -> u32 {
    0x100 + ch as u32 * 4
}

/// Low 32 bits of the free-running code accumulator of channel `ch`.
/// Reading it latches the high half.
pub const fn acc_lo(ch: u8) -> u32 {
    0x200 + ch as u32 * 8
}

pub const fn acc_hi(ch: u8) -> u32 {
    acc_lo(ch) + 4
}

/// Multiplier `m` output (bus code × shunt code), summed over the oversample
/// count.
pub const fn mult(m: u8) -> u32 {
    0x400 + m as u32 * 4
}

pub const fn mult_acc_lo(m: u8) -> u32 {
    0x500 + m as u32 * 8
}

pub const fn mult_acc_hi(m: u8) -> u32 {
    mult_acc_lo(m) + 4
}

pub const fn threshold(t: u8) -> u32 {
    0x600 + t as u32 * 4
}

/// Per-channel offset calibration (V13).
pub const fn cal_offset(ch: u8) -> u32 {
    0x700 + ch as u32 * 4
}

/// Per-channel gain calibration (V13).
pub const fn cal_gain(ch: u8) -> u32 {
    0x780 + ch as u32 * 4
}

/// Hardware thresholds per instance.
pub const THRESHOLD_COUNT: u8 = 4;

/// Width of the free-running accumulators.
pub const ACC_BITS: u32 = 48;
/// Valid bits of an accumulator's high register.
pub const ACC_HI_MASK: u32 = (1 << (ACC_BITS - 32)) - 1;

/// CTRL fields
pub mod ctrl {
    use crate::hw_trait::RegField;

    pub const ENABLE: RegField = RegField::bit("ADC_CTRL_ENABLE", 0);
    /// Latch every IIR and multiplier register; self-clearing
    pub const SNAP: RegField = RegField::bit("ADC_CTRL_SNAP", 1);
    /// Reset filters and accumulators; self-clearing
    pub const SW_RESET: RegField = RegField::bit("ADC_CTRL_SW_RESET", 2);
    pub const OVERSAMPLE: RegField = RegField::new("ADC_CTRL_OVERSAMPLE", 8, 8);
}

/// Threshold register fields
pub mod threshold {
    use crate::hw_trait::RegField;

    /// Compared against the averaged code of the source
    pub const VALUE: RegField = RegField::new("ADC_THRESHOLD", 0, 24);
    /// Channel or multiplier index
    pub const SOURCE: RegField = RegField::new("ADC_THRESHOLD_SRC", 24, 5);
    pub const KIND: RegField = RegField::new("ADC_THRESHOLD_KIND", 29, 2);
    pub const ENABLE: RegField = RegField::bit("ADC_THRESHOLD_ENABLE", 31);

    pub const KIND_VOLTAGE: u32 = 0;
    pub const KIND_CURRENT: u32 = 1;
    pub const KIND_POWER: u32 = 2;
}

/// Calibration gain, UFXP4.12
pub const CAL_GAIN: RegField = RegField::new("ADC_CAL_GAIN", 0, 16);
/// Calibration offset in codes, two's complement
pub const CAL_OFFSET: RegField = RegField::new("ADC_CAL_OFFSET", 0, 16);
