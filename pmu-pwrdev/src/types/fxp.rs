//! Fixed-point formats and overflow-guarded arithmetic.
//!
//! Hardware and calibration data use several Q formats (20.12 coefficients,
//! 4.12 correction slopes, 8.8 resistances, 28.4 ADC factors). Values are
//! carried as raw integers; an [`FxpFormat`] describes how to interpret them.
//!
//! Products that could exceed 32 bits are formed in 64-bit (or 128-bit for
//! 64x64) intermediates and range-checked before narrowing. Out-of-range
//! results clamp to the destination's representable range, never wrap.
//!
//! # Example
//!
//! ```
//! use pmu_pwrdev::types::fxp::UFXP20_12;
//!
//! let one = UFXP20_12.from_int(1);
//! assert_eq!(one, 4096);
//! assert_eq!(UFXP20_12.to_int(one * 2048), 2048);
//! ```

use crate::error::{PwrError, Result};

/// A binary fixed-point format: `int_bits.frac_bits`, optionally signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FxpFormat {
    pub name: &'static str,
    pub int_bits: u32,
    pub frac_bits: u32,
    pub signed: bool,
}

/// Unsigned 20.12, used for current and power coefficients.
pub const UFXP20_12: FxpFormat = FxpFormat::unsigned("UFXP20.12", 20, 12);
/// Unsigned 4.12, used for correction slopes.
pub const UFXP4_12: FxpFormat = FxpFormat::unsigned("UFXP4.12", 4, 12);
/// Signed 4.12, used for correction offsets.
pub const SFXP4_12: FxpFormat = FxpFormat::signed("SFXP4.12", 4, 12);
/// Unsigned 8.8, used for fractional shunt resistances.
pub const UFXP8_8: FxpFormat = FxpFormat::unsigned("UFXP8.8", 8, 8);
/// Unsigned 28.4, used for ADC voltage and current conversion factors.
pub const UFXP28_4: FxpFormat = FxpFormat::unsigned("UFXP28.4", 28, 4);

impl FxpFormat {
    pub const fn unsigned(name: &'static str, int_bits: u32, frac_bits: u32) -> Self {
        Self {
            name,
            int_bits,
            frac_bits,
            signed: false,
        }
    }

    pub const fn signed(name: &'static str, int_bits: u32, frac_bits: u32) -> Self {
        Self {
            name,
            int_bits,
            frac_bits,
            signed: true,
        }
    }

    /// Total storage bits including sign.
    pub const fn total_bits(&self) -> u32 {
        self.int_bits + self.frac_bits
    }

    /// Raw representation of 1.0.
    pub const fn one(&self) -> i64 {
        1 << self.frac_bits
    }

    /// Largest raw value.
    pub const fn max_raw(&self) -> i64 {
        if self.signed {
            (1i64 << (self.total_bits() - 1)) - 1
        } else {
            (1i64 << self.total_bits()) - 1
        }
    }

    /// Smallest raw value.
    pub const fn min_raw(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.total_bits() - 1))
        } else {
            0
        }
    }

    /// Clamp a wide raw value into this format's range.
    pub fn clamp_raw(&self, raw: i128) -> i64 {
        raw.clamp(self.min_raw() as i128, self.max_raw() as i128) as i64
    }

    /// Convert an integer to raw fixed point, clamping to the format's range.
    pub fn from_int(&self, value: i64) -> i64 {
        self.clamp_raw((value as i128) << self.frac_bits)
    }

    /// Convert raw fixed point to the nearest integer (halves away from zero).
    pub fn to_int(&self, raw: i64) -> i64 {
        round_shift_i128(raw as i128, self.frac_bits) as i64
    }

    /// Raw value of `num / den`, rounded and clamped.
    pub fn from_ratio(&self, num: i64, den: i64) -> Result<i64> {
        if den == 0 {
            return Err(PwrError::InvalidArgument(format!(
                "{} ratio with zero denominator",
                self.name
            )));
        }
        let scaled = (num as i128) << self.frac_bits;
        Ok(self.clamp_raw(div_round_i128(scaled, den as i128)))
    }
}

/// Shift right by `shift` bits, rounding halves away from zero.
pub fn round_shift_i128(value: i128, shift: u32) -> i128 {
    if shift == 0 {
        return value;
    }
    let half = 1i128 << (shift - 1);
    if value >= 0 {
        (value + half) >> shift
    } else {
        -((-value + half) >> shift)
    }
}

/// Signed division rounding halves away from zero. `den` must be nonzero.
pub fn div_round_i128(num: i128, den: i128) -> i128 {
    let (n, d) = if den < 0 { (-num, -den) } else { (num, den) };
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

/// Unsigned division rounding halves up, saturating on zero denominator.
pub fn div_round_u64(num: u64, den: u64) -> u64 {
    if den == 0 {
        return u64::MAX;
    }
    div_round_i128(num as i128, den as i128) as u64
}

/// `(a * b) >> shift` with rounding, formed in 128 bits, saturating at
/// `u64::MAX`.
pub fn mul_shift_u64(a: u64, b: u64, shift: u32) -> u64 {
    let product = (a as u128) * (b as u128);
    let rounded = if shift == 0 {
        product
    } else {
        (product + (1u128 << (shift - 1))) >> shift
    };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

/// `(a * b) >> shift` with rounding, clamped to the u32 range.
pub fn mul_shift_u32(a: u32, b: u32, shift: u32) -> u32 {
    saturate_u32(mul_shift_u64(a as u64, b as u64, shift))
}

/// Narrow to u32, clamping instead of truncating.
pub fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Narrow a signed wide value into u32, clamping negatives to zero.
pub fn saturate_i64_to_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

/// Narrow to u32, failing with an overflow error naming `what`.
pub fn checked_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PwrError::Overflow(format!("{} = {} exceeds 32 bits", what, value)))
}

/// Power in mW from voltage in mV and current in mA, clamped at u32::MAX.
pub fn power_mw(voltage_mv: u32, current_ma: u32) -> u32 {
    saturate_u32(div_round_u64(voltage_mv as u64 * current_ma as u64, 1000))
}

/// Current in mA from power in mW and voltage in mV. Zero voltage yields
/// `None` since the quotient is undefined.
pub fn current_ma(power_mw: u32, voltage_mv: u32) -> Option<u32> {
    if voltage_mv == 0 {
        return None;
    }
    Some(saturate_u32(div_round_u64(power_mw as u64 * 1000, voltage_mv as u64)))
}
