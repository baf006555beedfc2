//! Memory-mapped register access.
//!
//! The on-die ADC and block-activity hardware are local to this controller, so
//! access needs no bus arbitration. Registers are 32 bits wide and addressed by
//! byte offset.

use crate::error::{PwrError, Result};

/// 32-bit memory-mapped register window.
pub trait RegisterIo: Send + Sync {
    /// Read the register at `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Write `value` to the register at `addr`.
    fn write(&self, addr: u32, value: u32);
}

/// A named bit range within a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegField {
    pub name: &'static str,
    pub lsb: u32,
    pub width: u32,
}

impl RegField {
    pub const fn new(name: &'static str, lsb: u32, width: u32) -> Self {
        Self { name, lsb, width }
    }

    /// Single-bit field.
    pub const fn bit(name: &'static str, lsb: u32) -> Self {
        Self::new(name, lsb, 1)
    }

    /// Field mask in register position.
    pub const fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            ((1u32 << self.width) - 1) << self.lsb
        }
    }

    /// Largest value the field holds.
    pub const fn max(&self) -> u32 {
        self.mask() >> self.lsb
    }

    /// Extract the field from `reg`.
    pub const fn get(&self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.lsb
    }

    /// Return `reg` with the field replaced by `value`.
    ///
    /// Rejects values whose bit width exceeds the field instead of truncating.
    pub fn set(&self, reg: u32, value: u32) -> Result<u32> {
        let needed = min_bit_width(value);
        if needed > self.width {
            return Err(PwrError::FieldOverflow {
                field: self.name,
                value: value as u64,
                needed,
                width: self.width,
            });
        }
        Ok((reg & !self.mask()) | (value << self.lsb))
    }

    /// Return `reg` with the single-bit field set or cleared.
    pub const fn set_flag(&self, reg: u32, on: bool) -> u32 {
        if on {
            reg | self.mask()
        } else {
            reg & !self.mask()
        }
    }

    /// True if any bit of the field is set.
    pub const fn is_set(&self, reg: u32) -> bool {
        reg & self.mask() != 0
    }
}

/// Number of bits needed to represent `value` (zero needs zero bits).
pub const fn min_bit_width(value: u32) -> u32 {
    32 - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: RegField = RegField::new("TEST", 4, 6);

    #[test]
    fn field_round_trips_within_width() {
        let reg = FIELD.set(0xFFFF_FFFF, 0x2A).unwrap();
        assert_eq!(FIELD.get(reg), 0x2A);
        // Bits outside the field are untouched
        assert_eq!(reg & !FIELD.mask(), 0xFFFF_FFFF & !FIELD.mask());
    }

    #[test]
    fn field_rejects_wide_values() {
        let err = FIELD.set(0, 0x40).unwrap_err();
        assert_eq!(
            err,
            PwrError::FieldOverflow {
                field: "TEST",
                value: 0x40,
                needed: 7,
                width: 6
            }
        );
    }

    #[test]
    fn min_bit_width_edges() {
        assert_eq!(min_bit_width(0), 0);
        assert_eq!(min_bit_width(1), 1);
        assert_eq!(min_bit_width(0xFFFF), 16);
        assert_eq!(min_bit_width(u32::MAX), 32);
    }

    #[test]
    fn full_width_field() {
        let field = RegField::new("ALL", 0, 32);
        assert_eq!(field.mask(), u32::MAX);
        assert_eq!(field.set(0, u32::MAX).unwrap(), u32::MAX);
    }
}
