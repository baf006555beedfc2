//! Serial bus client substrate.
//!
//! Devices on the shared two-wire bus are reached through a task that owns the
//! physical ports ([`task::BusTask`]). Drivers never touch the bus directly:
//! they hand an [`I2cDevice`] record and a register index to a
//! [`client::BusClient`], which arbitrates the hardware mutex shared with the
//! other processor, posts the request to the bus task, and waits for the
//! reply.
//!
//! Byte order and the byte-vs-block wire protocol are per-device properties.
//! This module holds the pure translation between register values and wire
//! bytes so both the client and tests share one definition.

pub mod client;
pub mod task;

pub use client::BusClient;
pub use task::{BusRequest, BusTask};

use crate::error::{BusStatus, PwrError, Result};

/// Register byte order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Wire protocol for register payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cProtocol {
    /// Raw payload bytes.
    Byte,
    /// SMBus-style block: payload preceded by a length byte. Only applied to
    /// transfers longer than two bytes.
    Block,
}

/// Register width of a single indexed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWidth {
    U8,
    U16,
    U32,
}

impl RegWidth {
    pub const fn bytes(self) -> usize {
        match self {
            RegWidth::U8 => 1,
            RegWidth::U16 => 2,
            RegWidth::U32 => 4,
        }
    }
}

/// Physical wiring of one bus-attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cDevice {
    /// 7-bit bus address
    pub address: u8,
    /// Bus port the device hangs off
    pub port: u8,
    pub endianness: Endianness,
    pub protocol: I2cProtocol,
    /// Extra hardware-mutex acquisition attempts before reporting busy
    pub retry_count: u8,
}

impl I2cDevice {
    /// INA-family wiring: big-endian, byte protocol.
    pub fn big_endian(address: u8, port: u8) -> Self {
        Self {
            address,
            port,
            endianness: Endianness::Big,
            protocol: I2cProtocol::Byte,
            retry_count: 3,
        }
    }

    /// Little-endian block-protocol wiring.
    pub fn little_endian_block(address: u8, port: u8) -> Self {
        Self {
            address,
            port,
            endianness: Endianness::Little,
            protocol: I2cProtocol::Block,
            retry_count: 3,
        }
    }

    /// True if a transfer of `width` carries a leading length byte.
    ///
    /// One- and two-byte transfers never do, regardless of protocol.
    pub fn uses_length_byte(&self, width: RegWidth) -> bool {
        self.protocol == I2cProtocol::Block && width.bytes() > 2
    }

    /// Number of bytes read back for a register of `width`.
    pub fn wire_len(&self, width: RegWidth) -> usize {
        width.bytes() + usize::from(self.uses_length_byte(width))
    }

    /// Encode a register value into wire payload bytes.
    pub fn encode(&self, width: RegWidth, value: u32) -> Result<Vec<u8>> {
        let n = width.bytes();
        if n < 4 && value >> (n * 8) != 0 {
            return Err(PwrError::FieldOverflow {
                field: "register payload",
                value: value as u64,
                needed: crate::hw_trait::mmio::min_bit_width(value),
                width: (n * 8) as u32,
            });
        }

        let mut out = Vec::with_capacity(n + 1);
        if self.uses_length_byte(width) {
            out.push(n as u8);
        }
        match self.endianness {
            Endianness::Big => out.extend_from_slice(&value.to_be_bytes()[4 - n..]),
            Endianness::Little => out.extend_from_slice(&value.to_le_bytes()[..n]),
        }
        Ok(out)
    }

    /// Decode wire bytes read back for a register of `width`.
    pub fn decode(&self, width: RegWidth, wire: &[u8]) -> Result<u32> {
        let n = width.bytes();
        let data = if self.uses_length_byte(width) {
            let (&len, rest) = wire
                .split_first()
                .ok_or(PwrError::Bus(BusStatus::LengthMismatch {
                    expected: n as u8,
                    actual: 0,
                }))?;
            if len as usize != n {
                return Err(PwrError::Bus(BusStatus::LengthMismatch {
                    expected: n as u8,
                    actual: len,
                }));
            }
            rest
        } else {
            wire
        };

        if data.len() != n {
            return Err(PwrError::Bus(BusStatus::LengthMismatch {
                expected: n as u8,
                actual: data.len() as u8,
            }));
        }

        let mut buf = [0u8; 4];
        let value = match self.endianness {
            Endianness::Big => {
                buf[4 - n..].copy_from_slice(data);
                u32::from_be_bytes(buf)
            }
            Endianness::Little => {
                buf[..n].copy_from_slice(data);
                u32::from_le_bytes(buf)
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_word() {
        let dev = I2cDevice::big_endian(0x40, 0);
        assert_eq!(dev.encode(RegWidth::U16, 0x1234).unwrap(), vec![0x12, 0x34]);
        assert_eq!(dev.decode(RegWidth::U16, &[0x12, 0x34]).unwrap(), 0x1234);
    }

    #[test]
    fn block_protocol_omits_length_for_short_transfers() {
        let dev = I2cDevice::little_endian_block(0x2C, 1);
        assert_eq!(dev.encode(RegWidth::U8, 0xAB).unwrap(), vec![0xAB]);
        assert_eq!(dev.encode(RegWidth::U16, 0x1234).unwrap(), vec![0x34, 0x12]);
        assert_eq!(dev.wire_len(RegWidth::U16), 2);
    }

    #[test]
    fn block_protocol_prefixes_length_for_dwords() {
        let dev = I2cDevice::little_endian_block(0x2C, 1);
        assert_eq!(
            dev.encode(RegWidth::U32, 0x1122_3344).unwrap(),
            vec![4, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(dev.wire_len(RegWidth::U32), 5);
        assert_eq!(
            dev.decode(RegWidth::U32, &[4, 0x44, 0x33, 0x22, 0x11]).unwrap(),
            0x1122_3344
        );
    }

    #[test]
    fn block_length_mismatch_is_reported() {
        let dev = I2cDevice::little_endian_block(0x2C, 1);
        let err = dev.decode(RegWidth::U32, &[3, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            PwrError::Bus(BusStatus::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn encode_rejects_values_wider_than_register() {
        let dev = I2cDevice::big_endian(0x40, 0);
        assert!(matches!(
            dev.encode(RegWidth::U8, 0x100),
            Err(PwrError::FieldOverflow { .. })
        ));
    }
}
