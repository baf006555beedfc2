//! I2C bus master trait.

use async_trait::async_trait;

use super::Result;

/// I2C transfer failures reported by a bus implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum I2cError {
    /// Address or data byte not acknowledged
    #[error("NACK")]
    Nack,
    /// Target stretched the clock past the controller's limit
    #[error("clock stretch timeout")]
    ClockStretchTimeout,
    /// Lost arbitration to another master
    #[error("arbitration lost")]
    ArbitrationLost,
    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// I2C bus master.
///
/// Addresses are 7-bit. One implementation drives one physical port.
#[async_trait]
pub trait I2c: Send {
    /// Write bytes to the device at `addr`.
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Read `buffer.len()` bytes from the device at `addr`.
    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write then read with a repeated start, typically a register index
    /// followed by its contents.
    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()>;
}
