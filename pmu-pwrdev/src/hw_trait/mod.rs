//! Hardware abstraction layer traits.
//!
//! This module defines the hardware interface traits (I2C, memory-mapped
//! registers, hardware mutex) that allow drivers to work with different
//! underlying implementations, whether real controller hardware or the
//! simulated hardware in [`crate::sim`].

pub mod i2c;
pub mod mmio;
pub mod mutex;

// Re-export traits
pub use i2c::{I2c, I2cError};
pub use mmio::{RegField, RegisterIo};
pub use mutex::{HwMutex, RegisterMutex};

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I2C transfer failure
    #[error("I2C error: {0}")]
    I2c(#[from] I2cError),

    /// Invalid parameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not supported by hardware
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Timeout waiting for hardware response
    #[error("Hardware timeout")]
    Timeout,

    /// Other hardware-specific error
    #[error("Hardware error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
