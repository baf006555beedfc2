//! Error types for power device operations.
//!
//! Every device operation returns [`Result`]. Helpers fail fast and the first
//! error propagates unchanged up the call chain.

use thiserror::Error;

use crate::hw_trait::{HwError, i2c::I2cError};
use crate::tracing::prelude::*;

/// Status reported by the bus-owning task for a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusStatus {
    /// Target address was not acknowledged.
    AddressNack,
    /// Target held the clock beyond the allowed interval.
    ClockStretchTimeout,
    /// Another master won arbitration mid-transaction.
    ArbitrationLost,
    /// Request named a port the bus task does not own.
    InvalidPort(u8),
    /// Block read returned a length byte that does not match the request.
    LengthMismatch { expected: u8, actual: u8 },
    /// Any other failure reported by the bus implementation.
    Other(String),
}

impl std::fmt::Display for BusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusStatus::AddressNack => write!(f, "address not acknowledged"),
            BusStatus::ClockStretchTimeout => write!(f, "clock stretch timeout"),
            BusStatus::ArbitrationLost => write!(f, "arbitration lost"),
            BusStatus::InvalidPort(port) => write!(f, "invalid port {}", port),
            BusStatus::LengthMismatch { expected, actual } => {
                write!(f, "block length mismatch (expected {}, got {})", expected, actual)
            }
            BusStatus::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<I2cError> for BusStatus {
    fn from(e: I2cError) -> Self {
        match e {
            I2cError::Nack => BusStatus::AddressNack,
            I2cError::ClockStretchTimeout => BusStatus::ClockStretchTimeout,
            I2cError::ArbitrationLost => BusStatus::ArbitrationLost,
            I2cError::Other(msg) => BusStatus::Other(msg),
        }
    }
}

/// Power device errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PwrError {
    /// No acknowledgment from the bus task within the transaction interval
    #[error("Bus transaction timed out")]
    BusTimeout,

    /// Hardware bus mutex still held by the other processor after all retries
    #[error("Bus busy: hardware mutex not acquired after {attempts} attempts")]
    BusBusy { attempts: u32 },

    /// Failure reported by the bus task itself
    #[error("Bus error: {0}")]
    Bus(BusStatus),

    /// Interface not implemented by this device type
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// Caller supplied an out-of-range index or unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration or domain inconsistency; never expected at runtime
    #[error("Invalid internal state: {0}")]
    InvalidState(String),

    /// Live registers no longer match the values last written by load
    #[error("Device tampered: register 0x{register:02x} reads 0x{actual:04x}, expected 0x{expected:04x}")]
    DeviceTampered {
        register: u8,
        expected: u32,
        actual: u32,
    },

    /// Accumulator snapshot predates a hardware reset
    #[error("Accumulator sequence mismatch: caller has {expected}, device is at {current}")]
    AccumulatorSequenceMismatch { expected: u32, current: u32 },

    /// Arithmetic result does not fit the destination type
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Value needs more bits than the destination register field provides
    #[error("Value 0x{value:x} needs {needed} bits, field {field} has {width}")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        needed: u32,
        width: u32,
    },
}

impl PwrError {
    /// True for capability absence, which callers treat as a normal outcome.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, PwrError::NotSupported(_))
    }

    /// True when an accumulated snapshot predates the last device reset;
    /// the caller restarts from a fresh snapshot.
    pub fn is_stale_snapshot(&self) -> bool {
        matches!(self, PwrError::AccumulatorSequenceMismatch { .. })
    }

    /// Build an invalid-state error and log it; these indicate firmware bugs.
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        error!("Invalid internal state: {}", msg);
        PwrError::InvalidState(msg)
    }
}

impl From<BusStatus> for PwrError {
    fn from(status: BusStatus) -> Self {
        PwrError::Bus(status)
    }
}

impl From<HwError> for PwrError {
    fn from(e: HwError) -> Self {
        match e {
            HwError::I2c(e) => PwrError::Bus(e.into()),
            HwError::Timeout => PwrError::BusTimeout,
            HwError::InvalidParameter(msg) => PwrError::InvalidArgument(msg),
            HwError::NotSupported(_) => PwrError::NotSupported("hardware operation"),
            HwError::Other(msg) => PwrError::Bus(BusStatus::Other(msg)),
        }
    }
}

/// Convenient Result type for power device operations.
pub type Result<T> = std::result::Result<T, PwrError>;

/// Check `index < count`, reporting `what` on violation.
pub(crate) fn check_index(what: &str, index: u8, count: u8) -> Result<()> {
    if index < count {
        Ok(())
    } else {
        Err(PwrError::InvalidArgument(format!(
            "{} index {} out of range (count {})",
            what, index, count
        )))
    }
}
