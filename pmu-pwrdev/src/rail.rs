//! External providers consumed by the on-die estimators.
//!
//! Voltage-rail and fuse/chip-config data come from other subsystems. They are
//! modeled as traits so the estimator can be exercised against
//! [`crate::sim`] implementations.

use serde::Serialize;

use crate::error::{PwrError, Result};

/// Raw domain tag reported for logic rails.
pub const DOMAIN_TAG_LOGIC: u8 = 0;
/// Raw domain tag reported for memory-subsystem rails.
pub const DOMAIN_TAG_MEMORY: u8 = 1;

/// Voltage domain of a rail. Only these two exist; any other tag is a
/// configuration bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoltageDomain {
    Logic,
    Memory,
}

impl TryFrom<u8> for VoltageDomain {
    type Error = PwrError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            DOMAIN_TAG_LOGIC => Ok(VoltageDomain::Logic),
            DOMAIN_TAG_MEMORY => Ok(VoltageDomain::Memory),
            other => Err(PwrError::invalid_state(format!(
                "unsupported voltage domain tag {}",
                other
            ))),
        }
    }
}

/// Voltage-rail provider.
///
/// `scale_factor` and `leakage` are UFXP20.12 values in mW (power mode) or
/// mA (current mode) per unit of block activity and absolute, respectively.
pub trait RailProvider: Send + Sync {
    /// Present rail voltage in µV.
    fn voltage_uv(&self, rail: u8) -> Result<u32>;

    /// Raw domain tag for the rail.
    fn domain(&self, rail: u8) -> Result<u8>;

    /// Activity-to-power (or current) scale factor at `voltage_uv`.
    fn scale_factor(&self, rail: u8, voltage_uv: u32, current_mode: bool) -> Result<u32>;

    /// Leakage power (or current) at `voltage_uv`, with `temperature_offset`
    /// in 1/256 °C applied to the rail's temperature estimate.
    fn leakage(
        &self,
        rail: u8,
        voltage_uv: u32,
        current_mode: bool,
        temperature_offset: i32,
    ) -> Result<u32>;
}

/// Enabled hardware instance counts read from fuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InstanceCounts {
    pub tpc: u8,
    pub fbpa: u8,
    pub xbar: u8,
}

/// Fuse/chip-config provider.
pub trait ChipConfig: Send + Sync {
    fn instance_counts(&self) -> InstanceCounts;
}
