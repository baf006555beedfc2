//! Hardware generations of the ADC power monitor.

use serde::Serialize;

use crate::device::DeviceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AdcGeneration {
    /// 8 channels, 4 multipliers
    V10,
    /// 16 channels, 8 multipliers, per-provider bus full-scale override
    V11,
    /// V11 plus per-channel offset/gain calibration
    V13,
}

impl AdcGeneration {
    pub const fn channel_count(self) -> u8 {
        match self {
            AdcGeneration::V10 => 8,
            AdcGeneration::V11 | AdcGeneration::V13 => 16,
        }
    }

    pub const fn multiplier_count(self) -> u8 {
        match self {
            AdcGeneration::V10 => 4,
            AdcGeneration::V11 | AdcGeneration::V13 => 8,
        }
    }

    pub const fn supports_full_scale_override(self) -> bool {
        !matches!(self, AdcGeneration::V10)
    }

    pub const fn has_calibration(self) -> bool {
        matches!(self, AdcGeneration::V13)
    }

    pub const fn device_type(self) -> DeviceType {
        match self {
            AdcGeneration::V10 => DeviceType::GpuAdcV10,
            AdcGeneration::V11 => DeviceType::GpuAdcV11,
            AdcGeneration::V13 => DeviceType::GpuAdcV13,
        }
    }
}
