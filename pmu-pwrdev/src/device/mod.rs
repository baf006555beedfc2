//! Power device interface.
//!
//! Every sensor and limiter implements [`PowerDevice`]. Operations a device
//! type does not support keep the trait's default body and report
//! [`PwrError::NotSupported`], which callers treat as a normal outcome.
//!
//! Concrete devices live in a closed set, [`PwrDevice`], constructed from a
//! [`DeviceDescriptor`] and dispatched by device-type tag.

use async_trait::async_trait;
use serde::Serialize;

use crate::block_activity::{BaDescriptor, BaEstimator};
use crate::error::{PwrError, Result};
use crate::gpu_adc::{GpuAdc, GpuAdcDescriptor};
use crate::peripheral::{
    ina219::{Ina219, Ina219Descriptor},
    ina3221::{Ina3221, Ina3221Descriptor},
    nct3933u::{Nct3933u, Nct3933uDescriptor},
};
use crate::types::{AccumulatedTuple, LimitUnit, Tuple};

pub mod context;
pub mod registry;

pub use context::PwrContext;
pub use registry::{DeviceStatus, Registry};

/// Device-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    Ina219,
    Ina3221,
    Nct3933u,
    BlockActivity,
    GpuAdcV10,
    GpuAdcV11,
    GpuAdcV13,
}

impl DeviceType {
    pub const fn name(self) -> &'static str {
        match self {
            DeviceType::Ina219 => "INA219",
            DeviceType::Ina3221 => "INA3221",
            DeviceType::Nct3933u => "NCT3933U",
            DeviceType::BlockActivity => "BA",
            DeviceType::GpuAdcV10 => "ADC10",
            DeviceType::GpuAdcV11 => "ADC11",
            DeviceType::GpuAdcV13 => "ADC13",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform operations over power sensors and limiters.
///
/// `provider` selects a measurement source within the device and must be
/// below [`provider_count`](Self::provider_count); `limit_index` must be
/// below [`threshold_count`](Self::threshold_count).
#[async_trait]
pub trait PowerDevice: Send {
    fn device_type(&self) -> DeviceType;

    /// Number of measurement sources.
    fn provider_count(&self) -> u8;

    /// Number of limit kinds per provider.
    fn threshold_count(&self) -> u8 {
        0
    }

    /// Program the hardware from the descriptor. Safe to repeat.
    async fn load(&mut self, ctx: &PwrContext) -> Result<()>;

    /// Voltage in µV.
    async fn get_voltage(&mut self, _ctx: &PwrContext, _provider: u8) -> Result<u32> {
        Err(PwrError::NotSupported("get_voltage"))
    }

    /// Current in mA.
    async fn get_current(&mut self, _ctx: &PwrContext, _provider: u8) -> Result<u32> {
        Err(PwrError::NotSupported("get_current"))
    }

    /// Power in mW.
    async fn get_power(&mut self, _ctx: &PwrContext, _provider: u8) -> Result<u32> {
        Err(PwrError::NotSupported("get_power"))
    }

    /// Program one threshold. [`LIMIT_DISABLED`](crate::types::LIMIT_DISABLED)
    /// removes it.
    async fn set_limit(
        &mut self,
        _ctx: &PwrContext,
        _provider: u8,
        _limit_index: u8,
        _unit: LimitUnit,
        _value: u32,
    ) -> Result<()> {
        Err(PwrError::NotSupported("set_limit"))
    }

    /// Last programmed threshold value.
    async fn get_limit(
        &mut self,
        _ctx: &PwrContext,
        _provider: u8,
        _limit_index: u8,
    ) -> Result<u32> {
        Err(PwrError::NotSupported("get_limit"))
    }

    /// Periodic refresh against external state.
    async fn state_sync(&mut self, _ctx: &PwrContext) -> Result<()> {
        Err(PwrError::NotSupported("state_sync"))
    }

    /// Voltage, current, power and energy sampled together.
    async fn tuple_get(&mut self, _ctx: &PwrContext, _provider: u8) -> Result<Tuple> {
        Err(PwrError::NotSupported("tuple_get"))
    }

    /// Running accumulation snapshot. `seq_id` is the sequence id of the
    /// caller's previous snapshot.
    async fn tuple_accumulated_get(
        &mut self,
        _ctx: &PwrContext,
        _provider: u8,
        _seq_id: u32,
    ) -> Result<AccumulatedTuple> {
        Err(PwrError::NotSupported("tuple_accumulated_get"))
    }

    /// Notification that a rail voltage moved.
    async fn voltage_changed(&mut self, _ctx: &PwrContext) -> Result<()> {
        Err(PwrError::NotSupported("voltage_changed"))
    }
}

/// Board configuration for one device slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDescriptor {
    Ina219(Ina219Descriptor),
    Ina3221(Ina3221Descriptor),
    Nct3933u(Nct3933uDescriptor),
    BlockActivity(BaDescriptor),
    GpuAdc(GpuAdcDescriptor),
}

/// A constructed device.
pub enum PwrDevice {
    Ina219(Ina219),
    Ina3221(Ina3221),
    Nct3933u(Nct3933u),
    BlockActivity(BaEstimator),
    GpuAdc(GpuAdc),
}

impl PwrDevice {
    /// Validate `descriptor` and derive the device's constants. Touches no
    /// hardware.
    pub fn construct(index: u8, descriptor: DeviceDescriptor) -> Result<Self> {
        Ok(match descriptor {
            DeviceDescriptor::Ina219(d) => PwrDevice::Ina219(Ina219::new(index, d)?),
            DeviceDescriptor::Ina3221(d) => PwrDevice::Ina3221(Ina3221::new(index, d)?),
            DeviceDescriptor::Nct3933u(d) => PwrDevice::Nct3933u(Nct3933u::new(index, d)?),
            DeviceDescriptor::BlockActivity(d) => {
                PwrDevice::BlockActivity(BaEstimator::new(index, d)?)
            }
            DeviceDescriptor::GpuAdc(d) => PwrDevice::GpuAdc(GpuAdc::new(index, d)?),
        })
    }

    pub fn as_device(&self) -> &dyn PowerDevice {
        match self {
            PwrDevice::Ina219(d) => d,
            PwrDevice::Ina3221(d) => d,
            PwrDevice::Nct3933u(d) => d,
            PwrDevice::BlockActivity(d) => d,
            PwrDevice::GpuAdc(d) => d,
        }
    }

    pub fn as_device_mut(&mut self) -> &mut dyn PowerDevice {
        match self {
            PwrDevice::Ina219(d) => d,
            PwrDevice::Ina3221(d) => d,
            PwrDevice::Nct3933u(d) => d,
            PwrDevice::BlockActivity(d) => d,
            PwrDevice::GpuAdc(d) => d,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.as_device().device_type()
    }
}
