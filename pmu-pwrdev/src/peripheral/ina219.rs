//! INA219 current/power monitor driver.
//!
//! The INA219 measures shunt and bus voltage and computes current and power in
//! hardware from a programmed calibration value. One provider per device and
//! no alert thresholds.
//!
//! Datasheet: <https://www.ti.com/product/INA219>

use async_trait::async_trait;

use crate::{
    bus::I2cDevice,
    device::{DeviceType, PowerDevice, PwrContext},
    error::{check_index, PwrError, Result},
    tracing::prelude::*,
    types::{
        fxp::{self, UFXP20_12},
        Tuple,
    },
};

/// Protocol constants for INA219
pub mod protocol {
    /// Default I2C address (A0 = A1 = GND)
    pub const DEFAULT_ADDRESS: u8 = 0x40;

    /// INA219 register addresses
    pub mod regs {
        /// Configuration register
        pub const CONFIG: u8 = 0x00;
        /// Shunt voltage, 10 µV per LSB
        pub const SHUNT_VOLTAGE: u8 = 0x01;
        /// Bus voltage, 4 mV per LSB in bits 15:3
        pub const BUS_VOLTAGE: u8 = 0x02;
        /// Power, 20 current LSBs per LSB
        pub const POWER: u8 = 0x03;
        /// Current, signed
        pub const CURRENT: u8 = 0x04;
        /// Calibration register
        pub const CALIBRATION: u8 = 0x05;
    }

    /// CONFIG register bits
    pub mod config {
        /// Self-clearing reset
        pub const RST: u16 = 1 << 15;
    }

    /// BUS_VOLTAGE register layout
    pub mod bus_voltage {
        pub const SHIFT: u32 = 3;
        pub const LSB_MV: u32 = 4;
        /// Math overflow: current and power are out of range
        pub const OVF: u16 = 1 << 0;
        /// Conversion ready
        pub const CNVR: u16 = 1 << 1;
    }

    /// Current LSB in mA is this over (calibration × shunt mΩ).
    pub const CURRENT_LSB_NUMERATOR: i64 = 40_960;

    /// Power LSB as a multiple of the current LSB.
    pub const POWER_LSB_RATIO: u32 = 20;

    /// Get register name from address
    pub fn register_name(addr: u8) -> &'static str {
        match addr {
            regs::CONFIG => "CONFIG",
            regs::SHUNT_VOLTAGE => "SHUNT_VOLTAGE",
            regs::BUS_VOLTAGE => "BUS_VOLTAGE",
            regs::POWER => "POWER",
            regs::CURRENT => "CURRENT",
            regs::CALIBRATION => "CALIBRATION",
            _ => "UNKNOWN",
        }
    }
}

use protocol::regs;

/// Board configuration for one INA219.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ina219Descriptor {
    pub bus: I2cDevice,
    /// Value written to CONFIG at load
    pub configuration: u16,
    /// Value written to CALIBRATION at load
    pub calibration: u16,
    /// Shunt resistance in mΩ
    pub shunt_mohm: u32,
}

pub struct Ina219 {
    index: u8,
    desc: Ina219Descriptor,
    /// mA per CURRENT LSB, UFXP20.12
    current_coef: u32,
    /// mW per POWER LSB, UFXP20.12
    power_coef: u32,
}

impl Ina219 {
    pub fn new(index: u8, desc: Ina219Descriptor) -> Result<Self> {
        if desc.calibration == 0 || desc.shunt_mohm == 0 {
            return Err(PwrError::InvalidArgument(format!(
                "INA219 {}: calibration ({}) and shunt ({} mΩ) must be nonzero",
                index, desc.calibration, desc.shunt_mohm
            )));
        }
        if desc.configuration & protocol::config::RST != 0 {
            return Err(PwrError::InvalidArgument(format!(
                "INA219 {}: configuration must not set the reset bit",
                index
            )));
        }

        let den = desc.calibration as i64 * desc.shunt_mohm as i64;
        let current_coef = UFXP20_12.from_ratio(protocol::CURRENT_LSB_NUMERATOR, den)? as u32;
        let power_coef = fxp::saturate_u32(current_coef as u64 * protocol::POWER_LSB_RATIO as u64);
        if current_coef == 0 {
            return Err(PwrError::InvalidArgument(format!(
                "INA219 {}: current LSB rounds to zero",
                index
            )));
        }

        Ok(Self {
            index,
            desc,
            current_coef,
            power_coef,
        })
    }

    /// mA per CURRENT LSB, UFXP20.12.
    pub fn current_coefficient(&self) -> u32 {
        self.current_coef
    }

    /// mW per POWER LSB, UFXP20.12.
    pub fn power_coefficient(&self) -> u32 {
        self.power_coef
    }

    async fn program(&self, ctx: &PwrContext) -> Result<()> {
        let bus = &self.desc.bus;
        ctx.bus
            .write_reg16(bus, regs::CONFIG, self.desc.configuration)
            .await?;
        ctx.bus
            .write_reg16(bus, regs::CALIBRATION, self.desc.calibration)
            .await?;
        debug!(
            device = self.index,
            address = format!("{:#04x}", bus.address),
            config = format!("{:#06x}", self.desc.configuration),
            calibration = self.desc.calibration,
            "INA219 loaded"
        );
        Ok(())
    }

    /// Re-read CONFIG and CALIBRATION. On mismatch, reprogram and report the
    /// first register that differed.
    async fn check_tamper(&self, ctx: &PwrContext) -> Result<()> {
        let expected = [
            (regs::CONFIG, self.desc.configuration),
            (regs::CALIBRATION, self.desc.calibration),
        ];
        for (register, value) in expected {
            let actual = ctx.bus.read_reg16(&self.desc.bus, register).await?;
            if actual != value {
                warn!(
                    device = self.index,
                    register = protocol::register_name(register),
                    expected = format!("{:#06x}", value),
                    actual = format!("{:#06x}", actual),
                    "INA219 registers changed externally, reloading"
                );
                self.program(ctx).await?;
                return Err(PwrError::DeviceTampered {
                    register,
                    expected: value as u32,
                    actual: actual as u32,
                });
            }
        }
        Ok(())
    }

    async fn read_voltage_uv(&self, ctx: &PwrContext) -> Result<u32> {
        use protocol::bus_voltage;

        let raw = ctx.bus.read_reg16(&self.desc.bus, regs::BUS_VOLTAGE).await?;
        if raw & bus_voltage::OVF != 0 {
            return Err(PwrError::Overflow(format!(
                "INA219 {}: math overflow flag set",
                self.index
            )));
        }
        let mv = ((raw >> bus_voltage::SHIFT) as u32) * bus_voltage::LSB_MV;
        Ok(mv * 1000)
    }

    async fn read_current_ma(&self, ctx: &PwrContext) -> Result<u32> {
        let raw = ctx.bus.read_reg16(&self.desc.bus, regs::CURRENT).await? as i16;
        let scaled = fxp::round_shift_i128(raw as i128 * self.current_coef as i128, 12);
        Ok(fxp::saturate_i64_to_u32(scaled as i64))
    }

    async fn read_power_mw(&self, ctx: &PwrContext) -> Result<u32> {
        self.check_tamper(ctx).await?;
        let raw = ctx.bus.read_reg16(&self.desc.bus, regs::POWER).await?;
        Ok(fxp::mul_shift_u32(raw as u32, self.power_coef, 12))
    }
}

#[async_trait]
impl PowerDevice for Ina219 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ina219
    }

    fn provider_count(&self) -> u8 {
        1
    }

    async fn load(&mut self, ctx: &PwrContext) -> Result<()> {
        self.program(ctx).await
    }

    async fn get_voltage(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        check_index("provider", provider, 1)?;
        self.read_voltage_uv(ctx).await
    }

    async fn get_current(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        check_index("provider", provider, 1)?;
        self.read_current_ma(ctx).await
    }

    async fn get_power(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        check_index("provider", provider, 1)?;
        self.read_power_mw(ctx).await
    }

    async fn tuple_get(&mut self, ctx: &PwrContext, provider: u8) -> Result<Tuple> {
        check_index("provider", provider, 1)?;
        let power_mw = self.read_power_mw(ctx).await?;
        let voltage_uv = self.read_voltage_uv(ctx).await?;
        let current_ma = self.read_current_ma(ctx).await?;
        trace!(device = self.index, voltage_uv, current_ma, power_mw, "INA219 tuple");
        Ok(Tuple {
            voltage_uv,
            current_ma,
            power_mw,
            energy_mj: 0,
        })
    }
}
