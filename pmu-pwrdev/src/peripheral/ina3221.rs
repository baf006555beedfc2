//! INA3221 triple-channel shunt and bus voltage monitor driver.
//!
//! The INA3221 has no calibration register; current is derived in firmware
//! from the shunt voltage and a per-channel shunt resistance, then corrected
//! by a per-channel linear model `I_real = M·I_measured + B`.
//!
//! Providers 0..=2 are the physical channels. Provider 3 is the summation
//! pseudo-channel over the channels selected in MASK_ENABLE. It borrows its
//! shunt resistance and correction from the first selected channel and scales
//! `B` by the number of selected channels.
//!
//! Datasheet: <https://www.ti.com/product/INA3221>

use async_trait::async_trait;

use crate::{
    bus::I2cDevice,
    device::{DeviceType, PowerDevice, PwrContext},
    error::{check_index, PwrError, Result},
    tracing::prelude::*,
    types::{
        fxp::{self, round_shift_i128, FxpFormat, SFXP4_12, UFXP4_12, UFXP8_8},
        LimitUnit, Tuple, LIMIT_DISABLED,
    },
};

/// Protocol constants for INA3221
pub mod protocol {
    /// Default I2C address (A0 = GND)
    pub const DEFAULT_ADDRESS: u8 = 0x40;

    /// Number of physical channels
    pub const CHANNEL_COUNT: u8 = 3;

    /// Expected MANUFACTURER_ID contents ("TI")
    pub const EXPECTED_MANUFACTURER_ID: u16 = 0x5449;
    /// Expected DIE_ID contents
    pub const EXPECTED_DIE_ID: u16 = 0x3220;

    /// INA3221 register addresses
    pub mod regs {
        /// Configuration register
        pub const CONFIG: u8 = 0x00;
        /// Sum of the selected channels' shunt voltages, bits 15:1
        pub const SHUNT_SUM: u8 = 0x0D;
        /// Critical-alert limit against SHUNT_SUM
        pub const SHUNT_SUM_LIMIT: u8 = 0x0E;
        /// Summation channel control and alert flags
        pub const MASK_ENABLE: u8 = 0x0F;
        pub const MANUFACTURER_ID: u8 = 0xFE;
        pub const DIE_ID: u8 = 0xFF;

        /// Shunt voltage of channel `ch`, bits 15:3
        pub const fn shunt_voltage(ch: u8) -> u8 {
            0x01 + 2 * ch
        }

        /// Bus voltage of channel `ch`, bits 15:3
        pub const fn bus_voltage(ch: u8) -> u8 {
            0x02 + 2 * ch
        }

        /// Critical-alert shunt limit of channel `ch`
        pub const fn critical_limit(ch: u8) -> u8 {
            0x07 + 2 * ch
        }

        /// Warning-alert shunt limit of channel `ch`
        pub const fn warning_limit(ch: u8) -> u8 {
            0x08 + 2 * ch
        }
    }

    /// CONFIG register bits
    pub mod config {
        /// Self-clearing reset
        pub const RST: u16 = 1 << 15;

        /// Channel enable bit; channel 0 is the most significant
        pub const fn channel_enable(ch: u8) -> u16 {
            1 << (14 - ch as u16)
        }
    }

    /// MASK_ENABLE register bits
    pub mod mask_enable {
        /// Summation channel control bit; channel 0 is the most significant
        pub const fn summation(ch: u8) -> u16 {
            1 << (14 - ch as u16)
        }
    }

    /// Shunt voltage LSB
    pub const SHUNT_LSB_UV: i64 = 40;
    /// Bus voltage LSB
    pub const BUS_LSB_MV: u32 = 8;
    /// Data position in per-channel shunt, bus and limit registers
    pub const CHANNEL_SHIFT: u32 = 3;
    /// Data position in SHUNT_SUM and SHUNT_SUM_LIMIT
    pub const SUM_SHIFT: u32 = 1;

    /// Power-on value of channel limits; far above any real shunt voltage
    pub const CHANNEL_LIMIT_DISABLED: u16 = 0x7FF8;
    /// Power-on value of the summation limit
    pub const SUM_LIMIT_DISABLED: u16 = 0x7FFE;

    /// Get register name from address
    pub fn register_name(addr: u8) -> &'static str {
        match addr {
            regs::CONFIG => "CONFIG",
            0x01 | 0x03 | 0x05 => "SHUNT_VOLTAGE",
            0x02 | 0x04 | 0x06 => "BUS_VOLTAGE",
            0x07 | 0x09 | 0x0B => "CRITICAL_LIMIT",
            0x08 | 0x0A | 0x0C => "WARNING_LIMIT",
            regs::SHUNT_SUM => "SHUNT_SUM",
            regs::SHUNT_SUM_LIMIT => "SHUNT_SUM_LIMIT",
            regs::MASK_ENABLE => "MASK_ENABLE",
            regs::MANUFACTURER_ID => "MANUFACTURER_ID",
            regs::DIE_ID => "DIE_ID",
            _ => "UNKNOWN",
        }
    }
}

use protocol::{regs, CHANNEL_COUNT};

/// Provider index of the summation pseudo-channel.
pub const SUM_PROVIDER: u8 = CHANNEL_COUNT;
/// Limit index of the critical alert.
pub const LIMIT_CRITICAL: u8 = 0;
/// Limit index of the warning alert. Not available on the summation provider.
pub const LIMIT_WARNING: u8 = 1;

const PROVIDER_COUNT: u8 = CHANNEL_COUNT + 1;
const THRESHOLD_COUNT: u8 = 2;

/// Correction gain format
const GAIN: FxpFormat = UFXP4_12;
/// Correction offset format; measured current is carried at the same scale
const OFFSET: FxpFormat = SFXP4_12;

/// Shunt resistance in mΩ, stored as an integer or as UFXP8.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuntResistance {
    Milliohms(u16),
    MilliohmsFxp8_8(u16),
}

impl ShuntResistance {
    fn raw(self) -> u16 {
        match self {
            ShuntResistance::Milliohms(r) | ShuntResistance::MilliohmsFxp8_8(r) => r,
        }
    }

    fn frac_bits(self) -> u32 {
        match self {
            ShuntResistance::Milliohms(_) => 0,
            ShuntResistance::MilliohmsFxp8_8(_) => UFXP8_8.frac_bits,
        }
    }
}

/// Per-channel shunt and current correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ina3221Channel {
    pub shunt: ShuntResistance,
    /// Correction gain, UFXP4.12
    pub correction_m: u16,
    /// Correction offset in A, SFXP4.12
    pub correction_b: i16,
}

impl Ina3221Channel {
    /// Channel with unity gain and no offset.
    pub const fn uncorrected(shunt: ShuntResistance) -> Self {
        Self {
            shunt,
            correction_m: GAIN.one() as u16,
            correction_b: 0,
        }
    }
}

/// Board configuration for one INA3221.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ina3221Descriptor {
    pub bus: I2cDevice,
    /// Value written to CONFIG at load
    pub configuration: u16,
    /// Value written to MASK_ENABLE at load; selects the summed channels
    pub mask_enable: u16,
    pub channels: [Ina3221Channel; CHANNEL_COUNT as usize],
}

pub struct Ina3221 {
    index: u8,
    desc: Ina3221Descriptor,
    /// Cached limit per provider and limit index, as requested
    limits: [[u32; THRESHOLD_COUNT as usize]; PROVIDER_COUNT as usize],
}

/// Measured current from one shunt reading, scaled for correction.
struct Sense<'a> {
    shunt_uv: i64,
    channel: &'a Ina3221Channel,
    /// Number of summed corrections
    count: u32,
}

impl Ina3221 {
    pub fn new(index: u8, desc: Ina3221Descriptor) -> Result<Self> {
        if desc.configuration & protocol::config::RST != 0 {
            return Err(PwrError::InvalidArgument(format!(
                "INA3221 {}: configuration must not set the reset bit",
                index
            )));
        }
        for (ch, channel) in desc.channels.iter().enumerate() {
            let ch = ch as u8;
            let used = desc.configuration & protocol::config::channel_enable(ch) != 0
                || desc.mask_enable & protocol::mask_enable::summation(ch) != 0;
            if used && (channel.shunt.raw() == 0 || channel.correction_m == 0) {
                return Err(PwrError::InvalidArgument(format!(
                    "INA3221 {}: channel {} needs a nonzero shunt and gain",
                    index, ch
                )));
            }
        }
        Ok(Self {
            index,
            desc,
            limits: [[LIMIT_DISABLED; THRESHOLD_COUNT as usize]; PROVIDER_COUNT as usize],
        })
    }

    /// Channels selected for summation, in bit-mask order.
    fn summed_channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..CHANNEL_COUNT)
            .filter(|&ch| self.desc.mask_enable & protocol::mask_enable::summation(ch) != 0)
    }

    /// First summed channel and the number of summed channels.
    fn summation(&self) -> Result<(u8, u32)> {
        let first = self.summed_channels().next().ok_or_else(|| {
            PwrError::InvalidArgument(format!(
                "INA3221 {}: no channels selected for summation",
                self.index
            ))
        })?;
        Ok((first, self.summed_channels().count() as u32))
    }

    /// Physical channel whose bus voltage represents `provider`.
    fn voltage_channel(&self, provider: u8) -> Result<u8> {
        if provider == SUM_PROVIDER {
            Ok(self.summation()?.0)
        } else {
            Ok(provider)
        }
    }

    async fn program(&self, ctx: &PwrContext) -> Result<()> {
        let bus = &self.desc.bus;
        let mfr = ctx.bus.read_reg16(bus, regs::MANUFACTURER_ID).await?;
        let die = ctx.bus.read_reg16(bus, regs::DIE_ID).await?;
        if mfr != protocol::EXPECTED_MANUFACTURER_ID || die != protocol::EXPECTED_DIE_ID {
            return Err(PwrError::invalid_state(format!(
                "INA3221 {}: unexpected id {:#06x}/{:#06x} at {:#04x}",
                self.index, mfr, die, bus.address
            )));
        }

        ctx.bus
            .write_reg16(bus, regs::CONFIG, self.desc.configuration)
            .await?;
        ctx.bus
            .write_reg16(bus, regs::MASK_ENABLE, self.desc.mask_enable)
            .await?;

        for provider in 0..PROVIDER_COUNT {
            for limit_index in 0..THRESHOLD_COUNT {
                let value = self.limits[provider as usize][limit_index as usize];
                if value != LIMIT_DISABLED {
                    self.write_limit(ctx, provider, limit_index, value).await?;
                }
            }
        }

        debug!(
            device = self.index,
            address = format!("{:#04x}", bus.address),
            config = format!("{:#06x}", self.desc.configuration),
            mask_enable = format!("{:#06x}", self.desc.mask_enable),
            "INA3221 loaded"
        );
        Ok(())
    }

    async fn check_tamper(&self, ctx: &PwrContext) -> Result<()> {
        let actual = ctx.bus.read_reg16(&self.desc.bus, regs::CONFIG).await?;
        if actual == self.desc.configuration {
            return Ok(());
        }
        warn!(
            device = self.index,
            expected = format!("{:#06x}", self.desc.configuration),
            actual = format!("{:#06x}", actual),
            "INA3221 configuration changed externally, reloading"
        );
        self.program(ctx).await?;
        Err(PwrError::DeviceTampered {
            register: regs::CONFIG,
            expected: self.desc.configuration as u32,
            actual: actual as u32,
        })
    }

    async fn read_sense(&self, ctx: &PwrContext, provider: u8) -> Result<Sense<'_>> {
        let (register, shift, channel, count) = if provider == SUM_PROVIDER {
            let (first, count) = self.summation()?;
            (regs::SHUNT_SUM, protocol::SUM_SHIFT, first, count)
        } else {
            (regs::shunt_voltage(provider), protocol::CHANNEL_SHIFT, provider, 1)
        };
        let raw = ctx.bus.read_reg16(&self.desc.bus, register).await? as i16;
        let code = (raw >> shift) as i64;
        Ok(Sense {
            shunt_uv: code * protocol::SHUNT_LSB_UV,
            channel: &self.desc.channels[channel as usize],
            count,
        })
    }

    async fn read_current_ma(&self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        let sense = self.read_sense(ctx, provider).await?;
        let measured = measured_current_fx(sense.shunt_uv, sense.channel.shunt);
        Ok(corrected_current_ma(measured, sense.channel, sense.count))
    }

    async fn read_voltage_uv(&self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        let ch = self.voltage_channel(provider)?;
        let raw = ctx.bus.read_reg16(&self.desc.bus, regs::bus_voltage(ch)).await? as i16;
        let code = (raw >> protocol::CHANNEL_SHIFT).max(0) as u32;
        Ok(code * protocol::BUS_LSB_MV * 1000)
    }

    fn check_limit_args(&self, provider: u8, limit_index: u8) -> Result<()> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        check_index("limit", limit_index, THRESHOLD_COUNT)?;
        if provider == SUM_PROVIDER && limit_index == LIMIT_WARNING {
            return Err(PwrError::NotSupported("summation warning limit"));
        }
        Ok(())
    }

    /// Register and encoded contents for a limit of `value_ma`.
    fn limit_register(&self, provider: u8, limit_index: u8, value_ma: u32) -> Result<(u8, u16)> {
        let (register, shift, disabled, channel, count) = if provider == SUM_PROVIDER {
            let (first, count) = self.summation()?;
            (
                regs::SHUNT_SUM_LIMIT,
                protocol::SUM_SHIFT,
                protocol::SUM_LIMIT_DISABLED,
                first,
                count,
            )
        } else {
            let register = if limit_index == LIMIT_CRITICAL {
                regs::critical_limit(provider)
            } else {
                regs::warning_limit(provider)
            };
            (
                register,
                protocol::CHANNEL_SHIFT,
                protocol::CHANNEL_LIMIT_DISABLED,
                provider,
                1,
            )
        };

        if value_ma == LIMIT_DISABLED {
            return Ok((register, disabled));
        }

        let channel = &self.desc.channels[channel as usize];
        let max_code = (disabled >> shift) as i64;
        let code = shunt_code_for_current(value_ma, channel, count).clamp(0, max_code);
        Ok((register, (code as u16) << shift))
    }

    async fn write_limit(
        &self,
        ctx: &PwrContext,
        provider: u8,
        limit_index: u8,
        value_ma: u32,
    ) -> Result<()> {
        let (register, encoded) = self.limit_register(provider, limit_index, value_ma)?;
        ctx.bus.write_reg16(&self.desc.bus, register, encoded).await?;
        trace!(
            device = self.index,
            register = protocol::register_name(register),
            value_ma,
            encoded = format!("{:#06x}", encoded),
            "INA3221 limit written"
        );
        Ok(())
    }
}

/// Current through the shunt in mA, at the correction offset's scale.
fn measured_current_fx(shunt_uv: i64, shunt: ShuntResistance) -> i64 {
    let scaled = (shunt_uv as i128) << (OFFSET.frac_bits + shunt.frac_bits());
    let fx = fxp::div_round_i128(scaled, shunt.raw() as i128);
    fx.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Correction offset in mA at its own scale, for `count` summed channels.
fn offset_fx(channel: &Ina3221Channel, count: u32) -> i128 {
    channel.correction_b as i128 * 1000 * count as i128
}

/// Apply `M·I + B·count`, returning whole mA clamped to the u32 range.
fn corrected_current_ma(measured_fx: i64, channel: &Ina3221Channel, count: u32) -> u32 {
    let gained = measured_fx as i128 * channel.correction_m as i128;
    let gained = round_shift_i128(gained, GAIN.frac_bits);
    let ma = round_shift_i128(gained + offset_fx(channel, count), OFFSET.frac_bits);
    ma.clamp(0, u32::MAX as i128) as u32
}

/// Inverse of the correction: shunt voltage code that reads as `current_ma`.
/// Rounds down at every step so the alert never fires above the requested
/// current.
fn shunt_code_for_current(current_ma: u32, channel: &Ina3221Channel, count: u32) -> i64 {
    let target = (current_ma as i128) << OFFSET.frac_bits;
    let corrected = (target - offset_fx(channel, count)) << GAIN.frac_bits;
    let measured = corrected.div_euclid(channel.correction_m as i128);
    let shift = OFFSET.frac_bits + channel.shunt.frac_bits();
    let shunt_uv = (measured * channel.shunt.raw() as i128) >> shift;
    let code = shunt_uv.div_euclid(protocol::SHUNT_LSB_UV as i128);
    code.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[async_trait]
impl PowerDevice for Ina3221 {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ina3221
    }

    fn provider_count(&self) -> u8 {
        PROVIDER_COUNT
    }

    fn threshold_count(&self) -> u8 {
        THRESHOLD_COUNT
    }

    async fn load(&mut self, ctx: &PwrContext) -> Result<()> {
        self.program(ctx).await
    }

    async fn get_voltage(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        self.read_voltage_uv(ctx, provider).await
    }

    async fn get_current(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        self.read_current_ma(ctx, provider).await
    }

    async fn get_power(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        Ok(self.tuple_get(ctx, provider).await?.power_mw)
    }

    async fn set_limit(
        &mut self,
        ctx: &PwrContext,
        provider: u8,
        limit_index: u8,
        unit: LimitUnit,
        value: u32,
    ) -> Result<()> {
        self.check_limit_args(provider, limit_index)?;
        unit.expect_one_of(&[LimitUnit::CurrentMa])?;
        self.write_limit(ctx, provider, limit_index, value).await?;
        self.limits[provider as usize][limit_index as usize] = value;
        Ok(())
    }

    async fn get_limit(&mut self, _ctx: &PwrContext, provider: u8, limit_index: u8) -> Result<u32> {
        self.check_limit_args(provider, limit_index)?;
        Ok(self.limits[provider as usize][limit_index as usize])
    }

    async fn tuple_get(&mut self, ctx: &PwrContext, provider: u8) -> Result<Tuple> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        self.check_tamper(ctx).await?;
        let voltage_uv = self.read_voltage_uv(ctx, provider).await?;
        let current_ma = self.read_current_ma(ctx, provider).await?;
        let voltage_mv = fxp::saturate_u32(fxp::div_round_u64(voltage_uv as u64, 1000));
        let power_mw = fxp::power_mw(voltage_mv, current_ma);
        trace!(
            device = self.index,
            provider,
            voltage_uv,
            current_ma,
            power_mw,
            "INA3221 tuple"
        );
        Ok(Tuple {
            voltage_uv,
            current_ma,
            power_mw,
            energy_mj: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    const ADDR: u8 = protocol::DEFAULT_ADDRESS;
    const ALL_CHANNELS: u16 = 0x7127;

    fn descriptor(shunt: ShuntResistance) -> Ina3221Descriptor {
        Ina3221Descriptor {
            bus: I2cDevice::big_endian(ADDR, 0),
            configuration: ALL_CHANNELS,
            mask_enable: protocol::mask_enable::summation(0) | protocol::mask_enable::summation(1),
            channels: [Ina3221Channel::uncorrected(shunt); 3],
        }
    }

    fn board() -> SimBoard {
        let board = SimBoard::new();
        board
            .i2c
            .set_reg16_be(ADDR, regs::MANUFACTURER_ID, protocol::EXPECTED_MANUFACTURER_ID);
        board
            .i2c
            .set_reg16_be(ADDR, regs::DIE_ID, protocol::EXPECTED_DIE_ID);
        board
    }

    #[tokio::test]
    async fn summation_uses_first_channel_and_scales_offset() {
        let board = board();
        let ctx = board.context();
        let mut desc = descriptor(ShuntResistance::Milliohms(1000));
        let mut dev = Ina3221::new(0, desc.clone()).unwrap();
        dev.load(&ctx).await.unwrap();

        // Raw sum 100 codes over 1 Ω: 100 * 40 µV / 1000 mΩ = 4 mA
        board.i2c.set_reg16_be(ADDR, regs::SHUNT_SUM, 100 << protocol::SUM_SHIFT);
        assert_eq!(dev.get_current(&ctx, SUM_PROVIDER).await.unwrap(), 4);

        // B = 0.5 A on the first summed channel, applied once per channel
        desc.channels[0].correction_b = 2048;
        let mut dev = Ina3221::new(0, desc).unwrap();
        assert_eq!(dev.get_current(&ctx, SUM_PROVIDER).await.unwrap(), 4 + 2 * 500);
    }

    #[tokio::test]
    async fn summation_matches_channel_total() {
        let board = board();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();
        dev.load(&ctx).await.unwrap();

        for (ch, code) in [(0u8, 250u16), (1, 130)] {
            board
                .i2c
                .set_reg16_be(ADDR, regs::shunt_voltage(ch), code << protocol::CHANNEL_SHIFT);
        }
        board
            .i2c
            .set_reg16_be(ADDR, regs::SHUNT_SUM, (250 + 130) << protocol::SUM_SHIFT);

        let ch0 = dev.get_current(&ctx, 0).await.unwrap();
        let ch1 = dev.get_current(&ctx, 1).await.unwrap();
        let sum = dev.get_current(&ctx, SUM_PROVIDER).await.unwrap();
        assert_eq!((ch0, ch1), (1000, 520));
        assert!(sum.abs_diff(ch0 + ch1) <= 1);
    }

    #[tokio::test]
    async fn fixed_point_shunt_resistance() {
        let board = board();
        let ctx = board.context();
        // 2.0 mΩ as UFXP8.8
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::MilliohmsFxp8_8(512))).unwrap();

        board
            .i2c
            .set_reg16_be(ADDR, regs::shunt_voltage(1), 100 << protocol::CHANNEL_SHIFT);
        // 4000 µV / 2 mΩ
        assert_eq!(dev.get_current(&ctx, 1).await.unwrap(), 2000);
    }

    #[test]
    fn correction_clamps_instead_of_wrapping() {
        let channel = Ina3221Channel {
            shunt: ShuntResistance::Milliohms(1),
            correction_m: u16::MAX,
            correction_b: i16::MIN,
        };
        // Large negative offset clamps at zero
        assert_eq!(corrected_current_ma(0, &channel, 3), 0);
        // Huge measured current clamps at the top
        assert_eq!(corrected_current_ma(i64::MAX, &channel, 0), u32::MAX);
    }

    #[test]
    fn limit_code_never_reads_above_request() {
        let channel = Ina3221Channel {
            shunt: ShuntResistance::Milliohms(10),
            correction_m: (3 << 12) + 1000,
            correction_b: -205,
        };
        let read_back = |code: i64| {
            let measured = measured_current_fx(code * protocol::SHUNT_LSB_UV, channel.shunt);
            corrected_current_ma(measured, &channel, 1)
        };
        for request in (100..5000u32).step_by(7) {
            let code = shunt_code_for_current(request, &channel, 1);
            assert!(read_back(code) <= request, "{} mA -> code {}", request, code);
            assert!(read_back(code + 1) >= request, "{} mA -> code {}", request, code);
        }
    }

    #[tokio::test]
    async fn tuple_power_from_voltage_and_current() {
        let board = board();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();
        dev.load(&ctx).await.unwrap();

        // 12 V, 250 codes * 40 µV / 10 mΩ = 1000 mA
        board
            .i2c
            .set_reg16_be(ADDR, regs::bus_voltage(0), 1500 << protocol::CHANNEL_SHIFT);
        board
            .i2c
            .set_reg16_be(ADDR, regs::shunt_voltage(0), 250 << protocol::CHANNEL_SHIFT);

        let t = dev.tuple_get(&ctx, 0).await.unwrap();
        assert_eq!(t.voltage_uv, 12_000_000);
        assert_eq!(t.current_ma, 1000);
        assert_eq!(t.power_mw, 12_000);

        // Summation voltage comes from the first summed channel
        assert_eq!(dev.get_voltage(&ctx, SUM_PROVIDER).await.unwrap(), 12_000_000);
    }

    #[tokio::test]
    async fn tamper_check_covers_config_only() {
        let board = board();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();
        dev.load(&ctx).await.unwrap();

        // MASK_ENABLE changes are not tamper
        board.i2c.set_reg16_be(ADDR, regs::MASK_ENABLE, 0x0002);
        assert!(dev.tuple_get(&ctx, 0).await.is_ok());

        board.i2c.set_reg16_be(ADDR, regs::CONFIG, 0x0007);
        let err = dev.tuple_get(&ctx, 0).await.unwrap_err();
        assert!(matches!(err, PwrError::DeviceTampered { register: 0x00, .. }));
        assert_eq!(board.i2c.register(ADDR, regs::CONFIG), vec![0x71, 0x27]);
        assert!(dev.tuple_get(&ctx, 0).await.is_ok());
    }

    #[tokio::test]
    async fn limits_encode_shunt_voltage() {
        let board = board();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();
        dev.load(&ctx).await.unwrap();

        // 1000 mA through 10 mΩ = 10 mV = 250 codes
        dev.set_limit(&ctx, 0, LIMIT_CRITICAL, LimitUnit::CurrentMa, 1000)
            .await
            .unwrap();
        assert_eq!(
            board.i2c.register(ADDR, regs::critical_limit(0)),
            (250u16 << 3).to_be_bytes().to_vec()
        );
        assert_eq!(dev.get_limit(&ctx, 0, LIMIT_CRITICAL).await.unwrap(), 1000);
        assert_eq!(dev.get_limit(&ctx, 0, LIMIT_WARNING).await.unwrap(), LIMIT_DISABLED);

        dev.set_limit(&ctx, 0, LIMIT_CRITICAL, LimitUnit::CurrentMa, LIMIT_DISABLED)
            .await
            .unwrap();
        assert_eq!(
            board.i2c.register(ADDR, regs::critical_limit(0)),
            protocol::CHANNEL_LIMIT_DISABLED.to_be_bytes().to_vec()
        );
    }

    #[tokio::test]
    async fn limit_argument_checks() {
        let board = board();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();

        assert!(dev
            .set_limit(&ctx, SUM_PROVIDER, LIMIT_WARNING, LimitUnit::CurrentMa, 100)
            .await
            .unwrap_err()
            .is_not_supported());
        assert!(matches!(
            dev.set_limit(&ctx, 0, 2, LimitUnit::CurrentMa, 100).await,
            Err(PwrError::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.set_limit(&ctx, 0, LIMIT_CRITICAL, LimitUnit::PowerMw, 100).await,
            Err(PwrError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn wrong_chip_fails_load() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut dev = Ina3221::new(0, descriptor(ShuntResistance::Milliohms(10))).unwrap();
        assert!(matches!(dev.load(&ctx).await, Err(PwrError::InvalidState(_))));
    }
}
