//! NCT3933U programmable current-limit controller driver.
//!
//! Each output channel shifts the board's over-current trip point away from a
//! strap-defined default in fixed steps. The output register is
//! sign-magnitude: bit 7 set raises the limit, bits 6:0 hold the step count.
//!
//! Every channel is one provider with a single limit. The limit is the
//! device's only interface; readings are not supported.

use async_trait::async_trait;

use crate::{
    bus::I2cDevice,
    device::{DeviceType, PowerDevice, PwrContext},
    error::{check_index, PwrError, Result},
    tracing::prelude::*,
    types::{LimitUnit, LIMIT_DISABLED},
};

/// Protocol constants for NCT3933U
pub mod protocol {
    /// Default I2C address
    pub const DEFAULT_ADDRESS: u8 = 0x2C;

    /// Maximum number of output channels
    pub const MAX_CHANNELS: u8 = 3;

    /// Largest step magnitude in either direction
    pub const MAX_STEPS: i32 = 127;

    /// NCT3933U register addresses
    pub mod regs {
        /// Output control of channel `ch`
        pub const fn output(ch: u8) -> u8 {
            0x01 + ch
        }

        /// Global control: power-down bits for each channel
        pub const CONTROL: u8 = 0x04;
    }

    /// Output register layout
    pub mod output {
        /// Direction: set to raise the limit above default
        pub const RAISE: u8 = 1 << 7;
        /// Step magnitude
        pub const STEPS_MASK: u8 = 0x7F;
    }

    /// Encode a signed step count as the output register byte.
    pub const fn encode_steps(steps: i32) -> u8 {
        if steps >= 0 {
            output::RAISE | (steps as u8 & output::STEPS_MASK)
        } else {
            (-steps) as u8 & output::STEPS_MASK
        }
    }

    /// Decode the output register byte into a signed step count.
    pub const fn decode_steps(raw: u8) -> i32 {
        let magnitude = (raw & output::STEPS_MASK) as i32;
        if raw & output::RAISE != 0 {
            magnitude
        } else {
            -magnitude
        }
    }
}

use protocol::regs;

/// Board configuration for one NCT3933U.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nct3933uDescriptor {
    pub bus: I2cDevice,
    /// Channels wired on this board, 1..=3
    pub channel_count: u8,
    /// Trip point with zero steps programmed
    pub default_limit_ma: u32,
    /// Trip-point change per step
    pub step_ma: u32,
}

pub struct Nct3933u {
    index: u8,
    desc: Nct3933uDescriptor,
    steps: [i32; protocol::MAX_CHANNELS as usize],
}

impl Nct3933u {
    pub fn new(index: u8, desc: Nct3933uDescriptor) -> Result<Self> {
        if desc.channel_count == 0 || desc.channel_count > protocol::MAX_CHANNELS {
            return Err(PwrError::InvalidArgument(format!(
                "NCT3933U {}: channel count {} not in 1..={}",
                index,
                desc.channel_count,
                protocol::MAX_CHANNELS
            )));
        }
        if desc.step_ma == 0 {
            return Err(PwrError::InvalidArgument(format!(
                "NCT3933U {}: step size must be nonzero",
                index
            )));
        }
        Ok(Self {
            index,
            desc,
            steps: [0; protocol::MAX_CHANNELS as usize],
        })
    }

    /// Signed step count for `limit_ma`, rounded toward negative infinity so
    /// the programmed limit never exceeds the request.
    pub fn steps_for(&self, limit_ma: u32) -> i32 {
        if limit_ma == LIMIT_DISABLED {
            return 0;
        }
        let offset = limit_ma as i64 - self.desc.default_limit_ma as i64;
        let steps = offset.div_euclid(self.desc.step_ma as i64);
        steps.clamp(-protocol::MAX_STEPS as i64, protocol::MAX_STEPS as i64) as i32
    }

    /// Limit in mA produced by `steps`.
    pub fn limit_for(&self, steps: i32) -> u32 {
        let limit = self.desc.default_limit_ma as i64 + steps as i64 * self.desc.step_ma as i64;
        limit.clamp(0, u32::MAX as i64) as u32
    }

    async fn write_steps(&self, ctx: &PwrContext, channel: u8, steps: i32) -> Result<()> {
        let raw = protocol::encode_steps(steps);
        ctx.bus
            .write_reg8(&self.desc.bus, regs::output(channel), raw)
            .await?;
        trace!(
            device = self.index,
            channel,
            steps,
            raw = format!("{:#04x}", raw),
            "NCT3933U output written"
        );
        Ok(())
    }
}

#[async_trait]
impl PowerDevice for Nct3933u {
    fn device_type(&self) -> DeviceType {
        DeviceType::Nct3933u
    }

    fn provider_count(&self) -> u8 {
        self.desc.channel_count
    }

    fn threshold_count(&self) -> u8 {
        1
    }

    async fn load(&mut self, ctx: &PwrContext) -> Result<()> {
        // All channels powered
        ctx.bus.write_reg8(&self.desc.bus, regs::CONTROL, 0).await?;
        for channel in 0..self.desc.channel_count {
            self.write_steps(ctx, channel, self.steps[channel as usize])
                .await?;
        }
        debug!(
            device = self.index,
            address = format!("{:#04x}", self.desc.bus.address),
            channels = self.desc.channel_count,
            "NCT3933U loaded"
        );
        Ok(())
    }

    async fn set_limit(
        &mut self,
        ctx: &PwrContext,
        provider: u8,
        limit_index: u8,
        unit: LimitUnit,
        value: u32,
    ) -> Result<()> {
        check_index("provider", provider, self.desc.channel_count)?;
        check_index("limit", limit_index, 1)?;
        unit.expect_one_of(&[LimitUnit::CurrentMa])?;

        let steps = self.steps_for(value);
        self.write_steps(ctx, provider, steps).await?;
        self.steps[provider as usize] = steps;
        Ok(())
    }

    async fn get_limit(&mut self, ctx: &PwrContext, provider: u8, limit_index: u8) -> Result<u32> {
        check_index("provider", provider, self.desc.channel_count)?;
        check_index("limit", limit_index, 1)?;
        let raw = ctx
            .bus
            .read_reg8(&self.desc.bus, regs::output(provider))
            .await?;
        Ok(self.limit_for(protocol::decode_steps(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    const ADDR: u8 = protocol::DEFAULT_ADDRESS;

    fn descriptor() -> Nct3933uDescriptor {
        Nct3933uDescriptor {
            bus: I2cDevice::little_endian_block(ADDR, 0),
            channel_count: 2,
            default_limit_ma: 50_000,
            step_ma: 250,
        }
    }

    #[test]
    fn steps_round_toward_negative_infinity() {
        let dev = Nct3933u::new(0, descriptor()).unwrap();
        assert_eq!(dev.steps_for(50_000), 0);
        assert_eq!(dev.steps_for(50_249), 0);
        assert_eq!(dev.steps_for(50_250), 1);
        assert_eq!(dev.steps_for(49_999), -1);
        assert_eq!(dev.steps_for(49_750), -1);
        assert_eq!(dev.steps_for(49_749), -2);
        // Clamped to the register range
        assert_eq!(dev.steps_for(0), -127);
        assert_eq!(dev.steps_for(1_000_000), 127);
    }

    #[test]
    fn limit_never_exceeds_request_and_stays_within_one_step() {
        let dev = Nct3933u::new(0, descriptor()).unwrap();
        let lo = dev.limit_for(-127);
        let hi = dev.limit_for(127);
        for target in (lo..=hi).step_by(37) {
            let got = dev.limit_for(dev.steps_for(target));
            assert!(got <= target, "{} > {}", got, target);
            assert!(target - got < 250, "{} vs {}", got, target);
        }
    }

    #[test]
    fn sign_magnitude_encoding() {
        assert_eq!(protocol::encode_steps(5), 0x85);
        assert_eq!(protocol::encode_steps(-5), 0x05);
        assert_eq!(protocol::encode_steps(0), 0x80);
        assert_eq!(protocol::decode_steps(0x85), 5);
        assert_eq!(protocol::decode_steps(0x05), -5);
        assert_eq!(protocol::decode_steps(0x00), 0);
    }

    #[tokio::test]
    async fn set_then_get_through_device() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut dev = Nct3933u::new(0, descriptor()).unwrap();
        dev.load(&ctx).await.unwrap();

        dev.set_limit(&ctx, 1, 0, LimitUnit::CurrentMa, 48_100)
            .await
            .unwrap();
        // -1900 / 250 rounds down to -8
        assert_eq!(board.i2c.register(ADDR, regs::output(1)), vec![0x08]);
        assert_eq!(dev.get_limit(&ctx, 1, 0).await.unwrap(), 48_000);

        // Disabling restores the default
        dev.set_limit(&ctx, 1, 0, LimitUnit::CurrentMa, LIMIT_DISABLED)
            .await
            .unwrap();
        assert_eq!(dev.get_limit(&ctx, 1, 0).await.unwrap(), 50_000);
    }

    #[tokio::test]
    async fn out_of_range_arguments() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut dev = Nct3933u::new(0, descriptor()).unwrap();

        assert!(matches!(
            dev.set_limit(&ctx, 2, 0, LimitUnit::CurrentMa, 1).await,
            Err(PwrError::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.get_limit(&ctx, 0, 1).await,
            Err(PwrError::InvalidArgument(_))
        ));
        assert!(dev.tuple_get(&ctx, 0).await.unwrap_err().is_not_supported());
    }
}
