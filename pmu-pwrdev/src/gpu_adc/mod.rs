//! On-die ADC power monitor.
//!
//! The ADC samples bus-voltage and shunt-voltage channels, filters each
//! through an IIR stage and feeds channel pairs into hardware multipliers
//! for instantaneous power. Every channel and multiplier also drives a
//! free-running 48-bit code accumulator used for energy.
//!
//! One computation layer serves all hardware generations. A provider names
//! its bus, shunt and multiplier channels; missing measurements read as
//! zero. Conversion factors are derived once at construction: voltage and
//! current per code in UFXP28.4, power per product code as an integer nW.

use async_trait::async_trait;

use crate::{
    device::{DeviceType, PowerDevice, PwrContext},
    error::{check_index, PwrError, Result},
    tracing::prelude::*,
    types::{
        fxp::{self, UFXP28_4},
        AccumulatedTuple, Accumulator, Limit, LimitUnit, Tuple, LIMIT_DISABLED,
    },
};

pub mod generation;
pub mod regs;

pub use generation::AdcGeneration;

/// Channel assignment and shunt of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcProvider {
    /// Bus-voltage channel
    pub bus: Option<u8>,
    /// Shunt-voltage channel
    pub shunt: Option<u8>,
    /// Multiplier fed by the bus and shunt channels
    pub multiplier: Option<u8>,
    pub shunt_mohm: u32,
    /// Bus-channel full scale replacing the instance default (V11 and later)
    pub bus_full_scale_uv: Option<u32>,
}

/// Offset/gain trim of one channel (V13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcChannelCal {
    pub channel: u8,
    /// Offset in codes
    pub offset: i16,
    /// Gain in UFXP4.12
    pub gain: u16,
}

/// Board configuration for one ADC instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuAdcDescriptor {
    pub generation: AdcGeneration,
    /// Register block base address
    pub base: u32,
    /// Samples summed into each IIR and multiplier reading
    pub oversample: u8,
    /// Code at full scale
    pub code_max: u32,
    /// Default bus-channel full scale
    pub bus_full_scale_uv: u32,
    /// Shunt-channel full scale
    pub shunt_full_scale_uv: u32,
    /// Accumulator sample period
    pub sample_period_us: u32,
    pub providers: Vec<AdcProvider>,
    pub calibration: Vec<AdcChannelCal>,
}

/// Measurements at maximum code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FullScale {
    pub voltage_uv: u32,
    pub current_ma: u32,
    pub power_mw: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Factors {
    /// µV per code, UFXP28.4
    voltage: u64,
    /// mA per code, UFXP28.4
    current: u64,
    /// nW per product code
    power_nw: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ProviderAccumulators {
    voltage: Accumulator,
    charge: Accumulator,
    energy: Accumulator,
}

pub struct GpuAdc {
    index: u8,
    desc: GpuAdcDescriptor,
    factors: Vec<Factors>,
    accumulators: Vec<ProviderAccumulators>,
    seq_id: u32,
    limits: [Option<Limit>; regs::THRESHOLD_COUNT as usize],
}

/// Code times a UFXP28.4 factor, as a whole clamped value.
fn scale(code: u64, factor: u64) -> u32 {
    fxp::saturate_u32(fxp::mul_shift_u64(code, factor, UFXP28_4.frac_bits))
}

impl GpuAdc {
    pub fn new(index: u8, desc: GpuAdcDescriptor) -> Result<Self> {
        let gen = desc.generation;
        let invalid = |msg: String| PwrError::InvalidArgument(format!("ADC {}: {}", index, msg));

        if desc.oversample == 0 {
            return Err(invalid("oversample count is zero".into()));
        }
        if desc.code_max == 0 {
            return Err(invalid("full-scale code is zero".into()));
        }
        if desc.sample_period_us == 0 {
            return Err(invalid("sample period is zero".into()));
        }
        if desc.providers.is_empty() || desc.providers.len() > u8::MAX as usize {
            return Err(invalid(format!("{} providers", desc.providers.len())));
        }

        for (i, p) in desc.providers.iter().enumerate() {
            for ch in [p.bus, p.shunt].into_iter().flatten() {
                if ch >= gen.channel_count() {
                    return Err(invalid(format!(
                        "provider {} channel {} beyond {:?} range of {}",
                        i,
                        ch,
                        gen,
                        gen.channel_count()
                    )));
                }
            }
            if let Some(m) = p.multiplier {
                if m >= gen.multiplier_count() {
                    return Err(invalid(format!("provider {} multiplier {} out of range", i, m)));
                }
            }
            if p.shunt.is_some() && p.shunt_mohm == 0 {
                return Err(invalid(format!("provider {} shunt resistance is zero", i)));
            }
            if p.bus_full_scale_uv.is_some() && !gen.supports_full_scale_override() {
                return Err(invalid(format!(
                    "provider {} full-scale override needs V11 or later",
                    i
                )));
            }
        }

        if !desc.calibration.is_empty() && !gen.has_calibration() {
            return Err(invalid(format!("{:?} has no calibration registers", gen)));
        }
        for cal in &desc.calibration {
            if cal.channel >= gen.channel_count() {
                return Err(invalid(format!("calibration channel {} out of range", cal.channel)));
            }
            if cal.gain == 0 {
                return Err(invalid(format!("calibration gain of channel {} is zero", cal.channel)));
            }
        }

        let factors = desc
            .providers
            .iter()
            .map(|p| Self::factors(&desc, p))
            .collect::<Result<Vec<_>>>()?;
        let accumulators = vec![ProviderAccumulators::default(); desc.providers.len()];

        Ok(Self {
            index,
            desc,
            factors,
            accumulators,
            seq_id: 0,
            limits: [None; regs::THRESHOLD_COUNT as usize],
        })
    }

    fn factors(desc: &GpuAdcDescriptor, p: &AdcProvider) -> Result<Factors> {
        let code_max = desc.code_max as i64;
        let bus_fs = p.bus_full_scale_uv.unwrap_or(desc.bus_full_scale_uv) as i64;
        let voltage = UFXP28_4.from_ratio(bus_fs, code_max)? as u64;
        let current = match p.shunt {
            Some(_) => UFXP28_4.from_ratio(
                desc.shunt_full_scale_uv as i64,
                p.shunt_mohm as i64 * code_max,
            )? as u64,
            None => 0,
        };
        // µV × mA = nW, with 4 + 4 fraction bits
        let power_nw = fxp::mul_shift_u64(voltage, current, 8);
        Ok(Factors {
            voltage,
            current,
            power_nw,
        })
    }

    pub fn generation(&self) -> AdcGeneration {
        self.desc.generation
    }

    /// Current reset-sequence id.
    pub fn sequence_id(&self) -> u32 {
        self.seq_id
    }

    fn reg(&self, offset: u32) -> u32 {
        self.desc.base + offset
    }

    fn ctrl_word(&self) -> u32 {
        let word = regs::ctrl::ENABLE.set_flag(0, true);
        // Oversample count is range checked by the u8 field width
        regs::ctrl::OVERSAMPLE
            .set(word, self.desc.oversample as u32)
            .unwrap_or(word)
    }

    fn provider(&self, provider: u8) -> Result<&AdcProvider> {
        check_index("provider", provider, self.provider_count())?;
        Ok(&self.desc.providers[provider as usize])
    }

    /// Software-reset the pipeline. Invalidates every accumulated snapshot.
    pub fn reset(&mut self, ctx: &PwrContext) {
        let ctrl = self.ctrl_word();
        ctx.regs
            .write(self.reg(regs::CTRL), regs::ctrl::SW_RESET.set_flag(ctrl, true));
        ctx.regs.write(self.reg(regs::CTRL), ctrl);
        for acc in &mut self.accumulators {
            acc.voltage.reset();
            acc.charge.reset();
            acc.energy.reset();
        }
        self.seq_id = self.seq_id.wrapping_add(1);
        debug!(device = self.index, seq_id = self.seq_id, "ADC reset");
    }

    /// Voltage, current and power at maximum code. Products that overflow
    /// clamp before conversion to mW.
    pub fn full_scale(&self, provider: u8) -> Result<FullScale> {
        check_index("provider", provider, self.provider_count())?;
        let f = &self.factors[provider as usize];
        let code_max = self.desc.code_max as u64;

        let product_nw = code_max
            .checked_mul(code_max)
            .and_then(|codes| codes.checked_mul(f.power_nw))
            .unwrap_or(u64::MAX);

        Ok(FullScale {
            voltage_uv: scale(code_max, f.voltage),
            current_ma: scale(code_max, f.current),
            power_mw: fxp::saturate_u32(fxp::div_round_u64(product_nw, 1_000_000)),
        })
    }

    fn averaged(&self, ctx: &PwrContext, offset: u32) -> u64 {
        let raw = ctx.regs.read(self.reg(offset));
        fxp::div_round_u64(raw as u64, self.desc.oversample as u64)
    }

    fn read_counter(&self, ctx: &PwrContext, lo: u32, hi: u32) -> u64 {
        // Low half first; the read latches the high half
        let low = ctx.regs.read(self.reg(lo)) as u64;
        let high = (ctx.regs.read(self.reg(hi)) & regs::ACC_HI_MASK) as u64;
        (high << 32) | low
    }

    fn accumulate(&mut self, ctx: &PwrContext, provider: u8) -> AccumulatedTuple {
        let p = self.desc.providers[provider as usize];
        let f = self.factors[provider as usize];
        let period = self.desc.sample_period_us as u64;

        let bus = p
            .bus
            .map(|ch| self.read_counter(ctx, regs::acc_lo(ch), regs::acc_hi(ch)));
        let shunt = p
            .shunt
            .map(|ch| self.read_counter(ctx, regs::acc_lo(ch), regs::acc_hi(ch)));
        let mult = p
            .multiplier
            .map(|m| self.read_counter(ctx, regs::mult_acc_lo(m), regs::mult_acc_hi(m)));

        let acc = &mut self.accumulators[provider as usize];
        if let Some(raw) = bus {
            acc.voltage.fold(raw, regs::ACC_BITS, |d| {
                fxp::mul_shift_u64(d, f.voltage.saturating_mul(period), UFXP28_4.frac_bits)
            });
        }
        if let Some(raw) = shunt {
            acc.charge.fold(raw, regs::ACC_BITS, |d| {
                fxp::mul_shift_u64(d, f.current.saturating_mul(period), UFXP28_4.frac_bits)
            });
        }
        if let Some(raw) = mult {
            // nW × µs = fJ
            acc.energy.fold(raw, regs::ACC_BITS, |d| {
                fxp::div_round_u64(
                    fxp::mul_shift_u64(d, f.power_nw.saturating_mul(period), 0),
                    1_000_000,
                )
            });
        }

        AccumulatedTuple {
            seq_id: self.seq_id,
            voltage_uv_us: acc.voltage.value(),
            charge_nc: acc.charge.value(),
            energy_nj: acc.energy.value(),
        }
    }

    /// Threshold register word for `value` in `unit` on `provider`.
    fn threshold_word(&self, provider: u8, unit: LimitUnit, value: u32) -> Result<u32> {
        use regs::threshold;

        let p = self.desc.providers[provider as usize];
        let f = self.factors[provider as usize];
        let os = self.desc.oversample as u64;
        let unmapped = |what: &str| {
            PwrError::InvalidArgument(format!(
                "ADC {}: provider {} has no {} channel",
                self.index, provider, what
            ))
        };

        let (kind, source, code) = match unit {
            LimitUnit::VoltageUv => {
                let ch = p.bus.ok_or_else(|| unmapped("bus"))?;
                let code = fxp::div_round_u64((value as u64) << 4, f.voltage);
                (threshold::KIND_VOLTAGE, ch, code)
            }
            LimitUnit::CurrentMa => {
                let ch = p.shunt.ok_or_else(|| unmapped("shunt"))?;
                let code = fxp::div_round_u64((value as u64) << 4, f.current);
                (threshold::KIND_CURRENT, ch, code)
            }
            LimitUnit::PowerMw => {
                let m = p.multiplier.ok_or_else(|| unmapped("multiplier"))?;
                let code = fxp::div_round_u64((value as u64).saturating_mul(1_000_000), f.power_nw);
                (threshold::KIND_POWER, m, code)
            }
        };

        // Hardware compares against the oversampled sum
        let code = fxp::checked_u32(code.saturating_mul(os), "ADC threshold code")?;
        let word = threshold::VALUE.set(0, code)?;
        let word = threshold::SOURCE.set(word, source as u32)?;
        let word = threshold::KIND.set(word, kind)?;
        Ok(threshold::ENABLE.set_flag(word, true))
    }
}

#[async_trait]
impl PowerDevice for GpuAdc {
    fn device_type(&self) -> DeviceType {
        self.desc.generation.device_type()
    }

    fn provider_count(&self) -> u8 {
        self.desc.providers.len() as u8
    }

    fn threshold_count(&self) -> u8 {
        regs::THRESHOLD_COUNT
    }

    async fn load(&mut self, ctx: &PwrContext) -> Result<()> {
        for cal in &self.desc.calibration {
            let offset = regs::CAL_OFFSET.set(0, cal.offset as u16 as u32)?;
            let gain = regs::CAL_GAIN.set(0, cal.gain as u32)?;
            ctx.regs.write(self.reg(regs::cal_offset(cal.channel)), offset);
            ctx.regs.write(self.reg(regs::cal_gain(cal.channel)), gain);
        }
        for t in 0..regs::THRESHOLD_COUNT {
            ctx.regs.write(self.reg(regs::threshold(t)), 0);
        }
        self.limits = [None; regs::THRESHOLD_COUNT as usize];
        self.reset(ctx);

        debug!(
            device = self.index,
            generation = ?self.desc.generation,
            base = format!("{:#010x}", self.desc.base),
            providers = self.desc.providers.len(),
            "ADC loaded"
        );
        Ok(())
    }

    async fn get_voltage(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        Ok(self.tuple_get(ctx, provider).await?.voltage_uv)
    }

    async fn get_current(&mut self, ctx: &PwrContext, provider: u8) -> Result<u32> {
        Ok(self.tuple_get(ctx, provider).await?.current_ma)
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
        self.provider(provider)?;
        check_index("limit", limit_index, regs::THRESHOLD_COUNT)?;

        let word = if value == LIMIT_DISABLED {
            0
        } else {
            self.threshold_word(provider, unit, value)?
        };
        ctx.regs.write(self.reg(regs::threshold(limit_index)), word);
        let limit = Limit {
            provider,
            limit_index,
            unit,
            value,
        };
        self.limits[limit_index as usize] = (!limit.is_disabled()).then_some(limit);
        trace!(
            device = self.index,
            provider,
            limit_index,
            ?unit,
            value,
            word = format!("{:#010x}", word),
            "ADC threshold written"
        );
        Ok(())
    }

    async fn get_limit(&mut self, _ctx: &PwrContext, provider: u8, limit_index: u8) -> Result<u32> {
        self.provider(provider)?;
        check_index("limit", limit_index, regs::THRESHOLD_COUNT)?;
        Ok(match self.limits[limit_index as usize] {
            Some(limit) if limit.provider == provider => limit.value,
            _ => LIMIT_DISABLED,
        })
    }

    async fn tuple_get(&mut self, ctx: &PwrContext, provider: u8) -> Result<Tuple> {
        let p = *self.provider(provider)?;
        let f = self.factors[provider as usize];

        let ctrl = self.ctrl_word();
        ctx.regs
            .write(self.reg(regs::CTRL), regs::ctrl::SNAP.set_flag(ctrl, true));

        let voltage_uv = p.bus.map_or(0, |ch| {
            scale(self.averaged(ctx, regs::iir(ch)), f.voltage)
        });
        let current_ma = p.shunt.map_or(0, |ch| {
            scale(self.averaged(ctx, regs::iir(ch)), f.current)
        });
        let power_mw = p.multiplier.map_or(0, |m| {
            let nw = fxp::mul_shift_u64(self.averaged(ctx, regs::mult(m)), f.power_nw, 0);
            fxp::saturate_u32(fxp::div_round_u64(nw, 1_000_000))
        });
        let energy_mj = fxp::saturate_u32(self.accumulate(ctx, provider).energy_mj());

        trace!(
            device = self.index,
            provider,
            voltage_uv,
            current_ma,
            power_mw,
            energy_mj,
            "ADC tuple"
        );
        Ok(Tuple {
            voltage_uv,
            current_ma,
            power_mw,
            energy_mj,
        })
    }

    async fn tuple_accumulated_get(
        &mut self,
        ctx: &PwrContext,
        provider: u8,
        seq_id: u32,
    ) -> Result<AccumulatedTuple> {
        self.provider(provider)?;
        if seq_id != self.seq_id {
            debug!(
                device = self.index,
                provider,
                expected = seq_id,
                current = self.seq_id,
                "Stale accumulator snapshot"
            );
            return Err(PwrError::AccumulatorSequenceMismatch {
                expected: seq_id,
                current: self.seq_id,
            });
        }
        Ok(self.accumulate(ctx, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::RegisterIo;
    use crate::sim::SimBoard;

    const BASE: u32 = 0x0020_0000;

    // 1 mV per code on the bus, 100 mA per code on a 1 mΩ shunt
    fn descriptor(generation: AdcGeneration) -> GpuAdcDescriptor {
        GpuAdcDescriptor {
            generation,
            base: BASE,
            oversample: 4,
            code_max: 1023,
            bus_full_scale_uv: 1_023_000,
            shunt_full_scale_uv: 102_300,
            sample_period_us: 10,
            providers: vec![
                AdcProvider {
                    bus: Some(0),
                    shunt: Some(1),
                    multiplier: Some(0),
                    shunt_mohm: 1,
                    bus_full_scale_uv: None,
                },
                AdcProvider {
                    bus: Some(2),
                    shunt: None,
                    multiplier: None,
                    shunt_mohm: 0,
                    bus_full_scale_uv: None,
                },
            ],
            calibration: Vec::new(),
        }
    }

    fn set_counter(board: &SimBoard, lo: u32, value: u64) {
        board.regs.set(BASE + lo, value as u32);
        board.regs.set(BASE + lo + 4, (value >> 32) as u32);
    }

    #[test]
    fn construct_validates_against_generation() {
        let mut desc = descriptor(AdcGeneration::V10);
        desc.providers[0].bus = Some(8);
        assert!(GpuAdc::new(0, desc.clone()).is_err());
        desc.generation = AdcGeneration::V11;
        assert!(GpuAdc::new(0, desc).is_ok());

        let mut desc = descriptor(AdcGeneration::V10);
        desc.providers[0].bus_full_scale_uv = Some(2_000_000);
        assert!(matches!(
            GpuAdc::new(0, desc),
            Err(PwrError::InvalidArgument(_))
        ));

        let mut desc = descriptor(AdcGeneration::V11);
        desc.calibration.push(AdcChannelCal {
            channel: 0,
            offset: 0,
            gain: 4096,
        });
        assert!(GpuAdc::new(0, desc.clone()).is_err());
        desc.generation = AdcGeneration::V13;
        assert!(GpuAdc::new(0, desc).is_ok());

        let mut desc = descriptor(AdcGeneration::V10);
        desc.oversample = 0;
        assert!(GpuAdc::new(0, desc).is_err());

        let mut desc = descriptor(AdcGeneration::V10);
        desc.providers[0].shunt_mohm = 0;
        assert!(GpuAdc::new(0, desc).is_err());
    }

    #[test]
    fn generation_capabilities() {
        assert_eq!(AdcGeneration::V10.channel_count(), 8);
        assert_eq!(AdcGeneration::V13.channel_count(), 16);
        assert!(!AdcGeneration::V10.supports_full_scale_override());
        assert!(AdcGeneration::V11.supports_full_scale_override());
        assert!(AdcGeneration::V13.has_calibration());
        assert_eq!(AdcGeneration::V11.device_type(), DeviceType::GpuAdcV11);
    }

    #[tokio::test]
    async fn load_programs_calibration_and_resets() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut desc = descriptor(AdcGeneration::V13);
        desc.calibration.push(AdcChannelCal {
            channel: 1,
            offset: -3,
            gain: 4100,
        });
        let mut adc = GpuAdc::new(3, desc).unwrap();
        assert_eq!(adc.device_type(), DeviceType::GpuAdcV13);

        adc.load(&ctx).await.unwrap();
        assert_eq!(board.regs.read(BASE + regs::cal_offset(1)), 0xFFFD);
        assert_eq!(board.regs.read(BASE + regs::cal_gain(1)), 4100);
        assert_eq!(adc.sequence_id(), 1);

        let ctrl = board.regs.writes_to(BASE + regs::CTRL);
        assert_eq!(ctrl.len(), 2);
        assert!(regs::ctrl::SW_RESET.is_set(ctrl[0]));
        assert!(!regs::ctrl::SW_RESET.is_set(ctrl[1]));
        assert!(regs::ctrl::ENABLE.is_set(ctrl[1]));
        assert_eq!(regs::ctrl::OVERSAMPLE.get(ctrl[1]), 4);
    }

    #[tokio::test]
    async fn tuple_scales_filtered_readings() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        adc.load(&ctx).await.unwrap();

        // Readings are sums over four samples
        board.regs.set(BASE + regs::iir(0), 4 * 800);
        board.regs.set(BASE + regs::iir(1), 4 * 50);
        board.regs.set(BASE + regs::mult(0), 4 * 800 * 50);

        let t = adc.tuple_get(&ctx, 0).await.unwrap();
        assert_eq!(t.voltage_uv, 800_000);
        assert_eq!(t.current_ma, 5_000);
        assert_eq!(t.power_mw, 4_000);
        assert_eq!(t.energy_mj, 0);

        let snap = board.regs.writes_to(BASE + regs::CTRL);
        assert!(regs::ctrl::SNAP.is_set(*snap.last().unwrap()));
    }

    #[tokio::test]
    async fn unmapped_channels_read_zero() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        adc.load(&ctx).await.unwrap();
        board.regs.set(BASE + regs::iir(2), 4 * 1000);

        let t = adc.tuple_get(&ctx, 1).await.unwrap();
        assert_eq!(t.voltage_uv, 1_000_000);
        assert_eq!(t.current_ma, 0);
        assert_eq!(t.power_mw, 0);
        assert!(adc.tuple_get(&ctx, 2).await.is_err());
    }

    #[tokio::test]
    async fn accumulated_reads_track_sequence() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        adc.load(&ctx).await.unwrap();
        let seq = adc.sequence_id();

        set_counter(&board, regs::acc_lo(1), 1_000);
        set_counter(&board, regs::mult_acc_lo(0), 1_000);
        let first = adc.tuple_accumulated_get(&ctx, 0, seq).await.unwrap();
        assert_eq!(first.seq_id, seq);
        // 1000 codes × 100 mA × 10 µs
        assert_eq!(first.charge_nc, 1_000_000);
        // 1000 product codes × 100 µW × 10 µs
        assert_eq!(first.energy_nj, 1_000);

        set_counter(&board, regs::acc_lo(1), 3_000);
        set_counter(&board, regs::mult_acc_lo(0), 2_000);
        let second = adc.tuple_accumulated_get(&ctx, 0, seq).await.unwrap();
        assert_eq!(second.seq_id, first.seq_id);
        assert!(second.charge_nc >= first.charge_nc);
        assert!(second.energy_nj >= first.energy_nj);
        assert_eq!(second.charge_nc, 3_000_000);

        adc.reset(&ctx);
        assert!(matches!(
            adc.tuple_accumulated_get(&ctx, 0, seq).await,
            Err(PwrError::AccumulatorSequenceMismatch { expected, current })
                if expected == seq && current == seq + 1
        ));

        // Hardware counters restart from zero; history restarts with them
        set_counter(&board, regs::acc_lo(1), 500);
        let fresh = adc.tuple_accumulated_get(&ctx, 0, seq + 1).await.unwrap();
        assert_eq!(fresh.seq_id, seq + 1);
        assert_eq!(fresh.charge_nc, 500_000);
    }

    #[tokio::test]
    async fn accumulator_wraps_at_48_bits() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        adc.load(&ctx).await.unwrap();
        let seq = adc.sequence_id();

        set_counter(&board, regs::acc_lo(1), (1 << 48) - 10);
        let before = adc.tuple_accumulated_get(&ctx, 0, seq).await.unwrap();
        set_counter(&board, regs::acc_lo(1), 5);
        let after = adc.tuple_accumulated_get(&ctx, 0, seq).await.unwrap();
        // 15 codes across the wrap
        assert_eq!(after.charge_nc - before.charge_nc, 15 * 1_000);
    }

    #[tokio::test]
    async fn thresholds_convert_to_codes() {
        let board = SimBoard::new();
        let ctx = board.context();
        let mut adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        adc.load(&ctx).await.unwrap();

        adc.set_limit(&ctx, 0, 2, LimitUnit::CurrentMa, 20_000)
            .await
            .unwrap();
        let word = board.regs.read(BASE + regs::threshold(2));
        assert_eq!(regs::threshold::VALUE.get(word), 4 * 200);
        assert_eq!(regs::threshold::SOURCE.get(word), 1);
        assert_eq!(regs::threshold::KIND.get(word), regs::threshold::KIND_CURRENT);
        assert!(regs::threshold::ENABLE.is_set(word));
        assert_eq!(adc.get_limit(&ctx, 0, 2).await.unwrap(), 20_000);
        assert_eq!(adc.get_limit(&ctx, 1, 2).await.unwrap(), LIMIT_DISABLED);

        adc.set_limit(&ctx, 0, 0, LimitUnit::PowerMw, 1_000)
            .await
            .unwrap();
        let word = board.regs.read(BASE + regs::threshold(0));
        assert_eq!(regs::threshold::VALUE.get(word), 4 * 10_000);
        assert_eq!(regs::threshold::KIND.get(word), regs::threshold::KIND_POWER);

        adc.set_limit(&ctx, 0, 2, LimitUnit::CurrentMa, LIMIT_DISABLED)
            .await
            .unwrap();
        assert_eq!(board.regs.read(BASE + regs::threshold(2)), 0);
        assert_eq!(adc.get_limit(&ctx, 0, 2).await.unwrap(), LIMIT_DISABLED);

        assert!(matches!(
            adc.set_limit(&ctx, 1, 0, LimitUnit::PowerMw, 1).await,
            Err(PwrError::InvalidArgument(_))
        ));
        assert!(adc
            .set_limit(&ctx, 0, regs::THRESHOLD_COUNT, LimitUnit::CurrentMa, 1)
            .await
            .is_err());
        // Past the 24-bit code field
        assert!(matches!(
            adc.set_limit(&ctx, 0, 1, LimitUnit::VoltageUv, u32::MAX - 1).await,
            Err(PwrError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn full_scale_reports_and_clamps() {
        let adc = GpuAdc::new(0, descriptor(AdcGeneration::V10)).unwrap();
        let fs = adc.full_scale(0).unwrap();
        assert_eq!(fs.voltage_uv, 1_023_000);
        assert_eq!(fs.current_ma, 102_300);
        // 1023² × 100 µW
        assert_eq!(fs.power_mw, 104_653);

        // 2 µV and 2 mA per code; code_max² × 4 nW overflows u64
        let mut desc = descriptor(AdcGeneration::V10);
        desc.code_max = 1 << 31;
        desc.bus_full_scale_uv = u32::MAX;
        desc.shunt_full_scale_uv = u32::MAX;
        let adc = GpuAdc::new(0, desc).unwrap();
        let fs = adc.full_scale(0).unwrap();
        assert_eq!(fs.voltage_uv, u32::MAX);
        assert_eq!(fs.current_ma, u32::MAX);
        assert_eq!(fs.power_mw, u32::MAX);

        assert!(adc.full_scale(5).is_err());
    }
}
