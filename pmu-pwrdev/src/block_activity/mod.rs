//! Block-activity power estimator.
//!
//! A hardware window counter accumulates block activity over a configurable
//! period and scales it into power (or current) with a per-rail linear model:
//! activity × Factor A plus Factor C leakage, summed over up to four rail
//! slots. Firmware owns the model coefficients and keeps them current as rail
//! voltages move.
//!
//! Provider 0 reports the total window sum, provider 1 the dynamic part with
//! cached leakage removed. The estimator's four hardware thresholds are
//! limit indices 0..=3; higher indices are ADC-resident thresholds reached
//! through [`AdcLink`] and routed by the [`Registry`](crate::device::Registry).

use async_trait::async_trait;

use crate::{
    device::{DeviceType, PowerDevice, PwrContext},
    error::{check_index, PwrError, Result},
    hw_trait::mmio::min_bit_width,
    rail::VoltageDomain,
    tracing::prelude::*,
    types::{
        fxp::{self, UFXP20_12},
        LimitUnit, Tuple, INVALID, LIMIT_DISABLED,
    },
};

pub mod regs;

/// Provider index of the total window sum.
pub const PROVIDER_TOTAL: u8 = 0;
/// Provider index of the leakage-free window sum.
pub const PROVIDER_DYNAMIC: u8 = 1;

const PROVIDER_COUNT: u8 = 2;

/// One monitored rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaRailConfig {
    /// Rail id understood by the rail provider
    pub rail: u8,
    /// Take Factor A from the voltage-indexed calibration table
    pub lut_enabled: bool,
    /// Sample rail voltage from the ADC instead of the setpoint
    pub adc_select: bool,
    /// Highest voltage the rail reaches; sizes the Factor A shift
    pub voltage_max_uv: u32,
    /// Voltage of calibration table entry 0
    pub lut_base_uv: u32,
    /// Voltage spacing of calibration table entries
    pub lut_step_uv: u32,
}

impl BaRailConfig {
    /// Rail with a directly written Factor A.
    pub const fn direct(rail: u8, voltage_max_uv: u32) -> Self {
        Self {
            rail,
            lut_enabled: false,
            adc_select: false,
            voltage_max_uv,
            lut_base_uv: 0,
            lut_step_uv: 0,
        }
    }
}

/// Cross-reference to the ADC device holding the extended thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcLink {
    /// Registry index of the ADC device
    pub device_index: u8,
    /// ADC provider the thresholds apply to
    pub provider: u8,
    /// ADC thresholds made available as estimator limits 4 and up
    pub threshold_count: u8,
}

/// Board configuration for one estimator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaDescriptor {
    /// Hardware window, below [`regs::WINDOW_COUNT`]
    pub window: u8,
    pub window_size_log2: u8,
    pub step_size_log2: u8,
    /// Window sums are current in mA rather than power in mW
    pub current_mode: bool,
    /// Coefficients never change after load; state sync does nothing
    pub fixed_coefficients: bool,
    /// Leakage calibration table; unsupported and must be false
    pub leakage_lut: bool,
    pub dba_period: u8,
    pub dba_coeffs: [u16; regs::DBA_COEFFS],
    /// Temperature offset for the leakage model, 1/256 °C
    pub temperature_offset: i32,
    pub rails: [Option<BaRailConfig>; regs::RAIL_SLOTS as usize],
    pub adc_link: Option<AdcLink>,
}

/// An estimator limit held by an ADC device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedLimit {
    pub device_index: u8,
    pub provider: u8,
    pub limit_index: u8,
}

/// Factor A position and domain, fixed at load.
#[derive(Debug, Clone, Copy)]
struct Programmed {
    shift_a: u32,
    domain: VoltageDomain,
}

#[derive(Debug)]
struct RailState {
    config: BaRailConfig,
    programmed: Option<Programmed>,
    /// Voltage the coefficients were last computed for
    voltage_uv: Option<u32>,
    /// Leakage last written to Factor C
    leakage: u32,
}

pub struct BaEstimator {
    index: u8,
    desc: BaDescriptor,
    config_word: u32,
    rails: [Option<RailState>; regs::RAIL_SLOTS as usize],
    /// Provider and value per hardware threshold
    limits: [Option<(u8, u32)>; regs::THRESHOLD_COUNT as usize],
    loaded: bool,
}

/// Right shift that moves the top set bit of `max_factor` to the top bit of
/// the Factor A field.
pub fn shift_a_for(max_factor: u32) -> Result<u32> {
    let top = regs::factor_a::VALUE.width - 1;
    let msb = min_bit_width(max_factor)
        .checked_sub(1)
        .ok_or_else(|| PwrError::invalid_state("rail maximum scale factor is zero"))?;
    if msb < top {
        return Err(PwrError::invalid_state(format!(
            "scale factor {:#x} needs a left shift to fill Factor A",
            max_factor
        )));
    }
    Ok(msb - top)
}

fn factor_a_word(factor: u32, programmed: Programmed) -> Result<u32> {
    use regs::factor_a;

    let word = factor_a::VALUE.set(0, factor >> programmed.shift_a)?;
    let word = factor_a::SHIFT.set(word, programmed.shift_a)?;
    Ok(factor_a::MEMORY_DOMAIN.set_flag(word, programmed.domain == VoltageDomain::Memory))
}

fn programmed(rail: &RailState) -> Result<Programmed> {
    rail.programmed.ok_or_else(|| {
        PwrError::invalid_state(format!("BA rail {} used before load", rail.config.rail))
    })
}

impl BaEstimator {
    pub fn new(index: u8, desc: BaDescriptor) -> Result<Self> {
        use regs::config;

        let invalid = |msg: String| PwrError::InvalidArgument(format!("BA {}: {}", index, msg));

        if desc.window >= regs::WINDOW_COUNT {
            return Err(invalid(format!("window {} out of range", desc.window)));
        }
        if desc.window_size_log2 == 0
            || (desc.window_size_log2 as u32) > config::WINDOW_SIZE.max()
        {
            return Err(invalid(format!(
                "window size 2^{} out of range",
                desc.window_size_log2
            )));
        }
        if desc.step_size_log2 > desc.window_size_log2 {
            return Err(invalid(format!(
                "step size 2^{} exceeds window size 2^{}",
                desc.step_size_log2, desc.window_size_log2
            )));
        }
        if desc.leakage_lut {
            return Err(invalid("leakage calibration table is not supported".into()));
        }
        if desc.dba_coeffs.iter().any(|&c| c != 0)
            && (desc.dba_period == 0 || (desc.dba_period as u32) > regs::dba::PERIOD.max())
        {
            return Err(invalid(format!("peak-power period {} out of range", desc.dba_period)));
        }
        if desc.rails.iter().all(Option::is_none) {
            return Err(invalid("no rails configured".into()));
        }

        let mut word = config::WINDOW_SIZE.set(0, desc.window_size_log2 as u32)?;
        word = config::STEP_SIZE.set(word, desc.step_size_log2 as u32)?;
        word = config::CURRENT_MODE.set_flag(word, desc.current_mode);

        let mut rails: [Option<RailState>; regs::RAIL_SLOTS as usize] = Default::default();
        for (slot, rail) in desc.rails.iter().enumerate() {
            let Some(rail) = rail else { continue };
            if rail.lut_enabled && rail.lut_step_uv == 0 {
                return Err(invalid(format!("rail slot {} table step is zero", slot)));
            }
            let slot_id = slot as u8;
            word = config::rail_enable(slot_id).set_flag(word, true);
            word = config::rail_lut(slot_id).set_flag(word, rail.lut_enabled);
            word = config::rail_adc_select(slot_id).set_flag(word, rail.adc_select);
            rails[slot] = Some(RailState {
                config: *rail,
                programmed: None,
                voltage_uv: None,
                leakage: 0,
            });
        }

        Ok(Self {
            index,
            desc,
            config_word: word,
            rails,
            limits: [None; regs::THRESHOLD_COUNT as usize],
            loaded: false,
        })
    }

    /// Window configuration word, without the enable bit.
    pub fn config_word(&self) -> u32 {
        self.config_word
    }

    fn unit(&self) -> LimitUnit {
        if self.desc.current_mode {
            LimitUnit::CurrentMa
        } else {
            LimitUnit::PowerMw
        }
    }

    fn active_rails(&self) -> impl Iterator<Item = (u8, &RailState)> + '_ {
        self.rails
            .iter()
            .enumerate()
            .filter_map(|(slot, rail)| rail.as_ref().map(|r| (slot as u8, r)))
    }

    fn check_limit_args(&self, provider: u8, limit_index: u8) -> Result<()> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        check_index("limit", limit_index, self.threshold_count())
    }

    /// Where an ADC-resident limit lives, or `None` for the estimator's own
    /// thresholds.
    pub fn forwarded_limit(&self, provider: u8, limit_index: u8) -> Result<Option<ForwardedLimit>> {
        self.check_limit_args(provider, limit_index)?;
        if limit_index < regs::THRESHOLD_COUNT {
            return Ok(None);
        }
        let link = self
            .desc
            .adc_link
            .ok_or_else(|| PwrError::invalid_state("extended limit without ADC link"))?;
        Ok(Some(ForwardedLimit {
            device_index: link.device_index,
            provider: link.provider,
            limit_index: limit_index - regs::THRESHOLD_COUNT,
        }))
    }

    fn program_rail(
        ctx: &PwrContext,
        window: u8,
        slot: u8,
        rail: &mut RailState,
        current_mode: bool,
    ) -> Result<()> {
        let regs_io = ctx.regs.as_ref();
        let id = rail.config.rail;
        let domain = VoltageDomain::try_from(ctx.rails.domain(id)?)?;
        let max_factor = ctx
            .rails
            .scale_factor(id, rail.config.voltage_max_uv, current_mode)?;
        let programmed = Programmed {
            shift_a: shift_a_for(max_factor)?,
            domain,
        };

        regs_io.write(regs::factor_c(window, slot), 0);
        rail.leakage = 0;
        rail.voltage_uv = None;

        if rail.config.lut_enabled {
            for entry in 0..regs::LUT_ENTRIES {
                let step = rail.config.lut_step_uv as u64 * entry as u64;
                let voltage = fxp::saturate_u32(rail.config.lut_base_uv as u64 + step);
                let factor = ctx.rails.scale_factor(id, voltage, current_mode)?;
                let value = regs::LUT_VALUE.set(0, factor >> programmed.shift_a)?;
                regs_io.write(regs::lut(window, slot, entry), value);
            }
            // Table supplies the value; shift and domain still come from here
            regs_io.write(regs::factor_a(window, slot), factor_a_word(0, programmed)?);
        } else {
            let voltage = ctx.rails.voltage_uv(id)?;
            let factor = ctx.rails.scale_factor(id, voltage, current_mode)?;
            regs_io.write(
                regs::factor_a(window, slot),
                factor_a_word(factor, programmed)?,
            );
        }

        rail.programmed = Some(programmed);
        debug!(
            rail = id,
            slot,
            shift_a = programmed.shift_a,
            domain = ?domain,
            lut = rail.config.lut_enabled,
            "BA rail programmed"
        );
        Ok(())
    }

    fn program_chip(&self, ctx: &PwrContext) -> Result<()> {
        use regs::{dba, instance_counts};

        let regs_io = ctx.regs.as_ref();
        let counts = ctx.chip.instance_counts();
        let mut word = instance_counts::TPC.set(0, counts.tpc as u32)?;
        word = instance_counts::FBPA.set(word, counts.fbpa as u32)?;
        word = instance_counts::XBAR.set(word, counts.xbar as u32)?;
        regs_io.write(regs::INSTANCE_COUNTS, word);

        if self.desc.dba_coeffs.iter().any(|&c| c != 0) {
            for (i, &c) in self.desc.dba_coeffs.iter().enumerate() {
                regs_io.write(regs::dba_coeff(i), dba::COEFF.set(0, c as u32)?);
            }
            let word = dba::PERIOD.set(0, self.desc.dba_period as u32)?;
            regs_io.write(regs::DBA_CONFIG, dba::ENABLE.set_flag(word, true));
        } else {
            regs_io.write(regs::DBA_CONFIG, 0);
        }

        regs_io.write(regs::IDLE_CTRL, regs::IDLE_TRIGGER);
        Ok(())
    }

    /// Recompute Factor A and Factor C for every rail whose voltage moved.
    fn sync(&mut self, ctx: &PwrContext) -> Result<()> {
        let regs_io = ctx.regs.as_ref();
        let window = self.desc.window;
        let current_mode = self.desc.current_mode;
        let temperature_offset = self.desc.temperature_offset;

        for (slot, rail) in self.rails.iter_mut().enumerate() {
            let Some(rail) = rail else { continue };
            let slot = slot as u8;
            let id = rail.config.rail;
            let voltage = ctx.rails.voltage_uv(id)?;
            if rail.voltage_uv == Some(voltage) {
                continue;
            }

            let programmed = programmed(rail)?;
            if !rail.config.lut_enabled {
                let factor = ctx.rails.scale_factor(id, voltage, current_mode)?;
                regs_io.write(
                    regs::factor_a(window, slot),
                    factor_a_word(factor, programmed)?,
                );
            }

            let leakage_fx = ctx
                .rails
                .leakage(id, voltage, current_mode, temperature_offset)?;
            let leakage = fxp::saturate_i64_to_u32(UFXP20_12.to_int(leakage_fx as i64));
            regs_io.write(regs::factor_c(window, slot), regs::FACTOR_C.set(0, leakage)?);

            trace!(
                device = self.index,
                rail = id,
                voltage_uv = voltage,
                leakage,
                "BA coefficients updated"
            );
            rail.leakage = leakage;
            rail.voltage_uv = Some(voltage);
        }
        Ok(())
    }

    fn window_value(&self, ctx: &PwrContext, provider: u8) -> u32 {
        let sum = ctx.regs.read(regs::window_sum(self.desc.window));
        if provider == PROVIDER_DYNAMIC {
            let leakage = self
                .active_rails()
                .fold(0u32, |acc, (_, r)| acc.saturating_add(r.leakage));
            sum.saturating_sub(leakage)
        } else {
            sum
        }
    }
}

#[async_trait]
impl PowerDevice for BaEstimator {
    fn device_type(&self) -> DeviceType {
        DeviceType::BlockActivity
    }

    fn provider_count(&self) -> u8 {
        PROVIDER_COUNT
    }

    fn threshold_count(&self) -> u8 {
        let extended = self.desc.adc_link.map_or(0, |l| l.threshold_count);
        regs::THRESHOLD_COUNT.saturating_add(extended)
    }

    async fn load(&mut self, ctx: &PwrContext) -> Result<()> {
        let regs_io = ctx.regs.as_ref();
        let window = self.desc.window;
        let current_mode = self.desc.current_mode;

        for (slot, rail) in self.rails.iter_mut().enumerate() {
            if let Some(rail) = rail {
                Self::program_rail(ctx, window, slot as u8, rail, current_mode)?;
            }
        }

        for t in 0..regs::THRESHOLD_COUNT {
            regs_io.write(regs::threshold(window, t), 0);
        }
        self.limits = [None; regs::THRESHOLD_COUNT as usize];

        self.program_chip(ctx)?;
        regs_io.write(
            regs::config(window),
            regs::config::ENABLE.set_flag(self.config_word, true),
        );
        self.loaded = true;

        debug!(
            device = self.index,
            window,
            config = format!("{:#010x}", self.config_word),
            "BA estimator loaded"
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
        use regs::threshold;

        if self.forwarded_limit(provider, limit_index)?.is_some() {
            return Err(PwrError::InvalidArgument(format!(
                "BA {}: limit {} is ADC-resident and must be routed by the registry",
                self.index, limit_index
            )));
        }
        unit.expect_one_of(&[self.unit()])?;

        let word = if value == LIMIT_DISABLED {
            0
        } else {
            let word = threshold::VALUE.set(0, value)?;
            let word = threshold::DYNAMIC.set_flag(word, provider == PROVIDER_DYNAMIC);
            threshold::ENABLE.set_flag(word, true)
        };
        ctx.regs
            .write(regs::threshold(self.desc.window, limit_index), word);
        self.limits[limit_index as usize] = (value != LIMIT_DISABLED).then_some((provider, value));
        trace!(
            device = self.index,
            provider,
            limit_index,
            value,
            "BA threshold written"
        );
        Ok(())
    }

    async fn get_limit(&mut self, _ctx: &PwrContext, provider: u8, limit_index: u8) -> Result<u32> {
        if self.forwarded_limit(provider, limit_index)?.is_some() {
            return Err(PwrError::InvalidArgument(format!(
                "BA {}: limit {} is ADC-resident and must be routed by the registry",
                self.index, limit_index
            )));
        }
        Ok(match self.limits[limit_index as usize] {
            Some((p, value)) if p == provider => value,
            _ => LIMIT_DISABLED,
        })
    }

    async fn state_sync(&mut self, ctx: &PwrContext) -> Result<()> {
        if self.desc.fixed_coefficients {
            return Ok(());
        }
        if !self.loaded {
            return Err(PwrError::invalid_state(format!(
                "BA {}: state sync before load",
                self.index
            )));
        }
        self.sync(ctx)
    }

    async fn tuple_get(&mut self, ctx: &PwrContext, provider: u8) -> Result<Tuple> {
        check_index("provider", provider, PROVIDER_COUNT)?;
        let value = self.window_value(ctx, provider);
        let current_mode = self.desc.current_mode;

        let mut rails = self.active_rails();
        let single = match (rails.next(), rails.next()) {
            (Some((_, rail)), None) => Some(rail.config.rail),
            _ => None,
        };

        let Some(rail) = single else {
            // Cross-conversion is undefined across several rails
            return Ok(Tuple {
                voltage_uv: INVALID,
                current_ma: if current_mode { value } else { INVALID },
                power_mw: if current_mode { INVALID } else { value },
                energy_mj: 0,
            });
        };

        let voltage_uv = ctx.rails.voltage_uv(rail)?;
        let voltage_mv = fxp::saturate_u32(fxp::div_round_u64(voltage_uv as u64, 1000));
        let (current_ma, power_mw) = if current_mode {
            (value, fxp::power_mw(voltage_mv, value))
        } else {
            (fxp::current_ma(value, voltage_mv).unwrap_or(INVALID), value)
        };
        Ok(Tuple {
            voltage_uv,
            current_ma,
            power_mw,
            energy_mj: 0,
        })
    }

    async fn voltage_changed(&mut self, ctx: &PwrContext) -> Result<()> {
        self.state_sync(ctx).await
    }
}
