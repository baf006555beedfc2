//! Index-addressed device registry.

use serde::Serialize;

use super::{DeviceDescriptor, DeviceType, PwrContext, PwrDevice};
use crate::{
    error::{check_index, PwrError, Result},
    tracing::prelude::*,
    types::{AccumulatedTuple, LimitUnit, Tuple},
};

/// Device slots per registry.
pub const MAX_DEVICES: u8 = 32;

struct Slot {
    device: PwrDevice,
    loaded: bool,
    last_error: Option<String>,
}

/// Snapshot of one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub index: u8,
    pub device_type: DeviceType,
    pub provider_count: u8,
    pub threshold_count: u8,
    pub loaded: bool,
    /// Most recent failure other than "not supported"
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum FanOut {
    Load,
    StateSync,
    VoltageChanged,
}

/// Owns every constructed device and dispatches operations by index.
///
/// Each slot is mutated only through operations on its own index. Failures
/// are recorded per slot for [`status`](Self::status). "Not supported" and
/// stale accumulator snapshots are normal outcomes and are never recorded.
pub struct Registry {
    slots: Vec<Option<Slot>>,
}

fn recorded<T>(slot: &mut Slot, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if !e.is_not_supported() && !e.is_stale_snapshot() {
            slot.last_error = Some(e.to_string());
        }
    }
    result
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_DEVICES).map(|_| None).collect(),
        }
    }

    /// Construct a device into an empty slot.
    pub fn construct(&mut self, index: u8, descriptor: DeviceDescriptor) -> Result<DeviceType> {
        check_index("device", index, MAX_DEVICES)?;
        let entry = &mut self.slots[index as usize];
        if entry.is_some() {
            return Err(PwrError::InvalidArgument(format!(
                "device slot {} already occupied",
                index
            )));
        }

        let device = PwrDevice::construct(index, descriptor)?;
        let device_type = device.device_type();
        *entry = Some(Slot {
            device,
            loaded: false,
            last_error: None,
        });
        debug!(index, device = %device_type, "Device constructed");
        Ok(device_type)
    }

    fn slot(&self, index: u8) -> Result<&Slot> {
        check_index("device", index, MAX_DEVICES)?;
        self.slots[index as usize]
            .as_ref()
            .ok_or_else(|| PwrError::InvalidArgument(format!("device slot {} is empty", index)))
    }

    fn slot_mut(&mut self, index: u8) -> Result<&mut Slot> {
        check_index("device", index, MAX_DEVICES)?;
        self.slots[index as usize]
            .as_mut()
            .ok_or_else(|| PwrError::InvalidArgument(format!("device slot {} is empty", index)))
    }

    /// Look up a device by index.
    pub fn device(&self, index: u8) -> Result<&PwrDevice> {
        Ok(&self.slot(index)?.device)
    }

    pub fn device_mut(&mut self, index: u8) -> Result<&mut PwrDevice> {
        Ok(&mut self.slot_mut(index)?.device)
    }

    /// Indices of occupied slots, ascending.
    pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as u8)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn load(&mut self, ctx: &PwrContext, index: u8) -> Result<()> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().load(ctx).await;
        slot.loaded = result.is_ok();
        recorded(slot, result)
    }

    pub async fn get_voltage(&mut self, ctx: &PwrContext, index: u8, provider: u8) -> Result<u32> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().get_voltage(ctx, provider).await;
        recorded(slot, result)
    }

    pub async fn get_current(&mut self, ctx: &PwrContext, index: u8, provider: u8) -> Result<u32> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().get_current(ctx, provider).await;
        recorded(slot, result)
    }

    pub async fn get_power(&mut self, ctx: &PwrContext, index: u8, provider: u8) -> Result<u32> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().get_power(ctx, provider).await;
        recorded(slot, result)
    }

    pub async fn tuple_get(&mut self, ctx: &PwrContext, index: u8, provider: u8) -> Result<Tuple> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().tuple_get(ctx, provider).await;
        recorded(slot, result)
    }

    pub async fn tuple_accumulated_get(
        &mut self,
        ctx: &PwrContext,
        index: u8,
        provider: u8,
        seq_id: u32,
    ) -> Result<AccumulatedTuple> {
        let slot = self.slot_mut(index)?;
        let result = slot
            .device
            .as_device_mut()
            .tuple_accumulated_get(ctx, provider, seq_id)
            .await;
        recorded(slot, result)
    }

    pub async fn state_sync(&mut self, ctx: &PwrContext, index: u8) -> Result<()> {
        let slot = self.slot_mut(index)?;
        let result = slot.device.as_device_mut().state_sync(ctx).await;
        recorded(slot, result)
    }

    /// Software-reset an ADC and return its new sequence id.
    pub fn reset_adc(&mut self, ctx: &PwrContext, index: u8) -> Result<u32> {
        match &mut self.slot_mut(index)?.device {
            PwrDevice::GpuAdc(adc) => {
                adc.reset(ctx);
                Ok(adc.sequence_id())
            }
            _ => Err(PwrError::NotSupported("reset")),
        }
    }

    /// Where a limit actually lives: estimator limits past its own
    /// thresholds are held by the linked ADC.
    fn limit_target(&self, index: u8, provider: u8, limit_index: u8) -> Result<(u8, u8, u8)> {
        let PwrDevice::BlockActivity(ba) = &self.slot(index)?.device else {
            return Ok((index, provider, limit_index));
        };
        let Some(fwd) = ba.forwarded_limit(provider, limit_index)? else {
            return Ok((index, provider, limit_index));
        };
        match self.slot(fwd.device_index).map(|s| &s.device) {
            Ok(PwrDevice::GpuAdc(_)) => Ok((fwd.device_index, fwd.provider, fwd.limit_index)),
            _ => Err(PwrError::invalid_state(format!(
                "BA {} links device {} which is not an ADC",
                index, fwd.device_index
            ))),
        }
    }

    pub async fn set_limit(
        &mut self,
        ctx: &PwrContext,
        index: u8,
        provider: u8,
        limit_index: u8,
        unit: LimitUnit,
        value: u32,
    ) -> Result<()> {
        let (target, provider, limit_index) = self.limit_target(index, provider, limit_index)?;
        if target != index {
            trace!(index, target, provider, limit_index, "Limit forwarded to ADC");
        }
        let slot = self.slot_mut(target)?;
        let result = slot
            .device
            .as_device_mut()
            .set_limit(ctx, provider, limit_index, unit, value)
            .await;
        recorded(slot, result)
    }

    pub async fn get_limit(
        &mut self,
        ctx: &PwrContext,
        index: u8,
        provider: u8,
        limit_index: u8,
    ) -> Result<u32> {
        let (target, provider, limit_index) = self.limit_target(index, provider, limit_index)?;
        let slot = self.slot_mut(target)?;
        let result = slot
            .device
            .as_device_mut()
            .get_limit(ctx, provider, limit_index)
            .await;
        recorded(slot, result)
    }

    /// Load every device. Returns the first failure after attempting all.
    pub async fn load_all(&mut self, ctx: &PwrContext) -> Result<()> {
        self.fan_out(ctx, FanOut::Load).await
    }

    /// Periodic refresh of every device that supports it.
    pub async fn state_sync_all(&mut self, ctx: &PwrContext) -> Result<()> {
        self.fan_out(ctx, FanOut::StateSync).await
    }

    /// Notify every device that a rail voltage moved.
    pub async fn voltage_changed_all(&mut self, ctx: &PwrContext) -> Result<()> {
        self.fan_out(ctx, FanOut::VoltageChanged).await
    }

    async fn fan_out(&mut self, ctx: &PwrContext, op: FanOut) -> Result<()> {
        let mut first = None;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            let device = slot.device.as_device_mut();
            let result = match op {
                FanOut::Load => device.load(ctx).await,
                FanOut::StateSync => device.state_sync(ctx).await,
                FanOut::VoltageChanged => device.voltage_changed(ctx).await,
            };
            if let FanOut::Load = op {
                slot.loaded = result.is_ok();
            }
            match recorded(slot, result) {
                Ok(()) => {}
                Err(e) if e.is_not_supported() => {}
                Err(e) => {
                    warn!(
                        index,
                        device = %slot.device.device_type(),
                        ?op,
                        error = %e,
                        "Device operation failed"
                    );
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Status of every occupied slot.
    pub fn status(&self) -> Vec<DeviceStatus> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let slot = entry.as_ref()?;
                let device = slot.device.as_device();
                Some(DeviceStatus {
                    index: index as u8,
                    device_type: device.device_type(),
                    provider_count: device.provider_count(),
                    threshold_count: device.threshold_count(),
                    loaded: slot.loaded,
                    last_error: slot.last_error.clone(),
                })
            })
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_activity::{self, AdcLink, BaDescriptor, BaRailConfig};
    use crate::bus::I2cDevice;
    use crate::gpu_adc::{self, AdcGeneration, AdcProvider, GpuAdcDescriptor};
    use crate::hw_trait::RegisterIo;
    use crate::peripheral::ina219::Ina219Descriptor;
    use crate::sim::{SimBoard, SimRail};

    const INA: u8 = 0;
    const BA: u8 = 1;
    const ADC: u8 = 2;
    const ADC_BASE: u32 = 0x0020_0000;
    const RAIL: u8 = 3;

    fn ina219(address: u8) -> DeviceDescriptor {
        DeviceDescriptor::Ina219(Ina219Descriptor {
            bus: I2cDevice::big_endian(address, 0),
            configuration: 0x399F,
            calibration: 4096,
            shunt_mohm: 10,
        })
    }

    fn adc() -> DeviceDescriptor {
        DeviceDescriptor::GpuAdc(GpuAdcDescriptor {
            generation: AdcGeneration::V11,
            base: ADC_BASE,
            oversample: 4,
            code_max: 1023,
            bus_full_scale_uv: 1_023_000,
            shunt_full_scale_uv: 102_300,
            sample_period_us: 10,
            providers: vec![AdcProvider {
                bus: Some(0),
                shunt: Some(1),
                multiplier: Some(0),
                shunt_mohm: 1,
                bus_full_scale_uv: None,
            }],
            calibration: Vec::new(),
        })
    }

    fn ba(link_to: u8) -> DeviceDescriptor {
        DeviceDescriptor::BlockActivity(BaDescriptor {
            window: 0,
            window_size_log2: 8,
            step_size_log2: 4,
            current_mode: true,
            fixed_coefficients: false,
            leakage_lut: false,
            dba_period: 0,
            dba_coeffs: [0; 3],
            temperature_offset: 0,
            rails: [Some(BaRailConfig::direct(RAIL, 1_200_000)), None, None, None],
            adc_link: Some(AdcLink {
                device_index: link_to,
                provider: 0,
                threshold_count: 2,
            }),
        })
    }

    fn board() -> SimBoard {
        let board = SimBoard::new();
        board.rails.insert(RAIL, SimRail::logic(1_000_000));
        board
    }

    #[test]
    fn construct_fills_empty_slots_only() {
        let mut registry = Registry::new();
        assert_eq!(registry.construct(INA, ina219(0x40)).unwrap(), DeviceType::Ina219);
        assert!(registry.construct(INA, ina219(0x41)).is_err());
        assert!(registry.construct(MAX_DEVICES, ina219(0x41)).is_err());

        // A rejected descriptor leaves the slot empty
        let DeviceDescriptor::Ina219(mut bad) = ina219(0x41) else {
            unreachable!()
        };
        bad.calibration = 0;
        assert!(registry.construct(5, DeviceDescriptor::Ina219(bad)).is_err());
        assert!(registry.device(5).is_err());

        registry.construct(ADC, adc()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.indices().collect::<Vec<_>>(), vec![INA, ADC]);
        assert_eq!(registry.device(ADC).unwrap().device_type(), DeviceType::GpuAdcV11);
    }

    #[tokio::test]
    async fn load_all_attempts_every_device() {
        let board = board();
        let ctx = board.context();
        board.i2c.remove_device(0x41);

        let mut registry = Registry::new();
        registry.construct(INA, ina219(0x41)).unwrap();
        registry.construct(ADC, adc()).unwrap();

        assert!(matches!(registry.load_all(&ctx).await, Err(PwrError::Bus(_))));

        let status = registry.status();
        assert_eq!(status.len(), 2);
        assert!(!status[0].loaded);
        assert!(status[0].last_error.is_some());
        assert!(status[1].loaded);
        assert_eq!(status[1].last_error, None);
        assert_eq!(status[1].threshold_count, gpu_adc::regs::THRESHOLD_COUNT);
    }

    #[tokio::test]
    async fn not_supported_is_not_an_error() {
        let board = board();
        let ctx = board.context();
        let mut registry = Registry::new();
        registry.construct(INA, ina219(0x40)).unwrap();
        registry.load_all(&ctx).await.unwrap();

        let err = registry.state_sync(&ctx, INA).await.unwrap_err();
        assert!(err.is_not_supported());
        assert!(registry.state_sync_all(&ctx).await.is_ok());
        assert!(registry.reset_adc(&ctx, INA).unwrap_err().is_not_supported());
        assert_eq!(registry.status()[0].last_error, None);
    }

    #[tokio::test]
    async fn estimator_limits_forward_to_adc() {
        let board = board();
        let ctx = board.context();
        let mut registry = Registry::new();
        registry.construct(BA, ba(ADC)).unwrap();
        registry.construct(ADC, adc()).unwrap();
        registry.load_all(&ctx).await.unwrap();

        // Estimator limit 5 is ADC threshold 1
        registry
            .set_limit(&ctx, BA, block_activity::PROVIDER_TOTAL, 5, LimitUnit::CurrentMa, 20_000)
            .await
            .unwrap();
        let word = board.regs.read(ADC_BASE + gpu_adc::regs::threshold(1));
        assert_eq!(gpu_adc::regs::threshold::VALUE.get(word), 4 * 200);
        assert_eq!(registry.get_limit(&ctx, BA, 0, 5).await.unwrap(), 20_000);
        assert_eq!(registry.get_limit(&ctx, ADC, 0, 1).await.unwrap(), 20_000);

        // Own thresholds stay on the estimator
        registry
            .set_limit(&ctx, BA, 0, 0, LimitUnit::CurrentMa, 900)
            .await
            .unwrap();
        assert_eq!(registry.get_limit(&ctx, BA, 0, 0).await.unwrap(), 900);
        assert!(registry.set_limit(&ctx, BA, 0, 6, LimitUnit::CurrentMa, 1).await.is_err());
    }

    #[tokio::test]
    async fn forwarding_to_a_non_adc_is_invalid_state() {
        let board = board();
        let ctx = board.context();
        let mut registry = Registry::new();
        registry.construct(INA, ina219(0x40)).unwrap();
        registry.construct(BA, ba(INA)).unwrap();

        assert!(matches!(
            registry.set_limit(&ctx, BA, 0, 4, LimitUnit::CurrentMa, 1).await,
            Err(PwrError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn adc_reset_invalidates_snapshots() {
        let board = board();
        let ctx = board.context();
        let mut registry = Registry::new();
        registry.construct(ADC, adc()).unwrap();
        registry.load(&ctx, ADC).await.unwrap();

        let seq = registry.tuple_accumulated_get(&ctx, ADC, 0, 1).await.unwrap().seq_id;
        let next = registry.reset_adc(&ctx, ADC).unwrap();
        assert_eq!(next, seq + 1);
        assert!(matches!(
            registry.tuple_accumulated_get(&ctx, ADC, 0, seq).await,
            Err(PwrError::AccumulatorSequenceMismatch { .. })
        ));
        // A stale snapshot is not a device failure
        assert_eq!(registry.status()[0].last_error, None);
    }
}
