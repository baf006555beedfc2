//! Simulated hardware.
//!
//! In-memory stand-ins for every hardware seam: an I2C bus backed by a
//! per-device register file, a memory-mapped register window, the inter-
//! processor mutex, and the rail and chip-config providers. Used by the unit
//! tests and by `pwr-monitor` when no real board is attached.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusClient, BusTask};
use crate::config::BusConfig;
use crate::device::PwrContext;
use crate::error::{PwrError, Result};
use crate::hw_trait::{self, HwMutex, I2c, I2cError, RegisterIo};
use crate::rail::{ChipConfig, InstanceCounts, RailProvider, DOMAIN_TAG_LOGIC};
use crate::types::fxp::{self, UFXP20_12};

#[derive(Default)]
struct SimI2cState {
    registers: HashMap<(u8, u8), Vec<u8>>,
    failures: VecDeque<I2cError>,
    absent: HashSet<u8>,
    writes: Vec<(u8, Vec<u8>)>,
}

/// I2C bus with one register file per device address.
///
/// A write stores the bytes after the index byte as the register's contents;
/// a write-read returns them, zero-padded or truncated to the read length.
/// Clones share state so a test can keep a handle after giving one to the
/// bus task.
#[derive(Clone, Default)]
pub struct SimI2c {
    state: Arc<Mutex<SimI2cState>>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes of a register.
    pub fn register(&self, address: u8, index: u8) -> Vec<u8> {
        self.state
            .lock()
            .registers
            .get(&(address, index))
            .cloned()
            .unwrap_or_default()
    }

    /// Preset a register as the device itself would, bypassing the write log.
    pub fn set_register(&self, address: u8, index: u8, bytes: &[u8]) {
        self.state
            .lock()
            .registers
            .insert((address, index), bytes.to_vec());
    }

    /// Preset a big-endian 16-bit register.
    pub fn set_reg16_be(&self, address: u8, index: u8, value: u16) {
        self.set_register(address, index, &value.to_be_bytes());
    }

    /// Fail the next transfer with `err`. Calls queue up.
    pub fn fail_next(&self, err: I2cError) {
        self.state.lock().failures.push_back(err);
    }

    /// Make `address` NACK every transfer.
    pub fn remove_device(&self, address: u8) {
        self.state.lock().absent.insert(address);
    }

    /// Every write seen, as (address, bytes including the index byte).
    pub fn write_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    fn check(state: &mut SimI2cState, addr: u8) -> hw_trait::Result<()> {
        if let Some(err) = state.failures.pop_front() {
            return Err(err.into());
        }
        if state.absent.contains(&addr) {
            return Err(I2cError::Nack.into());
        }
        Ok(())
    }
}

#[async_trait]
impl I2c for SimI2c {
    async fn write(&mut self, addr: u8, data: &[u8]) -> hw_trait::Result<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, addr)?;
        state.writes.push((addr, data.to_vec()));
        if let Some((&index, payload)) = data.split_first() {
            if !payload.is_empty() {
                state.registers.insert((addr, index), payload.to_vec());
            }
        }
        Ok(())
    }

    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> hw_trait::Result<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, addr)?;
        buffer.fill(0);
        Ok(())
    }

    async fn write_read(
        &mut self,
        addr: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> hw_trait::Result<()> {
        let mut state = self.state.lock();
        Self::check(&mut state, addr)?;
        let index = write.first().copied().ok_or_else(|| {
            hw_trait::HwError::InvalidParameter("write_read without register index".into())
        })?;
        read.fill(0);
        if let Some(stored) = state.registers.get(&(addr, index)) {
            let n = stored.len().min(read.len());
            read[..n].copy_from_slice(&stored[..n]);
        }
        Ok(())
    }
}

#[derive(Default)]
struct SimRegistersState {
    values: HashMap<u32, u32>,
    latching: HashMap<u32, u32>,
    writes: Vec<(u32, u32)>,
}

/// Memory-mapped register window. Unwritten registers read zero.
#[derive(Default)]
pub struct SimRegisters {
    state: Mutex<SimRegistersState>,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model an owner-token register: writes only latch while it holds
    /// `idle`, except writes of `idle` itself.
    pub fn latch_when_idle(&self, addr: u32, idle: u32) {
        let mut state = self.state.lock();
        state.latching.insert(addr, idle);
        state.values.entry(addr).or_insert(idle);
    }

    /// Preset a register, bypassing the write log and latch rules.
    pub fn set(&self, addr: u32, value: u32) {
        self.state.lock().values.insert(addr, value);
    }

    /// Every write seen, in order.
    pub fn write_log(&self) -> Vec<(u32, u32)> {
        self.state.lock().writes.clone()
    }

    /// Values written to `addr`, in order.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl RegisterIo for SimRegisters {
    fn read(&self, addr: u32) -> u32 {
        self.state.lock().values.get(&addr).copied().unwrap_or(0)
    }

    fn write(&self, addr: u32, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((addr, value));
        if let Some(&idle) = state.latching.get(&addr) {
            let current = state.values.get(&addr).copied().unwrap_or(idle);
            if current != idle && value != idle {
                return;
            }
        }
        state.values.insert(addr, value);
    }
}

/// Hardware mutex with injectable contention.
#[derive(Default)]
pub struct SimHwMutex {
    held: AtomicBool,
    external: AtomicBool,
    contend: AtomicU32,
    attempts: AtomicU32,
}

impl SimHwMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the other processor hold (or let go of) the mutex indefinitely.
    pub fn hold_externally(&self, held: bool) {
        self.external.store(held, Ordering::SeqCst);
    }

    /// Fail the next `n` acquisition attempts.
    pub fn contend_for(&self, n: u32) {
        self.contend.store(n, Ordering::SeqCst);
    }

    /// Acquisition attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// True while owned by this side.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl HwMutex for SimHwMutex {
    fn try_acquire(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.external.load(Ordering::SeqCst) {
            return false;
        }
        let contended = self
            .contend
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contended {
            return false;
        }
        self.held.store(true, Ordering::SeqCst);
        true
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

/// One simulated voltage rail.
///
/// The scale factor grows linearly with voltage in power mode and is constant
/// in current mode; leakage grows linearly with voltage and with the
/// temperature offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimRail {
    pub voltage_uv: u32,
    pub domain: u8,
    /// UFXP20.12 scale factor per volt (power mode)
    pub scale_per_volt: u32,
    /// UFXP20.12 scale factor (current mode)
    pub scale_current: u32,
    /// Leakage in mW (or mA) per volt
    pub leakage_per_volt: u32,
}

impl SimRail {
    pub fn logic(voltage_uv: u32) -> Self {
        Self {
            voltage_uv,
            domain: DOMAIN_TAG_LOGIC,
            scale_per_volt: 40 << 12,
            scale_current: 30 << 12,
            leakage_per_volt: 1000,
        }
    }
}

/// Rail provider backed by a table of [`SimRail`].
#[derive(Default)]
pub struct SimRails {
    rails: Mutex<HashMap<u8, SimRail>>,
}

impl SimRails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, rail: u8, config: SimRail) {
        self.rails.lock().insert(rail, config);
    }

    pub fn set_voltage(&self, rail: u8, voltage_uv: u32) {
        if let Some(r) = self.rails.lock().get_mut(&rail) {
            r.voltage_uv = voltage_uv;
        }
    }

    fn get(&self, rail: u8) -> Result<SimRail> {
        self.rails
            .lock()
            .get(&rail)
            .copied()
            .ok_or_else(|| PwrError::InvalidArgument(format!("unknown rail {}", rail)))
    }
}

impl RailProvider for SimRails {
    fn voltage_uv(&self, rail: u8) -> Result<u32> {
        Ok(self.get(rail)?.voltage_uv)
    }

    fn domain(&self, rail: u8) -> Result<u8> {
        Ok(self.get(rail)?.domain)
    }

    fn scale_factor(&self, rail: u8, voltage_uv: u32, current_mode: bool) -> Result<u32> {
        let r = self.get(rail)?;
        if current_mode {
            return Ok(r.scale_current);
        }
        Ok(fxp::saturate_u32(fxp::div_round_u64(
            r.scale_per_volt as u64 * voltage_uv as u64,
            1_000_000,
        )))
    }

    fn leakage(
        &self,
        rail: u8,
        voltage_uv: u32,
        _current_mode: bool,
        temperature_offset: i32,
    ) -> Result<u32> {
        let r = self.get(rail)?;
        let base = r.leakage_per_volt as i64 * voltage_uv as i64 / 1_000_000;
        // One percent per degree of offset
        let adjusted = base + base * temperature_offset as i64 / (256 * 100);
        Ok(fxp::saturate_i64_to_u32(UFXP20_12.from_int(adjusted)))
    }
}

/// Chip-config provider with fixed instance counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimChip {
    pub counts: InstanceCounts,
}

impl ChipConfig for SimChip {
    fn instance_counts(&self) -> InstanceCounts {
        self.counts
    }
}

/// A complete simulated board: one I2C port, the MMIO window, rails and
/// chip config.
pub struct SimBoard {
    pub i2c: SimI2c,
    pub regs: Arc<SimRegisters>,
    pub rails: Arc<SimRails>,
    pub mutex: Arc<SimHwMutex>,
    pub chip: SimChip,
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            i2c: SimI2c::new(),
            regs: Arc::new(SimRegisters::new()),
            rails: Arc::new(SimRails::new()),
            mutex: Arc::new(SimHwMutex::new()),
            chip: SimChip::default(),
        }
    }

    /// Spawn the bus task over the board's I2C port and build a context
    /// around it. Must be called from within a tokio runtime.
    pub fn spawn_context(
        &self,
        config: BusConfig,
        shutdown: CancellationToken,
    ) -> (PwrContext, JoinHandle<()>) {
        let (tx, handle) = BusTask::spawn(
            vec![Box::new(self.i2c.clone())],
            config.queue_depth,
            shutdown,
        );
        let ctx = PwrContext::new(
            BusClient::new(tx, self.mutex.clone(), config),
            self.regs.clone(),
            self.rails.clone(),
            Arc::new(self.chip),
        );
        (ctx, handle)
    }

    /// Context with test bus settings; the bus task runs until the runtime
    /// stops.
    pub fn context(&self) -> PwrContext {
        self.spawn_context(BusConfig::fast(), CancellationToken::new()).0
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_file_pads_short_registers() {
        let mut bus = SimI2c::new();
        bus.write(0x40, &[0x02, 0xAB]).await.unwrap();
        let mut buf = [0xFFu8; 3];
        bus.write_read(0x40, &[0x02], &mut buf).await.unwrap();
        assert_eq!(buf, [0xAB, 0, 0]);
    }

    #[tokio::test]
    async fn removed_device_nacks() {
        let mut bus = SimI2c::new();
        bus.remove_device(0x41);
        let err = bus.write(0x41, &[0x00, 0x01]).await.unwrap_err();
        assert!(matches!(err, hw_trait::HwError::I2c(I2cError::Nack)));
    }

    #[test]
    fn rail_scale_factor_tracks_voltage() {
        let rails = SimRails::new();
        rails.insert(0, SimRail::logic(1_000_000));
        assert_eq!(rails.scale_factor(0, 1_000_000, false).unwrap(), 40 << 12);
        assert_eq!(rails.scale_factor(0, 500_000, false).unwrap(), 20 << 12);
        assert_eq!(rails.scale_factor(0, 500_000, true).unwrap(), 30 << 12);
        assert_eq!(rails.leakage(0, 1_000_000, false, 0).unwrap(), 1000 << 12);
    }
}
