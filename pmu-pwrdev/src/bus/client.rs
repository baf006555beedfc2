//! Register read/write client for bus-attached devices.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::{
    task::{BusOp, BusRequest},
    I2cDevice, RegWidth,
};
use crate::{
    config::BusConfig,
    error::{BusStatus, PwrError, Result},
    hw_trait::HwMutex,
    tracing::prelude::*,
};

/// Handle for issuing indexed register transfers through the bus task.
///
/// Every transfer first takes the hardware mutex shared with the other
/// processor, retrying up to the device's `retry_count`, and releases it when
/// the transfer completes or fails. Exhausting the retries reports
/// [`PwrError::BusBusy`] rather than waiting indefinitely.
#[derive(Clone)]
pub struct BusClient {
    queue: mpsc::Sender<BusRequest>,
    mutex: Arc<dyn HwMutex>,
    config: BusConfig,
}

impl BusClient {
    pub fn new(
        queue: mpsc::Sender<BusRequest>,
        mutex: Arc<dyn HwMutex>,
        config: BusConfig,
    ) -> Self {
        Self {
            queue,
            mutex,
            config,
        }
    }

    pub async fn read_reg8(&self, dev: &I2cDevice, index: u8) -> Result<u8> {
        Ok(self.read(dev, index, RegWidth::U8).await? as u8)
    }

    pub async fn read_reg16(&self, dev: &I2cDevice, index: u8) -> Result<u16> {
        Ok(self.read(dev, index, RegWidth::U16).await? as u16)
    }

    pub async fn read_reg32(&self, dev: &I2cDevice, index: u8) -> Result<u32> {
        self.read(dev, index, RegWidth::U32).await
    }

    pub async fn write_reg8(&self, dev: &I2cDevice, index: u8, value: u8) -> Result<()> {
        self.write(dev, index, RegWidth::U8, value as u32).await
    }

    pub async fn write_reg16(&self, dev: &I2cDevice, index: u8, value: u16) -> Result<()> {
        self.write(dev, index, RegWidth::U16, value as u32).await
    }

    pub async fn write_reg32(&self, dev: &I2cDevice, index: u8, value: u32) -> Result<()> {
        self.write(dev, index, RegWidth::U32, value).await
    }

    async fn read(&self, dev: &I2cDevice, index: u8, width: RegWidth) -> Result<u32> {
        let op = BusOp::Read {
            len: dev.wire_len(width),
        };
        let wire = self.transact(dev, index, op).await?;
        dev.decode(width, &wire)
    }

    async fn write(&self, dev: &I2cDevice, index: u8, width: RegWidth, value: u32) -> Result<()> {
        let payload = dev.encode(width, value)?;
        self.transact(dev, index, BusOp::Write { payload }).await?;
        Ok(())
    }

    /// Run one transfer under the hardware mutex.
    async fn transact(&self, dev: &I2cDevice, index: u8, op: BusOp) -> Result<Vec<u8>> {
        self.acquire(dev).await?;
        let result = self.post(dev, index, op).await;
        self.mutex.release();
        result
    }

    async fn acquire(&self, dev: &I2cDevice) -> Result<()> {
        let attempts = dev.retry_count as u32 + 1;
        for attempt in 1..=attempts {
            if self.mutex.try_acquire() {
                if attempt > 1 {
                    trace!(attempt, "Bus mutex acquired after retry");
                }
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.mutex_retry_delay()).await;
            }
        }

        debug!(
            address = format!("{:#04x}", dev.address),
            attempts, "Bus mutex contention, giving up"
        );
        Err(PwrError::BusBusy { attempts })
    }

    async fn post(&self, dev: &I2cDevice, index: u8, op: BusOp) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        let request = BusRequest {
            address: dev.address,
            port: dev.port,
            index,
            op,
            reply,
        };

        self.queue
            .send(request)
            .await
            .map_err(|_| PwrError::Bus(BusStatus::Other("bus task not running".into())))?;

        match tokio::time::timeout(self.config.transaction_timeout(), rx).await {
            Err(_) => {
                warn!(
                    address = format!("{:#04x}", dev.address),
                    index = format!("{:#04x}", index),
                    "Bus transaction timed out"
                );
                Err(PwrError::BusTimeout)
            }
            Ok(Err(_)) => Err(PwrError::Bus(BusStatus::Other(
                "bus task dropped request".into(),
            ))),
            Ok(Ok(reply)) => reply.map_err(PwrError::Bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::task::BusTask;
    use crate::hw_trait::{self, I2c, I2cError, RegisterIo, RegisterMutex};
    use crate::sim::{SimHwMutex, SimI2c, SimRegisters};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    const MUTEX_REG: u32 = 0x0010_0000;
    const TOKEN: u32 = 0x17;

    /// Bus that samples the mutex register as each transfer runs.
    struct MutexSamplingI2c {
        inner: SimI2c,
        regs: Arc<SimRegisters>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl MutexSamplingI2c {
        async fn sample(&self) {
            // Let the other requester run its release, if it is going to
            tokio::task::yield_now().await;
            self.seen.lock().push(self.regs.read(MUTEX_REG));
        }
    }

    #[async_trait]
    impl I2c for MutexSamplingI2c {
        async fn write(&mut self, addr: u8, data: &[u8]) -> hw_trait::Result<()> {
            self.sample().await;
            self.inner.write(addr, data).await
        }

        async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> hw_trait::Result<()> {
            self.sample().await;
            self.inner.read(addr, buffer).await
        }

        async fn write_read(
            &mut self,
            addr: u8,
            write: &[u8],
            read: &mut [u8],
        ) -> hw_trait::Result<()> {
            self.sample().await;
            self.inner.write_read(addr, write, read).await
        }
    }

    async fn burst(client: BusClient, index: u8) {
        let dev = I2cDevice::big_endian(0x40, 0);
        for value in 0..8u16 {
            client.write_reg16(&dev, index, value).await.unwrap();
            assert_eq!(client.read_reg16(&dev, index).await.unwrap(), value);
        }
    }

    fn client_with(bus: SimI2c, mutex: Arc<SimHwMutex>) -> BusClient {
        let (tx, _handle) = BusTask::spawn(vec![Box::new(bus)], 8, CancellationToken::new());
        BusClient::new(tx, mutex, BusConfig::fast())
    }

    #[tokio::test]
    async fn register_round_trip_in_device_byte_order() {
        let bus = SimI2c::new();
        let mutex = Arc::new(SimHwMutex::new());
        let client = client_with(bus.clone(), mutex.clone());
        let dev = I2cDevice::big_endian(0x40, 0);

        client.write_reg16(&dev, 0x05, 0xA1B2).await.unwrap();
        assert_eq!(bus.register(0x40, 0x05), vec![0xA1, 0xB2]);
        assert_eq!(client.read_reg16(&dev, 0x05).await.unwrap(), 0xA1B2);

        let block = I2cDevice::little_endian_block(0x2C, 0);
        client.write_reg32(&block, 0x10, 0x0102_0304).await.unwrap();
        assert_eq!(bus.register(0x2C, 0x10), vec![4, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(client.read_reg32(&block, 0x10).await.unwrap(), 0x0102_0304);

        // Mutex released after every transfer
        assert!(!mutex.is_held());
    }

    #[tokio::test]
    async fn concurrent_transfers_never_see_register_mutex_idle() {
        let regs = Arc::new(SimRegisters::new());
        regs.latch_when_idle(MUTEX_REG, RegisterMutex::IDLE);
        let mutex = Arc::new(RegisterMutex::new(regs.clone(), MUTEX_REG, TOKEN));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = MutexSamplingI2c {
            inner: SimI2c::new(),
            regs: regs.clone(),
            seen: seen.clone(),
        };
        let (tx, _handle) = BusTask::spawn(vec![Box::new(bus)], 8, CancellationToken::new());
        let client = BusClient::new(tx, mutex.clone(), BusConfig::fast());

        tokio::join!(burst(client.clone(), 0x01), burst(client.clone(), 0x02));

        let seen = seen.lock();
        assert_eq!(seen.len(), 32);
        assert!(seen.iter().all(|&v| v == TOKEN), "mutex samples {:?}", *seen);
        assert_eq!(mutex.holders(), 0);
        assert_eq!(regs.read(MUTEX_REG), RegisterMutex::IDLE);
    }

    #[tokio::test]
    async fn contention_exhausts_retries_as_busy() {
        let bus = SimI2c::new();
        let mutex = Arc::new(SimHwMutex::new());
        mutex.hold_externally(true);
        let client = client_with(bus.clone(), mutex.clone());
        let mut dev = I2cDevice::big_endian(0x40, 0);
        dev.retry_count = 2;

        let err = client.read_reg8(&dev, 0x00).await.unwrap_err();
        assert_eq!(err, PwrError::BusBusy { attempts: 3 });
        assert_eq!(mutex.attempts(), 3);
        // Nothing reached the bus
        assert!(bus.write_log().is_empty());
    }

    #[tokio::test]
    async fn mutex_acquired_once_contender_lets_go() {
        let bus = SimI2c::new();
        let mutex = Arc::new(SimHwMutex::new());
        mutex.contend_for(2);
        let client = client_with(bus, mutex.clone());
        let dev = I2cDevice::big_endian(0x40, 0);

        client.write_reg8(&dev, 0x01, 0x7F).await.unwrap();
        assert_eq!(mutex.attempts(), 3);
    }

    #[tokio::test]
    async fn bus_status_passes_through_and_releases_mutex() {
        let bus = SimI2c::new();
        bus.fail_next(I2cError::ClockStretchTimeout);
        let mutex = Arc::new(SimHwMutex::new());
        let client = client_with(bus, mutex.clone());
        let dev = I2cDevice::big_endian(0x40, 0);

        let err = client.read_reg16(&dev, 0x02).await.unwrap_err();
        assert_eq!(err, PwrError::Bus(BusStatus::ClockStretchTimeout));
        assert!(!mutex.is_held());
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        // Keep the receiver alive but never service it
        let (tx, _rx) = mpsc::channel(1);
        let mutex = Arc::new(SimHwMutex::new());
        let client = BusClient::new(tx, mutex.clone(), BusConfig::fast());
        let dev = I2cDevice::big_endian(0x40, 0);

        let err = client.read_reg16(&dev, 0x02).await.unwrap_err();
        assert_eq!(err, PwrError::BusTimeout);
        assert!(!mutex.is_held());
    }
}
