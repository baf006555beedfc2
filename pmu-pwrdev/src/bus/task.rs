//! Bus-owning task.
//!
//! One actor owns every physical I2C port and executes requests posted on its
//! queue one at a time, replying over a oneshot channel. Requests carry
//! already-encoded wire bytes; the task does not interpret payloads.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::BusStatus,
    hw_trait::{HwError, I2c},
    tracing::prelude::*,
};

/// Transfer direction of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// Read `len` wire bytes from the register.
    Read { len: usize },
    /// Write the given wire bytes to the register.
    Write { payload: Vec<u8> },
}

/// Reply to a bus request: wire bytes read (empty for writes) or the bus
/// task's failure status.
pub type BusReply = Result<Vec<u8>, BusStatus>;

/// A single indexed register transfer.
#[derive(Debug)]
pub struct BusRequest {
    pub address: u8,
    pub port: u8,
    pub index: u8,
    pub op: BusOp,
    pub reply: oneshot::Sender<BusReply>,
}

/// Actor that owns the physical bus ports.
pub struct BusTask {
    ports: Vec<Box<dyn I2c>>,
    rx: mpsc::Receiver<BusRequest>,
}

impl BusTask {
    /// Create a task servicing `rx`. `ports[n]` drives bus port `n`.
    pub fn new(ports: Vec<Box<dyn I2c>>, rx: mpsc::Receiver<BusRequest>) -> Self {
        Self { ports, rx }
    }

    /// Spawn the task on the runtime; it runs until `shutdown` fires or every
    /// sender is dropped.
    pub fn spawn(
        ports: Vec<Box<dyn I2c>>,
        queue_depth: usize,
        shutdown: CancellationToken,
    ) -> (mpsc::Sender<BusRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let task = Self::new(ports, rx);
        let handle = tokio::spawn(task.run(shutdown));
        (tx, handle)
    }

    /// Service requests until shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!(ports = self.ports.len(), "Bus task started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Bus task shutting down");
                    break;
                }
                request = self.rx.recv() => {
                    match request {
                        Some(request) => self.handle(request).await,
                        None => {
                            debug!("Bus queue closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle(&mut self, request: BusRequest) {
        let BusRequest {
            address,
            port,
            index,
            op,
            reply,
        } = request;

        let result = match self.ports.get_mut(port as usize) {
            None => Err(BusStatus::InvalidPort(port)),
            Some(bus) => execute(bus.as_mut(), address, index, op).await,
        };

        if let Err(ref status) = result {
            debug!(
                address = format!("{:#04x}", address),
                port,
                index = format!("{:#04x}", index),
                "Bus transfer failed: {}",
                status
            );
        }

        // Requester may have timed out and gone away
        if reply.send(result).is_err() {
            trace!("Bus reply dropped, requester gone");
        }
    }
}

async fn execute(bus: &mut dyn I2c, address: u8, index: u8, op: BusOp) -> BusReply {
    match op {
        BusOp::Read { len } => {
            let mut buf = vec![0u8; len];
            bus.write_read(address, &[index], &mut buf)
                .await
                .map_err(status_from)?;
            trace!(
                "I2C read {:#04x}[{:#04x}] -> {:02x?}",
                address, index, buf
            );
            Ok(buf)
        }
        BusOp::Write { payload } => {
            let mut data = Vec::with_capacity(payload.len() + 1);
            data.push(index);
            data.extend_from_slice(&payload);
            bus.write(address, &data).await.map_err(status_from)?;
            trace!(
                "I2C write {:#04x}[{:#04x}] <- {:02x?}",
                address, index, payload
            );
            Ok(Vec::new())
        }
    }
}

fn status_from(e: HwError) -> BusStatus {
    match e {
        HwError::I2c(e) => e.into(),
        HwError::Timeout => BusStatus::ClockStretchTimeout,
        other => BusStatus::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::I2cError;
    use crate::sim::SimI2c;

    async fn request(tx: &mpsc::Sender<BusRequest>, port: u8, op: BusOp) -> BusReply {
        let (reply, rx) = oneshot::channel();
        tx.send(BusRequest {
            address: 0x40,
            port,
            index: 0x05,
            op,
            reply,
        })
        .await
        .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_port() {
        let bus = SimI2c::new();
        let shutdown = CancellationToken::new();
        let (tx, handle) = BusTask::spawn(vec![Box::new(bus.clone())], 4, shutdown.clone());

        let written = request(&tx, 0, BusOp::Write { payload: vec![0x12, 0x34] }).await;
        assert_eq!(written, Ok(vec![]));
        assert_eq!(bus.register(0x40, 0x05), vec![0x12, 0x34]);

        let read = request(&tx, 0, BusOp::Read { len: 2 }).await;
        assert_eq!(read, Ok(vec![0x12, 0x34]));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_port_is_rejected() {
        let shutdown = CancellationToken::new();
        let (tx, _handle) = BusTask::spawn(vec![Box::new(SimI2c::new())], 4, shutdown);

        let reply = request(&tx, 3, BusOp::Read { len: 1 }).await;
        assert_eq!(reply, Err(BusStatus::InvalidPort(3)));
    }

    #[tokio::test]
    async fn bus_errors_pass_through() {
        let bus = SimI2c::new();
        bus.fail_next(I2cError::Nack);
        let shutdown = CancellationToken::new();
        let (tx, _handle) = BusTask::spawn(vec![Box::new(bus)], 4, shutdown);

        let reply = request(&tx, 0, BusOp::Read { len: 2 }).await;
        assert_eq!(reply, Err(BusStatus::AddressNack));
    }
}
