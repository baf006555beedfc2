//! Hardware mutex shared with the independent on-board processor.
//!
//! The I2C bus is also driven by a second processor. Before each transaction
//! the bus client must own the hardware mutex; the mutex register holds the
//! token of its current owner, or [`RegisterMutex::IDLE`] when free.

use std::sync::Arc;

use parking_lot::Mutex;

use super::RegisterIo;

/// Non-blocking hardware mutex.
pub trait HwMutex: Send + Sync {
    /// Try once to take the mutex. Returns true if now owned by us.
    fn try_acquire(&self) -> bool;

    /// Give the mutex back. A no-op if not owned by us.
    fn release(&self);
}

/// Mutex implemented by an owner-token register.
///
/// Acquisition writes our token and reads it back: hardware only latches the
/// write when the register is idle, so a read-back of our own token means we
/// own it.
///
/// Local callers share the one token, so ownership is counted: the register
/// is taken by the first local holder and returned to idle only when the
/// last one releases.
pub struct RegisterMutex {
    regs: Arc<dyn RegisterIo>,
    addr: u32,
    token: u32,
    holders: Mutex<u32>,
}

impl RegisterMutex {
    /// Register value when no processor owns the mutex.
    pub const IDLE: u32 = 0;

    pub fn new(regs: Arc<dyn RegisterIo>, addr: u32, token: u32) -> Self {
        debug_assert_ne!(token, Self::IDLE);
        Self {
            regs,
            addr,
            token,
            holders: Mutex::new(0),
        }
    }

    /// Local holders currently sharing the hardware ownership.
    pub fn holders(&self) -> u32 {
        *self.holders.lock()
    }
}

impl HwMutex for RegisterMutex {
    fn try_acquire(&self) -> bool {
        let mut holders = self.holders.lock();
        if *holders == 0 {
            self.regs.write(self.addr, self.token);
            if self.regs.read(self.addr) != self.token {
                return false;
            }
        }
        *holders += 1;
        true
    }

    fn release(&self) {
        let mut holders = self.holders.lock();
        match *holders {
            0 => {}
            1 => {
                *holders = 0;
                self.regs.write(self.addr, Self::IDLE);
            }
            n => *holders = n - 1,
        }
    }
}
