//! Shared handles every device operation runs against.

use std::sync::Arc;

use crate::bus::BusClient;
use crate::hw_trait::RegisterIo;
use crate::rail::{ChipConfig, RailProvider};

/// Hardware and provider handles passed into device operations.
///
/// Drivers hold no handles of their own; bus devices use `bus`, on-die
/// devices use `regs`, and the estimator also queries `rails` and `chip`.
#[derive(Clone)]
pub struct PwrContext {
    pub bus: BusClient,
    pub regs: Arc<dyn RegisterIo>,
    pub rails: Arc<dyn RailProvider>,
    pub chip: Arc<dyn ChipConfig>,
}

impl PwrContext {
    pub fn new(
        bus: BusClient,
        regs: Arc<dyn RegisterIo>,
        rails: Arc<dyn RailProvider>,
        chip: Arc<dyn ChipConfig>,
    ) -> Self {
        Self {
            bus,
            regs,
            rails,
            chip,
        }
    }
}
