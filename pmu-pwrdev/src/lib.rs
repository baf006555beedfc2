//! Power sensing and limiting device layer for a GPU power-management
//! controller.
//!
//! Every power-related sensor and limiter, whether an external chip on the
//! I2C bus or an on-die estimator behind memory-mapped registers, is exposed
//! through the [`device::PowerDevice`] interface and dispatched by the
//! [`device::Registry`].

pub mod block_activity;
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod gpu_adc;
pub mod hw_trait;
pub mod peripheral;
pub mod rail;
pub mod sim;
pub mod tracing;
pub mod types;

pub use error::{PwrError, Result};
