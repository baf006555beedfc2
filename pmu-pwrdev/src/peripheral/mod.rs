//! Bus-attached sensor and limiter drivers.
//!
//! Current/power monitors (INA219, INA3221) and the programmable current-limit
//! controller (NCT3933U). All drivers reach their chip through the
//! [`BusClient`](crate::bus::BusClient) in the operation's context.

pub mod ina219;
pub mod ina3221;
pub mod nct3933u;
