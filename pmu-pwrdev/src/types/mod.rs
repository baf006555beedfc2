//! Core value types shared by every power device.
//!
//! Physical units follow the controller's conventions: voltage in µV,
//! current in mA, power in mW, energy in mJ.

pub mod accumulator;
pub mod fxp;
mod limit;
mod tuple;

pub use accumulator::{Accumulator, AccumulatedTuple};
pub use limit::{Limit, LimitUnit, LIMIT_DISABLED};
pub use tuple::{Tuple, INVALID};
