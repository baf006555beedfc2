//! Threshold/limit records.

use serde::{Deserialize, Serialize};

use crate::error::{PwrError, Result};

/// Limit value that removes/disables a threshold.
pub const LIMIT_DISABLED: u32 = u32::MAX;

/// Physical unit of a limit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitUnit {
    /// Milliamps
    CurrentMa,
    /// Milliwatts
    PowerMw,
    /// Microvolts
    VoltageUv,
}

/// A programmed threshold: (provider, threshold index, unit, value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub provider: u8,
    pub limit_index: u8,
    pub unit: LimitUnit,
    pub value: u32,
}

impl Limit {
    pub fn is_disabled(&self) -> bool {
        self.value == LIMIT_DISABLED
    }
}

impl LimitUnit {
    /// Fail unless this unit is one of `accepted`.
    pub(crate) fn expect_one_of(self, accepted: &[LimitUnit]) -> Result<()> {
        if accepted.contains(&self) {
            Ok(())
        } else {
            Err(PwrError::InvalidArgument(format!(
                "limit unit {:?} not accepted (expected one of {:?})",
                self, accepted
            )))
        }
    }
}
