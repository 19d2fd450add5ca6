//! Budget snapshot types.

use serde::{Deserialize, Serialize};

/// Point-in-time view of one engine's budget.
///
/// `spent` may exceed `allocation`: enforcement is soft. While burst mode
/// is active, overspend is absorbed by the shared headroom pool and tracked
/// in `burst_spent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub engine: String,
    /// Percentage of the effective budget assigned at registration.
    pub percentage: u8,
    pub allocation: u64,
    pub spent: u64,
    /// `allocation + burst_spent - spent`; negative once exceeded.
    pub remaining: i64,
    pub exceeded: bool,
    pub burst_active: bool,
    pub burst_spent: u64,
}

impl BudgetStatus {
    /// Spent tokens as a percentage of the allocation (0.0 to 100.0+).
    pub fn utilization(&self) -> f64 {
        if self.allocation == 0 {
            return if self.spent == 0 { 0.0 } else { 100.0 };
        }
        self.spent as f64 / self.allocation as f64 * 100.0
    }
}
