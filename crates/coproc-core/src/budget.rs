//! Per-engine token budget allocation with soft enforcement and burst borrowing.
//!
//! The total budget is split in two:
//!
//! - **Effective budget** (`total × (100 − headroom%) / 100`), divided among
//!   engines by percentage at registration.
//! - **Headroom pool** (`total × headroom% / 100`), reachable only by engines
//!   in burst mode.
//!
//! Spending never fails. An engine may go past its allocation; while burst
//! mode is on, the part of a spend beyond the allocation is charged to the
//! headroom pool (as far as the pool reaches) and remembered per engine so
//! `reset` can refund it exactly. The exceeded callback fires once per
//! transition into negative remaining and is re-armed by `reset`.

use std::collections::HashMap;

use coproc_types::budget::BudgetStatus;
use coproc_types::config::KernelConfig;
use coproc_types::error::BudgetError;

/// Callback invoked when an engine first goes over its budget.
pub type ExceededCallback = Box<dyn FnMut(&BudgetStatus) + Send>;

#[derive(Debug, Clone)]
struct EngineBudget {
    percentage: u8,
    allocation: u64,
    spent: u64,
    burst_active: bool,
    burst_spent: u64,
    exceeded_notified: bool,
}

impl EngineBudget {
    fn remaining(&self) -> i64 {
        let ceiling = self.allocation.saturating_add(self.burst_spent);
        i64::try_from(ceiling).unwrap_or(i64::MAX) - i64::try_from(self.spent).unwrap_or(i64::MAX)
    }
}

/// Percentage-based token budget manager.
pub struct BudgetManager {
    total_budget: u64,
    headroom_percent: u8,
    effective_budget: u64,
    headroom_pool: u64,
    headroom_spent: u64,
    engines: HashMap<String, EngineBudget>,
    on_exceeded: Vec<ExceededCallback>,
}

impl BudgetManager {
    /// Create a manager. `headroom_percent` is clamped to 100.
    pub fn new(total_budget: u64, headroom_percent: u8) -> Self {
        let headroom_percent = headroom_percent.min(100);
        Self {
            total_budget,
            headroom_percent,
            effective_budget: percent_of(total_budget, 100 - headroom_percent),
            headroom_pool: percent_of(total_budget, headroom_percent),
            headroom_spent: 0,
            engines: HashMap::new(),
            on_exceeded: Vec::new(),
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.total_budget, config.headroom_percent)
    }

    /// Register an engine with `percentage` of the effective budget.
    pub fn register_engine(
        &mut self,
        name: impl Into<String>,
        percentage: u8,
    ) -> Result<u64, BudgetError> {
        let name = name.into();
        if percentage > 100 {
            return Err(BudgetError::InvalidPercentage(percentage));
        }
        if self.engines.contains_key(&name) {
            return Err(BudgetError::DuplicateEngine(name));
        }
        let total = self.allocated_percentage() + u32::from(percentage);
        if total > 100 {
            return Err(BudgetError::OverAllocated {
                engine: name,
                total,
            });
        }

        let allocation = percent_of(self.effective_budget, percentage);
        tracing::debug!(engine = %name, percentage, allocation, "engine registered");
        self.engines.insert(
            name,
            EngineBudget {
                percentage,
                allocation,
                spent: 0,
                burst_active: false,
                burst_spent: 0,
                exceeded_notified: false,
            },
        );
        Ok(allocation)
    }

    /// Remove an engine, refunding whatever it borrowed from headroom.
    pub fn unregister_engine(&mut self, name: &str) -> Result<BudgetStatus, BudgetError> {
        let status = self.status(name)?;
        if let Some(engine) = self.engines.remove(name) {
            self.headroom_spent = self.headroom_spent.saturating_sub(engine.burst_spent);
        }
        Ok(status)
    }

    /// Record `tokens` spent by an engine. Always succeeds for a known engine.
    pub fn spend(&mut self, name: &str, tokens: u64) -> Result<BudgetStatus, BudgetError> {
        let available = self.headroom_pool - self.headroom_spent;
        let engine = self
            .engines
            .get_mut(name)
            .ok_or_else(|| BudgetError::UnknownEngine(name.to_string()))?;

        let over_before = engine.spent.saturating_sub(engine.allocation);
        engine.spent = engine.spent.saturating_add(tokens);

        if engine.burst_active {
            let over_after = engine.spent.saturating_sub(engine.allocation);
            let charge = (over_after - over_before).min(available);
            engine.burst_spent += charge;
            self.headroom_spent += charge;
        }

        let exceeded = engine.remaining() < 0;
        let newly_exceeded = exceeded && !engine.exceeded_notified;
        if newly_exceeded {
            engine.exceeded_notified = true;
        }

        let status = snapshot(name, engine);
        if newly_exceeded {
            tracing::warn!(
                engine = name,
                spent = status.spent,
                allocation = status.allocation,
                burst_spent = status.burst_spent,
                "engine exceeded its token budget"
            );
            for callback in self.on_exceeded.iter_mut() {
                callback(&status);
            }
        }
        Ok(status)
    }

    /// Register a callback fired once per transition into overspend.
    ///
    /// Callbacks run inside `spend`, so whoever holds the manager's lock
    /// still holds it. A callback must not lock a shared manager it was
    /// registered on; hand the status off (a channel, the message bus)
    /// instead.
    pub fn on_exceeded(&mut self, callback: impl FnMut(&BudgetStatus) + Send + 'static) {
        self.on_exceeded.push(Box::new(callback));
    }

    /// Allow an engine to borrow from the headroom pool.
    pub fn enable_burst(&mut self, name: &str) -> Result<(), BudgetError> {
        self.engine_mut(name)?.burst_active = true;
        tracing::debug!(engine = name, "burst mode enabled");
        Ok(())
    }

    /// Stop further borrowing. Already borrowed tokens stay charged until `reset`.
    pub fn disable_burst(&mut self, name: &str) -> Result<(), BudgetError> {
        self.engine_mut(name)?.burst_active = false;
        Ok(())
    }

    /// Zero an engine's usage, refund its burst borrowing and re-arm the callback.
    pub fn reset(&mut self, name: &str) -> Result<(), BudgetError> {
        let engine = self
            .engines
            .get_mut(name)
            .ok_or_else(|| BudgetError::UnknownEngine(name.to_string()))?;
        self.headroom_spent = self.headroom_spent.saturating_sub(engine.burst_spent);
        engine.spent = 0;
        engine.burst_spent = 0;
        engine.burst_active = false;
        engine.exceeded_notified = false;
        tracing::debug!(engine = name, "engine budget reset");
        Ok(())
    }

    /// Reset every engine. The headroom pool is fully restored.
    pub fn reset_all(&mut self) {
        for engine in self.engines.values_mut() {
            engine.spent = 0;
            engine.burst_spent = 0;
            engine.burst_active = false;
            engine.exceeded_notified = false;
        }
        self.headroom_spent = 0;
    }

    pub fn status(&self, name: &str) -> Result<BudgetStatus, BudgetError> {
        self.engines
            .get(name)
            .map(|engine| snapshot(name, engine))
            .ok_or_else(|| BudgetError::UnknownEngine(name.to_string()))
    }

    /// Snapshots of all engines, sorted by name.
    pub fn statuses(&self) -> Vec<BudgetStatus> {
        let mut all: Vec<BudgetStatus> = self
            .engines
            .iter()
            .map(|(name, engine)| snapshot(name, engine))
            .collect();
        all.sort_by(|a, b| a.engine.cmp(&b.engine));
        all
    }

    pub fn allocation(&self, name: &str) -> Result<u64, BudgetError> {
        Ok(self.status(name)?.allocation)
    }

    pub fn remaining(&self, name: &str) -> Result<i64, BudgetError> {
        Ok(self.status(name)?.remaining)
    }

    pub fn is_exceeded(&self, name: &str) -> Result<bool, BudgetError> {
        Ok(self.status(name)?.exceeded)
    }

    /// Headroom still available for burst borrowing.
    pub fn headroom(&self) -> u64 {
        self.headroom_pool - self.headroom_spent
    }

    pub fn headroom_pool(&self) -> u64 {
        self.headroom_pool
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn effective_budget(&self) -> u64 {
        self.effective_budget
    }

    pub fn headroom_percent(&self) -> u8 {
        self.headroom_percent
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    fn allocated_percentage(&self) -> u32 {
        self.engines.values().map(|e| u32::from(e.percentage)).sum()
    }

    fn engine_mut(&mut self, name: &str) -> Result<&mut EngineBudget, BudgetError> {
        self.engines
            .get_mut(name)
            .ok_or_else(|| BudgetError::UnknownEngine(name.to_string()))
    }
}

/// `floor(amount × percent / 100)` without intermediate overflow.
fn percent_of(amount: u64, percent: u8) -> u64 {
    let share = u128::from(amount) * u128::from(percent.min(100)) / 100;
    u64::try_from(share).unwrap_or(u64::MAX)
}

fn snapshot(name: &str, engine: &EngineBudget) -> BudgetStatus {
    let remaining = engine.remaining();
    BudgetStatus {
        engine: name.to_string(),
        percentage: engine.percentage,
        allocation: engine.allocation,
        spent: engine.spent,
        remaining,
        exceeded: remaining < 0,
        burst_active: engine.burst_active,
        burst_spent: engine.burst_spent,
    }
}

impl std::fmt::Debug for BudgetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetManager")
            .field("total_budget", &self.total_budget)
            .field("headroom_pool", &self.headroom_pool)
            .field("headroom_spent", &self.headroom_spent)
            .field("engines", &self.engines.len())
            .field("callbacks", &self.on_exceeded.len())
            .finish()
    }
}
