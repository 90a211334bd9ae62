//! Context budget accounting.
//!
//! Tracks how much of the engine's fixed window is occupied and decides how
//! many of the oldest units to drop before a turn that would not fit. The
//! manager only does arithmetic; the caller applies the plan to the engine.

use tracing::{debug, warn};

/// Default divisor for the eviction margin (a quarter of capacity).
pub const DEFAULT_MARGIN_DIVISOR: usize = 4;

/// How many of the oldest resident units to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionPlan {
    pub discard: usize,
}

impl EvictionPlan {
    pub fn is_noop(&self) -> bool {
        self.discard == 0
    }
}

/// Tracks consumption of a fixed-capacity context window.
///
/// Invariant: `consumed <= capacity`.
#[derive(Debug, Clone)]
pub struct ContextBudgetManager {
    capacity: usize,
    consumed: usize,
    margin_divisor: usize,
}

impl ContextBudgetManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            consumed: 0,
            margin_divisor: DEFAULT_MARGIN_DIVISOR,
        }
    }

    /// Evict an extra `capacity / divisor` units whenever eviction is needed.
    pub fn with_margin_divisor(mut self, divisor: usize) -> Self {
        self.margin_divisor = divisor.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn available(&self) -> usize {
        self.capacity - self.consumed
    }

    /// Plan room for `units_needed` more units.
    ///
    /// No-op when they fit. Otherwise discard the overflow plus a margin so
    /// the next few turns fit too, never more than what is resident.
    pub fn reserve(&self, units_needed: usize) -> EvictionPlan {
        let projected = self.consumed.saturating_add(units_needed);
        if projected <= self.capacity {
            return EvictionPlan::default();
        }

        let overflow = projected - self.capacity;
        let margin = self.capacity / self.margin_divisor;
        let discard = overflow.saturating_add(margin).min(self.consumed);
        debug!(
            consumed = self.consumed,
            needed = units_needed,
            capacity = self.capacity,
            discard,
            "Context would overflow, planning eviction"
        );
        EvictionPlan { discard }
    }

    /// Account for units added to the engine.
    pub fn commit(&mut self, units_added: usize) {
        let total = self.consumed.saturating_add(units_added);
        if total > self.capacity {
            warn!(
                consumed = self.consumed,
                added = units_added,
                capacity = self.capacity,
                "Context budget overflow, clamping to capacity"
            );
        }
        self.consumed = total.min(self.capacity);
    }

    /// Account for units dropped from the engine.
    pub fn evict(&mut self, units: usize) {
        self.consumed = self.consumed.saturating_sub(units);
    }

    /// Take the engine's own count as the truth.
    pub fn sync(&mut self, resident: usize) {
        if resident != self.consumed {
            debug!(budget = self.consumed, resident, "Reconciling context budget with engine");
        }
        self.consumed = resident.min(self.capacity);
    }

    pub fn reset(&mut self) {
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_without_eviction() {
        let mut budget = ContextBudgetManager::new(100);
        budget.commit(60);
        assert!(budget.reserve(40).is_noop());
        assert_eq!(budget.available(), 40);
    }

    #[test]
    fn overflow_discards_excess_plus_margin() {
        let mut budget = ContextBudgetManager::new(100);
        budget.commit(90);
        // overflow 10 + margin 25
        assert_eq!(budget.reserve(20).discard, 35);
    }

    #[test]
    fn discard_is_clamped_to_consumed() {
        let mut budget = ContextBudgetManager::new(100);
        budget.commit(10);
        assert_eq!(budget.reserve(200).discard, 10);

        let empty = ContextBudgetManager::new(100);
        assert_eq!(empty.reserve(500).discard, 0);
    }

    #[test]
    fn margin_divisor_is_configurable() {
        let mut budget = ContextBudgetManager::new(100).with_margin_divisor(10);
        budget.commit(95);
        assert_eq!(budget.reserve(10).discard, 15);

        // Zero would divide by zero; treated as one.
        let budget = ContextBudgetManager::new(100).with_margin_divisor(0);
        assert_eq!(budget.margin_divisor, 1);
    }

    #[test]
    fn commit_clamps_at_capacity() {
        let mut budget = ContextBudgetManager::new(50);
        budget.commit(40);
        budget.commit(40);
        assert_eq!(budget.consumed(), 50);
    }

    #[test]
    fn evict_saturates_at_zero() {
        let mut budget = ContextBudgetManager::new(50);
        budget.commit(10);
        budget.evict(30);
        assert_eq!(budget.consumed(), 0);
    }

    #[test]
    fn reserved_commit_never_exceeds_capacity() {
        for capacity in [16usize, 100, 4096] {
            for consumed in (0..=capacity).step_by((capacity / 8).max(1)) {
                for need in [0usize, 1, capacity / 3, capacity - 1, capacity] {
                    let mut budget = ContextBudgetManager::new(capacity);
                    budget.commit(consumed);
                    let plan = budget.reserve(need);
                    assert!(plan.discard <= budget.consumed());
                    budget.evict(plan.discard);
                    assert!(budget.consumed() + need <= capacity, "{capacity}/{consumed}/{need}");
                    budget.commit(need);
                    assert!(budget.consumed() <= capacity);
                }
            }
        }
    }

    #[test]
    fn sync_and_reset() {
        let mut budget = ContextBudgetManager::new(100);
        budget.commit(30);
        budget.sync(42);
        assert_eq!(budget.consumed(), 42);
        budget.sync(1000);
        assert_eq!(budget.consumed(), 100);
        budget.reset();
        assert_eq!(budget.consumed(), 0);
    }
}
