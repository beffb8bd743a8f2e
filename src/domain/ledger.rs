//! Cost ledger
//!
//! Tracks the remaining build-point budget plus the named sub-budgets the
//! rules cap separately (points gained from disadvantages, points gained
//! from bad traits). Every mutation that changes a cost has an exact
//! inverse; aggregate costs are updated retract-old/apply-new so the
//! outcome never depends on update order.

/// Immutable view of all counters, for zero-sum assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub remaining: i64,
    pub disadvantage_points: i64,
    pub bad_trait_points: i64,
}

#[derive(Debug, Clone)]
pub struct CostLedger {
    starting: i64,
    remaining: i64,
    disadvantage_points: i64,
    bad_trait_points: i64,
}

impl CostLedger {
    pub fn new(starting_budget: i64) -> Self {
        Self {
            starting: starting_budget,
            remaining: starting_budget,
            disadvantage_points: 0,
            bad_trait_points: 0,
        }
    }

    pub fn starting_budget(&self) -> i64 {
        self.starting
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn spent(&self) -> i64 {
        self.starting - self.remaining
    }

    pub fn charge(&mut self, cost: i64) {
        self.remaining -= cost;
    }

    pub fn refund(&mut self, cost: i64) {
        self.remaining += cost;
    }

    /// Retract a previously charged total and charge a new one.
    pub fn replace(&mut self, old_cost: i64, new_cost: i64) {
        self.remaining += old_cost;
        self.remaining -= new_cost;
    }

    /// Points gained by taking disadvantages. `gained` may be negative when
    /// a disadvantage is removed again.
    pub fn credit_disadvantage(&mut self, gained: i64, bad_trait: bool) {
        self.remaining += gained;
        self.disadvantage_points += gained;
        if bad_trait {
            self.bad_trait_points += gained;
        }
    }

    pub fn disadvantage_points(&self) -> i64 {
        self.disadvantage_points
    }

    pub fn bad_trait_points(&self) -> i64 {
        self.bad_trait_points
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            remaining: self.remaining,
            disadvantage_points: self.disadvantage_points,
            bad_trait_points: self.bad_trait_points,
        }
    }
}
