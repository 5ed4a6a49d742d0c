use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Denial, ALLOC_EPSILON};

/// Per-strategy capital accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalEntry {
    /// Fraction of total account value granted to this strategy.
    pub allocation_pct: f64,
    /// allocation_pct × total account value.
    pub total_allocated: f64,
    /// Capital currently committed to open positions.
    pub total_spent: f64,
}

impl CapitalEntry {
    pub fn available(&self) -> f64 {
        (self.total_allocated - self.total_spent).max(0.0)
    }
}

/// Read-only view of one entry plus its ownerships, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub allocation_pct: f64,
    pub allocated: f64,
    pub spent: f64,
    pub available: f64,
    pub owned_symbols: Vec<String>,
}

/// The sole arbiter of "can this strategy trade this symbol for this amount."
///
/// Tracks per-strategy allocation and spend plus exclusive symbol ownership.
/// All admission checks pass or return a structured [`Denial`]; validation
/// completes before any mutation, so a denied call leaves no trace. The
/// ledger is a plain value — the control plane provides the locking.
#[derive(Debug, Clone)]
pub struct CapitalLedger {
    total_value: f64,
    entries: BTreeMap<String, CapitalEntry>,
    /// symbol → owning strategy id. At most one owner per symbol.
    owners: BTreeMap<String, String>,
    /// symbol → quote-currency cost basis of the owner's position.
    basis: HashMap<String, f64>,
}

impl CapitalLedger {
    pub fn new(total_value: f64) -> Self {
        Self {
            total_value,
            entries: BTreeMap::new(),
            owners: BTreeMap::new(),
            basis: HashMap::new(),
        }
    }

    // ─── Registration ─────────────────────────────────────────────────────────

    /// Grant `pct` of total capital to a new strategy.
    pub fn register(&mut self, id: &str, pct: f64) -> Result<(), Denial> {
        if self.entries.contains_key(id) {
            return Err(Denial::DuplicateStrategy { id: id.into() });
        }
        if !pct.is_finite() || pct <= 0.0 || pct > 1.0 {
            return Err(Denial::InvalidAllocation { pct });
        }
        let committed = self.allocation_sum();
        if committed + pct > 1.0 + ALLOC_EPSILON {
            return Err(Denial::AllocationExceeded {
                requested: pct,
                remaining: (1.0 - committed).max(0.0),
            });
        }

        self.entries.insert(
            id.to_string(),
            CapitalEntry {
                allocation_pct: pct,
                total_allocated: pct * self.total_value,
                total_spent: 0.0,
            },
        );
        info!(id, pct, allocated = pct * self.total_value, "Strategy registered with ledger");
        Ok(())
    }

    /// Drop a strategy's entry and transfer its symbols to unowned.
    /// Liquidation of the underlying positions belongs to the broker.
    pub fn release(&mut self, id: &str) -> Result<(), Denial> {
        if self.entries.remove(id).is_none() {
            return Err(Denial::UnknownStrategy { id: id.into() });
        }
        let freed: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == id)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in &freed {
            self.owners.remove(symbol);
            self.basis.remove(symbol);
        }
        info!(id, released_symbols = ?freed, "Strategy released from ledger");
        Ok(())
    }

    /// Re-derive every entry's allocated capital from a new account value.
    pub fn update_total_value(&mut self, value: f64) {
        self.total_value = value;
        for entry in self.entries.values_mut() {
            entry.total_allocated = entry.allocation_pct * value;
        }
        debug!(total_value = value, "Ledger total value updated");
    }

    // ─── Admission checks ─────────────────────────────────────────────────────

    /// May `id` spend `amount` on `symbol`? Denied when the symbol belongs
    /// to a different strategy or the amount exceeds available capital.
    pub fn can_buy(&self, id: &str, symbol: &str, amount: f64) -> Result<(), Denial> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Denial::UnknownStrategy { id: id.into() })?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Denial::InvalidAmount { amount });
        }
        if let Some(owner) = self.owners.get(symbol) {
            if owner != id {
                return Err(Denial::SymbolOwned {
                    symbol: symbol.into(),
                    owner: owner.clone(),
                });
            }
        }
        let available = entry.available();
        if amount > available + ALLOC_EPSILON {
            return Err(Denial::InsufficientCapital {
                id: id.into(),
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    /// May `id` exit `symbol`? Denied unless it currently owns the symbol.
    pub fn can_sell(&self, id: &str, symbol: &str) -> Result<(), Denial> {
        if !self.entries.contains_key(id) {
            return Err(Denial::UnknownStrategy { id: id.into() });
        }
        match self.owners.get(symbol) {
            Some(owner) if owner == id => Ok(()),
            _ => Err(Denial::NotOwner {
                id: id.into(),
                symbol: symbol.into(),
            }),
        }
    }

    // ─── Fill reporting ───────────────────────────────────────────────────────

    /// Commit a buy fill: re-validates admission, then adds spend and claims
    /// ownership.
    pub fn record_buy(&mut self, id: &str, symbol: &str, amount: f64) -> Result<(), Denial> {
        self.can_buy(id, symbol, amount)?;
        let entry = self.entries.get_mut(id).expect("validated above");
        entry.total_spent += amount;
        self.owners.insert(symbol.to_string(), id.to_string());
        *self.basis.entry(symbol.to_string()).or_insert(0.0) += amount;
        debug!(id, symbol, amount, spent = entry.total_spent, "Buy recorded");
        Ok(())
    }

    /// Commit a sell fill: re-validates ownership, returns spend, and
    /// releases the symbol.
    pub fn record_sell(&mut self, id: &str, symbol: &str, amount: f64) -> Result<(), Denial> {
        self.can_sell(id, symbol)?;
        let entry = self.entries.get_mut(id).expect("validated above");
        entry.total_spent = (entry.total_spent - amount).max(0.0);
        self.owners.remove(symbol);
        self.basis.remove(symbol);
        debug!(id, symbol, amount, spent = entry.total_spent, "Sell recorded");
        Ok(())
    }

    // ─── Rebalance ────────────────────────────────────────────────────────────

    /// Reassign allocation fractions. Entries absent from the map keep their
    /// current fraction; the sum invariant is validated over the union
    /// before anything is applied. A sum below 1.0 deliberately leaves the
    /// remainder as a cash reserve.
    pub fn rebalance(&mut self, allocations: &HashMap<String, f64>) -> Result<(), Denial> {
        for (id, &pct) in allocations {
            if !self.entries.contains_key(id) {
                return Err(Denial::UnknownStrategy { id: id.clone() });
            }
            if !pct.is_finite() || pct <= 0.0 || pct > 1.0 {
                return Err(Denial::InvalidAllocation { pct });
            }
        }
        let prospective: f64 = self
            .entries
            .iter()
            .map(|(id, e)| allocations.get(id).copied().unwrap_or(e.allocation_pct))
            .sum();
        if prospective > 1.0 + ALLOC_EPSILON {
            return Err(Denial::AllocationExceeded {
                requested: prospective,
                remaining: 1.0,
            });
        }

        for (id, &pct) in allocations {
            let entry = self.entries.get_mut(id).expect("validated above");
            entry.allocation_pct = pct;
            entry.total_allocated = pct * self.total_value;
        }
        info!(reallocated = allocations.len(), sum = prospective, "Ledger rebalanced");
        Ok(())
    }

    // ─── Views ────────────────────────────────────────────────────────────────

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn allocation_sum(&self) -> f64 {
        self.entries.values().map(|e| e.allocation_pct).sum()
    }

    pub fn owner_of(&self, symbol: &str) -> Option<&str> {
        self.owners.get(symbol).map(String::as_str)
    }

    pub fn cost_basis(&self, symbol: &str) -> f64 {
        self.basis.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn available(&self, id: &str) -> Option<f64> {
        self.entries.get(id).map(CapitalEntry::available)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<LedgerStatus> {
        let entry = self.entries.get(id)?;
        Some(LedgerStatus {
            allocation_pct: entry.allocation_pct,
            allocated: entry.total_allocated,
            spent: entry.total_spent,
            available: entry.available(),
            owned_symbols: self
                .owners
                .iter()
                .filter(|(_, owner)| owner.as_str() == id)
                .map(|(symbol, _)| symbol.clone())
                .collect(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CapitalLedger {
        CapitalLedger::new(10_000.0)
    }

    #[test]
    fn full_allocation_exhausts_capital_for_everyone_else() {
        let mut l = ledger();
        l.register("sma", 1.0).unwrap();

        assert!(l.can_buy("sma", "AAPL", 10_000.0).is_ok());
        assert_eq!(
            l.register("other", 0.1),
            Err(Denial::AllocationExceeded { requested: 0.1, remaining: 0.0 })
        );
        assert!(matches!(
            l.can_buy("other", "MSFT", 1.0),
            Err(Denial::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_denied() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        assert_eq!(
            l.register("sma", 0.1),
            Err(Denial::DuplicateStrategy { id: "sma".into() })
        );
        // The failed call changed nothing
        assert!((l.allocation_sum() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn invalid_allocation_bounds_are_denied() {
        let mut l = ledger();
        assert!(matches!(l.register("a", 0.0), Err(Denial::InvalidAllocation { .. })));
        assert!(matches!(l.register("a", -0.2), Err(Denial::InvalidAllocation { .. })));
        assert!(matches!(l.register("a", 1.5), Err(Denial::InvalidAllocation { .. })));
        assert!(matches!(l.register("a", f64::NAN), Err(Denial::InvalidAllocation { .. })));
    }

    #[test]
    fn buy_denied_when_symbol_owned_by_other_strategy() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("rsi", 0.5).unwrap();

        l.record_buy("sma", "AAPL", 1_000.0).unwrap();
        assert_eq!(
            l.can_buy("rsi", "AAPL", 100.0),
            Err(Denial::SymbolOwned { symbol: "AAPL".into(), owner: "sma".into() })
        );
        // The owner can keep adding to its own position
        assert!(l.can_buy("sma", "AAPL", 100.0).is_ok());
    }

    #[test]
    fn buy_denied_beyond_available_capital() {
        let mut l = ledger();
        l.register("sma", 0.3).unwrap(); // allocated 3000
        l.record_buy("sma", "AAPL", 2_500.0).unwrap();

        match l.can_buy("sma", "MSFT", 600.0) {
            Err(Denial::InsufficientCapital { available, .. }) => {
                assert!((available - 500.0).abs() < 1e-9)
            }
            other => panic!("expected InsufficientCapital, got {other:?}"),
        }
        assert!(l.can_buy("sma", "MSFT", 500.0).is_ok());
    }

    #[test]
    fn sell_requires_ownership() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("rsi", 0.5).unwrap();
        l.record_buy("sma", "AAPL", 1_000.0).unwrap();

        assert!(matches!(
            l.can_sell("rsi", "AAPL"),
            Err(Denial::NotOwner { .. })
        ));
        assert!(l.can_sell("sma", "AAPL").is_ok());
    }

    #[test]
    fn sell_returns_spend_and_releases_ownership() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.record_buy("sma", "AAPL", 2_000.0).unwrap();
        assert_eq!(l.owner_of("AAPL"), Some("sma"));
        assert!((l.cost_basis("AAPL") - 2_000.0).abs() < 1e-9);

        l.record_sell("sma", "AAPL", 2_000.0).unwrap();
        assert_eq!(l.owner_of("AAPL"), None);
        assert!((l.available("sma").unwrap() - 5_000.0).abs() < 1e-9);
        assert_eq!(l.cost_basis("AAPL"), 0.0);
    }

    #[test]
    fn release_frees_symbols_for_other_strategies() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("rsi", 0.5).unwrap();
        l.record_buy("sma", "AAPL", 1_000.0).unwrap();

        l.release("sma").unwrap();
        assert!(!l.contains("sma"));
        assert_eq!(l.owner_of("AAPL"), None);
        assert!(l.can_buy("rsi", "AAPL", 1_000.0).is_ok());
    }

    #[test]
    fn rebalance_rederives_allocated_keeping_spend() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("btc", 0.3).unwrap();
        l.record_buy("sma", "AAPL", 2_000.0).unwrap();

        let mut m = HashMap::new();
        m.insert("sma".to_string(), 0.6);
        m.insert("btc".to_string(), 0.4);
        l.rebalance(&m).unwrap();

        // available = total_value × new_pct − spent
        assert!((l.available("sma").unwrap() - (10_000.0 * 0.6 - 2_000.0)).abs() < 1e-9);
        assert!((l.available("btc").unwrap() - 4_000.0).abs() < 1e-9);
        assert!((l.allocation_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_may_under_allocate_on_purpose() {
        let mut l = ledger();
        l.register("sma", 0.6).unwrap();
        l.register("btc", 0.4).unwrap();

        let mut m = HashMap::new();
        m.insert("sma".to_string(), 0.2);
        m.insert("btc".to_string(), 0.3);
        l.rebalance(&m).unwrap();

        // Remainder is held as cash, not an error
        assert!((l.allocation_sum() - 0.5).abs() < 1e-9);
        assert!((l.available("sma").unwrap() - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_rejects_overcommit_and_unknown_ids_before_mutating() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("btc", 0.4).unwrap();

        let mut over = HashMap::new();
        over.insert("sma".to_string(), 0.8);
        over.insert("btc".to_string(), 0.5);
        assert!(matches!(
            l.rebalance(&over),
            Err(Denial::AllocationExceeded { .. })
        ));

        let mut unknown = HashMap::new();
        unknown.insert("ghost".to_string(), 0.1);
        assert!(matches!(
            l.rebalance(&unknown),
            Err(Denial::UnknownStrategy { .. })
        ));

        // Both denials left the original fractions intact
        assert!((l.status("sma").unwrap().allocation_pct - 0.5).abs() < 1e-12);
        assert!((l.status("btc").unwrap().allocation_pct - 0.4).abs() < 1e-12);
    }

    #[test]
    fn partial_rebalance_checks_sum_over_union() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.register("btc", 0.4).unwrap();

        // btc keeps 0.4, so sma at 0.7 would push the union to 1.1
        let mut m = HashMap::new();
        m.insert("sma".to_string(), 0.7);
        assert!(matches!(
            l.rebalance(&m),
            Err(Denial::AllocationExceeded { .. })
        ));

        m.insert("sma".to_string(), 0.6);
        l.rebalance(&m).unwrap();
        assert!((l.allocation_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn update_total_value_scales_allocations() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        l.update_total_value(20_000.0);
        assert!((l.available("sma").unwrap() - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_amounts_are_denied() {
        let mut l = ledger();
        l.register("sma", 0.5).unwrap();
        assert!(matches!(
            l.can_buy("sma", "AAPL", 0.0),
            Err(Denial::InvalidAmount { .. })
        ));
        assert!(matches!(
            l.can_buy("sma", "AAPL", f64::NAN),
            Err(Denial::InvalidAmount { .. })
        ));
    }
}
