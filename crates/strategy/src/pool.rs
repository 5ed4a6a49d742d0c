use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use common::{Bar, Denial, Result, Signal, StrategyState};
use ledger::CapitalLedger;

use crate::definition::{EngineKind, EngineRegistry, StrategyDefinition};
use crate::engines::SignalEngine;

/// One deployed strategy: engine plus lifecycle bookkeeping.
pub struct StrategyRecord {
    pub id: String,
    pub symbol: String,
    pub state: StrategyState,
    /// Fraction of total capital, kept in sync with the ledger.
    pub allocation: f64,
    pub lookback: usize,
    pub kind: EngineKind,
    engine: Box<dyn SignalEngine>,
}

/// The set of deployed strategies, ordered by id.
///
/// Owns per-cycle signal generation and forwards every admission decision
/// to the [`CapitalLedger`]. The pool is a plain value: the control plane's
/// lock serializes mutations against in-flight generation.
pub struct StrategyPool {
    records: BTreeMap<String, StrategyRecord>,
    registry: EngineRegistry,
}

impl StrategyPool {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            registry: EngineRegistry::builtin(),
        }
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Deploy from a definition: classify, build the engine, register
    /// capital, insert as Active.
    pub fn deploy(
        &mut self,
        def: &StrategyDefinition,
        id: &str,
        allocation: f64,
        symbol: &str,
        ledger: &mut CapitalLedger,
    ) -> Result<()> {
        if self.records.contains_key(id) {
            return Err(Denial::DuplicateStrategy { id: id.into() }.into());
        }
        let (kind, engine) = self.registry.build(def)?;
        self.install(id, allocation, symbol, kind, engine, ledger)
    }

    /// Install a pre-built engine. `deploy` lands here; tests inject stub
    /// engines through it.
    pub fn install(
        &mut self,
        id: &str,
        allocation: f64,
        symbol: &str,
        kind: EngineKind,
        engine: Box<dyn SignalEngine>,
        ledger: &mut CapitalLedger,
    ) -> Result<()> {
        if self.records.contains_key(id) {
            return Err(Denial::DuplicateStrategy { id: id.into() }.into());
        }
        ledger.register(id, allocation)?;
        let lookback = engine.lookback();
        self.records.insert(
            id.to_string(),
            StrategyRecord {
                id: id.to_string(),
                symbol: symbol.to_string(),
                state: StrategyState::Active,
                allocation,
                lookback,
                kind,
                engine,
            },
        );
        info!(id, symbol, allocation, lookback, engine = %kind, "Strategy deployed");
        Ok(())
    }

    /// Exclude a strategy from signal generation. Ledger entry and
    /// ownerships are untouched.
    pub fn pause(&mut self, id: &str) -> std::result::Result<(), Denial> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Denial::UnknownStrategy { id: id.into() })?;
        record.state = StrategyState::Paused;
        info!(id, "Strategy paused");
        Ok(())
    }

    pub fn resume(&mut self, id: &str) -> std::result::Result<(), Denial> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Denial::UnknownStrategy { id: id.into() })?;
        record.state = StrategyState::Active;
        info!(id, "Strategy resumed");
        Ok(())
    }

    /// Remove a strategy and release its capital and ownerships. Closing
    /// any open positions is the broker's business, not the pool's.
    pub fn undeploy(
        &mut self,
        id: &str,
        ledger: &mut CapitalLedger,
    ) -> std::result::Result<(), Denial> {
        if !self.records.contains_key(id) {
            return Err(Denial::UnknownStrategy { id: id.into() });
        }
        ledger.release(id)?;
        let record = self.records.remove(id).expect("checked above");
        info!(id, symbol = %record.symbol, "Strategy undeployed");
        Ok(())
    }

    /// Validate every id is deployed, then delegate wholly to the ledger.
    pub fn rebalance(
        &mut self,
        allocations: &std::collections::HashMap<String, f64>,
        ledger: &mut CapitalLedger,
    ) -> std::result::Result<(), Denial> {
        for id in allocations.keys() {
            if !self.records.contains_key(id) {
                return Err(Denial::UnknownStrategy { id: id.clone() });
            }
        }
        ledger.rebalance(allocations)?;
        for (id, &pct) in allocations {
            if let Some(record) = self.records.get_mut(id) {
                record.allocation = pct;
            }
        }
        Ok(())
    }

    // ─── Signal generation ────────────────────────────────────────────────────

    /// Run every Active strategy on `symbol` over the buffer and tag each
    /// result with its strategy id. Paused strategies are never invoked.
    /// An engine failure becomes a HOLD carrying the error so one faulty
    /// strategy cannot abort the cycle for its siblings.
    pub fn generate_signals(&self, symbol: &str, bars: &[Bar]) -> Vec<Signal> {
        self.records
            .values()
            .filter(|r| r.state == StrategyState::Active && r.symbol == symbol)
            .map(|r| match r.engine.extract_signal(bars) {
                Ok(mut signal) => {
                    signal.strategy_id = r.id.clone();
                    signal
                }
                Err(e) => {
                    warn!(id = %r.id, symbol, error = %e, "Engine failed; downgrading to HOLD");
                    let price = bars.last().map(|b| b.close).unwrap_or(0.0);
                    let mut signal =
                        Signal::hold(symbol, price).with_note(format!("engine failure: {e}"));
                    signal.strategy_id = r.id.clone();
                    signal
                }
            })
            .collect()
    }

    // ─── Views ────────────────────────────────────────────────────────────────

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every symbol any deployed strategy watches (paused included, so
    /// their buffers stay warm for resume).
    pub fn symbols(&self) -> Vec<String> {
        self.records
            .values()
            .map(|r| r.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Priming depth for one symbol: max lookback across its Active
    /// strategies.
    pub fn max_lookback_for(&self, symbol: &str) -> usize {
        self.records
            .values()
            .filter(|r| r.state == StrategyState::Active && r.symbol == symbol)
            .map(|r| r.lookback)
            .max()
            .unwrap_or(0)
    }

    pub fn records(&self) -> impl Iterator<Item = &StrategyRecord> {
        self.records.values()
    }
}

impl Default for StrategyPool {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;
    use common::{Error, SignalKind};

    struct CountingEngine {
        calls: Arc<AtomicUsize>,
    }

    impl SignalEngine for CountingEngine {
        fn lookback(&self) -> usize {
            1
        }

        fn extract_signal(&self, bars: &[Bar]) -> Result<Signal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = bars.last().expect("test buffers are non-empty");
            Ok(Signal::new(&last.symbol, SignalKind::Buy, last.close, 0.9))
        }
    }

    struct FailingEngine;

    impl SignalEngine for FailingEngine {
        fn lookback(&self) -> usize {
            1
        }

        fn extract_signal(&self, _bars: &[Bar]) -> Result<Signal> {
            Err(Error::Engine("synthetic blow-up".into()))
        }
    }

    fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar::flat(symbol, c, Utc::now()))
            .collect()
    }

    fn counting(
        pool: &mut StrategyPool,
        ledger: &mut CapitalLedger,
        id: &str,
        symbol: &str,
        alloc: f64,
    ) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        pool.install(
            id,
            alloc,
            symbol,
            EngineKind::SmaCross,
            Box::new(CountingEngine { calls: calls.clone() }),
            ledger,
        )
        .unwrap();
        calls
    }

    #[test]
    fn deploy_from_definition_registers_and_activates() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        let def = StrategyDefinition::from_toml("engine = \"rsi\"\n[params]\nperiod = 5").unwrap();

        pool.deploy(&def, "rsi-1", 0.4, "AAPL", &mut ledger).unwrap();

        assert!(pool.contains("rsi-1"));
        assert!((ledger.available("rsi-1").unwrap() - 4_000.0).abs() < 1e-9);
        let record = pool.records().next().unwrap();
        assert_eq!(record.state, StrategyState::Active);
        assert_eq!(record.lookback, 6);
    }

    #[test]
    fn duplicate_deploy_is_denied_without_side_effects() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        counting(&mut pool, &mut ledger, "sma", "AAPL", 0.3);

        let def = StrategyDefinition::from_toml("engine = \"sma\"").unwrap();
        let err = pool.deploy(&def, "sma", 0.3, "MSFT", &mut ledger).unwrap_err();
        assert!(matches!(
            err,
            Error::Admission(Denial::DuplicateStrategy { .. })
        ));
        assert_eq!(pool.len(), 1);
        assert!((ledger.allocation_sum() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn failed_engine_build_leaves_no_ledger_entry() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        let def =
            StrategyDefinition::from_toml("engine = \"macd\"\n[params]\nfast = 30\nslow = 10")
                .unwrap();

        assert!(pool.deploy(&def, "bad", 0.5, "AAPL", &mut ledger).is_err());
        assert!(!pool.contains("bad"));
        assert!(!ledger.contains("bad"));
    }

    #[test]
    fn paused_strategy_engine_is_never_invoked() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        let calls = counting(&mut pool, &mut ledger, "sma", "AAPL", 0.5);

        pool.pause("sma").unwrap();
        let signals = pool.generate_signals("AAPL", &bars("AAPL", &[101.0]));
        assert!(signals.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        pool.resume("sma").unwrap();
        let signals = pool.generate_signals("AAPL", &bars("AAPL", &[102.0]));
        assert_eq!(signals.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_keeps_allocation_and_ownership() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        counting(&mut pool, &mut ledger, "sma", "AAPL", 0.5);
        ledger.record_buy("sma", "AAPL", 1_000.0).unwrap();

        pool.pause("sma").unwrap();
        pool.resume("sma").unwrap();

        let status = ledger.status("sma").unwrap();
        assert!((status.allocation_pct - 0.5).abs() < 1e-12);
        assert_eq!(status.owned_symbols, vec!["AAPL".to_string()]);
    }

    #[test]
    fn engine_failure_downgrades_to_hold_and_spares_siblings() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        pool.install(
            "broken",
            0.3,
            "AAPL",
            EngineKind::Rsi,
            Box::new(FailingEngine),
            &mut ledger,
        )
        .unwrap();
        counting(&mut pool, &mut ledger, "healthy", "AAPL", 0.3);

        let signals = pool.generate_signals("AAPL", &bars("AAPL", &[100.0]));
        assert_eq!(signals.len(), 2);

        let broken = signals.iter().find(|s| s.strategy_id == "broken").unwrap();
        assert!(broken.is_hold());
        assert!(broken.note.as_ref().unwrap().contains("synthetic blow-up"));

        let healthy = signals.iter().find(|s| s.strategy_id == "healthy").unwrap();
        assert_eq!(healthy.kind, SignalKind::Buy);
    }

    #[test]
    fn generation_is_scoped_to_the_symbol() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        let aapl_calls = counting(&mut pool, &mut ledger, "a", "AAPL", 0.3);
        let msft_calls = counting(&mut pool, &mut ledger, "m", "MSFT", 0.3);

        let signals = pool.generate_signals("AAPL", &bars("AAPL", &[100.0]));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strategy_id, "a");
        assert_eq!(aapl_calls.load(Ordering::SeqCst), 1);
        assert_eq!(msft_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn undeploy_returns_pool_to_pre_deploy_state() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        counting(&mut pool, &mut ledger, "keeper", "MSFT", 0.3);

        counting(&mut pool, &mut ledger, "sma", "AAPL", 0.3);
        ledger.record_buy("sma", "AAPL", 1_000.0).unwrap();

        pool.undeploy("sma", &mut ledger).unwrap();

        assert_eq!(pool.len(), 1);
        assert!(!pool.contains("sma"));
        assert_eq!(ledger.owner_of("AAPL"), None);
        // Freed capital is usable by a new registration
        assert!(ledger.register("next", 0.7).is_ok());
        assert!(ledger.can_buy("next", "AAPL", 100.0).is_ok());
    }

    #[test]
    fn lifecycle_commands_require_an_existing_record() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        assert!(matches!(pool.pause("ghost"), Err(Denial::UnknownStrategy { .. })));
        assert!(matches!(pool.resume("ghost"), Err(Denial::UnknownStrategy { .. })));
        assert!(matches!(
            pool.undeploy("ghost", &mut ledger),
            Err(Denial::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn rebalance_requires_every_id_in_the_pool() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        counting(&mut pool, &mut ledger, "sma", "AAPL", 0.5);

        let mut map = std::collections::HashMap::new();
        map.insert("sma".to_string(), 0.4);
        map.insert("ghost".to_string(), 0.2);
        assert!(matches!(
            pool.rebalance(&map, &mut ledger),
            Err(Denial::UnknownStrategy { .. })
        ));
        // Denied before any mutation
        assert!((ledger.status("sma").unwrap().allocation_pct - 0.5).abs() < 1e-12);

        map.remove("ghost");
        pool.rebalance(&map, &mut ledger).unwrap();
        assert!((ledger.status("sma").unwrap().allocation_pct - 0.4).abs() < 1e-12);
        assert!((pool.records().next().unwrap().allocation - 0.4).abs() < 1e-12);
    }

    #[test]
    fn symbols_and_lookbacks_reflect_active_records() {
        let mut pool = StrategyPool::new();
        let mut ledger = CapitalLedger::new(10_000.0);
        let def = StrategyDefinition::from_toml("engine = \"rsi\"\n[params]\nperiod = 20").unwrap();
        pool.deploy(&def, "deep", 0.3, "AAPL", &mut ledger).unwrap();
        counting(&mut pool, &mut ledger, "shallow", "AAPL", 0.3);

        assert_eq!(pool.symbols(), vec!["AAPL".to_string()]);
        assert_eq!(pool.max_lookback_for("AAPL"), 21);

        pool.pause("deep").unwrap();
        assert_eq!(pool.max_lookback_for("AAPL"), 1);
        // Paused strategies still keep their symbol on the watch list
        assert_eq!(pool.symbols(), vec!["AAPL".to_string()]);
    }
}
