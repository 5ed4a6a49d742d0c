use async_trait::async_trait;

use crate::{Bar, Result, Signal};

/// Abstraction over market data retrieval.
///
/// Poll-on-demand semantics are sufficient: the orchestrator calls
/// `historical` once per symbol while priming and `latest` once per tick.
/// `SyntheticFeed` in `crates/paper` implements this for simulation.
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Fetch up to `lookback` historical bars, oldest first. A feed may
    /// under-deliver; the orchestrator starts with whatever arrives.
    async fn historical(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>>;

    /// The most recent bar, if one is available yet.
    async fn latest(&self, symbol: &str) -> Result<Option<Bar>>;
}

/// Abstraction over order placement.
///
/// Only the orchestrator holds a `dyn Broker`; every dispatch has already
/// passed the capital ledger's admission checks. A `false` or error return
/// is logged and never retried by the core.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn execute(&self, symbol: &str, signal: &Signal) -> Result<bool>;
}
