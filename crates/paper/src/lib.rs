use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, DateTime, Utc};
use tracing::{debug, info};

use common::{Bar, Broker, DataFeed, Result, Signal, SignalKind};

/// Deterministic synthetic market data.
///
/// Each symbol follows a seeded drift-plus-oscillation path, so the same
/// sequence of calls always yields the same prices. No real exchange is
/// ever contacted.
pub struct SyntheticFeed {
    /// symbol → next step index on its path.
    steps: Mutex<HashMap<String, u64>>,
    /// Fraction of requested history actually delivered; below 1.0 this
    /// simulates an under-delivering feed.
    history_fill: f64,
}

impl SyntheticFeed {
    pub fn new() -> Self {
        Self::with_history_fill(1.0)
    }

    pub fn with_history_fill(history_fill: f64) -> Self {
        Self {
            steps: Mutex::new(HashMap::new()),
            history_fill: history_fill.clamp(0.0, 1.0),
        }
    }

    /// Base price derived from the symbol name, so distinct symbols get
    /// distinct but stable paths.
    fn base_price(symbol: &str) -> f64 {
        let seed: u64 = symbol.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        });
        50.0 + (seed % 400) as f64
    }

    fn price_at(symbol: &str, step: u64) -> f64 {
        let base = Self::base_price(symbol);
        let t = step as f64;
        base * (1.0 + 0.02 * (t * 0.35).sin() + 0.0004 * t)
    }

    fn bar_at(symbol: &str, step: u64, timestamp: DateTime<Utc>) -> Bar {
        let close = Self::price_at(symbol, step);
        let open = if step == 0 {
            close
        } else {
            Self::price_at(symbol, step - 1)
        };
        Bar {
            symbol: symbol.to_string(),
            open,
            high: open.max(close) * 1.001,
            low: open.min(close) * 0.999,
            close,
            volume: 1_000.0 + (step % 97) as f64 * 10.0,
            timestamp,
        }
    }
}

impl Default for SyntheticFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataFeed for SyntheticFeed {
    async fn historical(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>> {
        let deliver = (lookback as f64 * self.history_fill).floor() as usize;
        let mut steps = self.steps.lock().unwrap();
        let start = *steps.get(symbol).unwrap_or(&0);
        let now = Utc::now();
        let bars: Vec<Bar> = (0..deliver)
            .map(|i| {
                let age = (deliver - i) as i64;
                Self::bar_at(symbol, start + i as u64, now - ChronoDuration::seconds(age * 60))
            })
            .collect();
        steps.insert(symbol.to_string(), start + deliver as u64);
        debug!(symbol, lookback, delivered = bars.len(), "Synthetic history served");
        Ok(bars)
    }

    async fn latest(&self, symbol: &str) -> Result<Option<Bar>> {
        let mut steps = self.steps.lock().unwrap();
        let step = steps.entry(symbol.to_string()).or_insert(0);
        let bar = Self::bar_at(symbol, *step, Utc::now());
        *step += 1;
        Ok(Some(bar))
    }
}

/// A fill recorded by the paper broker.
#[derive(Debug, Clone)]
pub struct PaperFill {
    pub id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub kind: SignalKind,
    /// Signal price with slippage applied: buys pay more, sells receive less.
    pub fill_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Simulated broker. Every admitted order fills at the signal price plus
/// slippage; fills are kept in memory for inspection.
pub struct PaperBroker {
    slippage_bps: f64,
    fills: Mutex<Vec<PaperFill>>,
}

impl PaperBroker {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperBroker initialized");
        Self {
            slippage_bps,
            fills: Mutex::new(Vec::new()),
        }
    }

    pub fn fills(&self) -> Vec<PaperFill> {
        self.fills.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn execute(&self, symbol: &str, signal: &Signal) -> Result<bool> {
        let slip = self.slippage_bps / 10_000.0;
        let fill_price = if signal.kind.is_entry() {
            signal.price * (1.0 + slip)
        } else {
            signal.price * (1.0 - slip)
        };

        debug!(
            symbol,
            strategy = %signal.strategy_id,
            kind = %signal.kind,
            mid = signal.price,
            fill = fill_price,
            "Paper fill simulated"
        );

        self.fills.lock().unwrap().push(PaperFill {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: signal.strategy_id.clone(),
            symbol: symbol.to_string(),
            kind: signal.kind,
            fill_price,
            timestamp: Utc::now(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_paths_are_deterministic_per_symbol() {
        let a = SyntheticFeed::new();
        let b = SyntheticFeed::new();

        let bars_a = a.historical("BTCUSDT", 20).await.unwrap();
        let bars_b = b.historical("BTCUSDT", 20).await.unwrap();
        assert_eq!(bars_a.len(), 20);
        for (x, y) in bars_a.iter().zip(&bars_b) {
            assert_eq!(x.close, y.close);
        }

        let other = a.historical("ETHUSDT", 1).await.unwrap();
        assert_ne!(other[0].close, bars_a[0].close);
    }

    #[tokio::test]
    async fn latest_continues_where_history_ended() {
        let feed = SyntheticFeed::new();
        let history = feed.historical("AAPL", 5).await.unwrap();
        let next = feed.latest("AAPL").await.unwrap().unwrap();
        // The next bar opens at the previous step's close and moves on
        assert_eq!(next.open, history.last().unwrap().close);
        assert_ne!(next.close, next.open);
    }

    #[tokio::test]
    async fn history_fill_fraction_underdelivers() {
        let feed = SyntheticFeed::with_history_fill(0.4);
        let bars = feed.historical("AAPL", 10).await.unwrap();
        assert_eq!(bars.len(), 4);
    }

    #[tokio::test]
    async fn buy_fill_applies_positive_slippage() {
        let broker = PaperBroker::new(10.0); // 10 bps
        let signal = Signal::new("BTCUSDT", SignalKind::Buy, 1_000.0, 0.9);
        assert!(broker.execute("BTCUSDT", &signal).await.unwrap());

        let fills = broker.fills();
        assert_eq!(fills.len(), 1);
        let expected = 1_000.0 * (1.0 + 10.0 / 10_000.0);
        assert!((fills[0].fill_price - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_fill_applies_negative_slippage() {
        let broker = PaperBroker::new(10.0);
        let signal = Signal::new("BTCUSDT", SignalKind::Sell, 1_000.0, 0.9);
        broker.execute("BTCUSDT", &signal).await.unwrap();

        let expected = 1_000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((broker.fills()[0].fill_price - expected).abs() < 1e-9);
    }
}
