use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One bar of market data (OHLCV), oldest-first in every buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Bar {
    /// Flat bar at a single price. Convenient for tests and synthetic feeds.
    pub fn flat(symbol: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            timestamp,
        }
    }
}

/// What a signal instructs the broker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Close,
    LimitBuy,
    LimitSell,
    StopLoss,
    TrailingStop,
}

impl SignalKind {
    /// Buy-side kinds claim symbol ownership; sell-side kinds release it.
    pub fn is_entry(self) -> bool {
        matches!(self, SignalKind::Buy | SignalKind::LimitBuy)
    }

    pub fn is_exit(self) -> bool {
        matches!(
            self,
            SignalKind::Sell
                | SignalKind::Close
                | SignalKind::LimitSell
                | SignalKind::StopLoss
                | SignalKind::TrailingStop
        )
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalKind::Buy => "buy",
            SignalKind::Sell => "sell",
            SignalKind::Hold => "hold",
            SignalKind::Close => "close",
            SignalKind::LimitBuy => "limit_buy",
            SignalKind::LimitSell => "limit_sell",
            SignalKind::StopLoss => "stop_loss",
            SignalKind::TrailingStop => "trailing_stop",
        };
        write!(f, "{s}")
    }
}

/// A timestamped trading instruction emitted by one strategy for one symbol.
///
/// `strategy_id` is stamped by the pool after extraction; engines leave it
/// empty. A HOLD produced from a failed extraction carries the error text in
/// `note`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub kind: SignalKind,
    /// Reference price at extraction time (usually the latest close).
    pub price: f64,
    /// Confidence in [0, 1]. HOLDs carry 0.
    pub confidence: f64,
    /// Quote-currency amount to deploy. `None` lets the orchestrator size it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(symbol: impl Into<String>, kind: SignalKind, price: f64, confidence: f64) -> Self {
        Self {
            strategy_id: String::new(),
            symbol: symbol.into(),
            kind,
            price,
            confidence: confidence.clamp(0.0, 1.0),
            size: None,
            limit_price: None,
            stop_price: None,
            trail_pct: None,
            note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn hold(symbol: impl Into<String>, price: f64) -> Self {
        Self::new(symbol, SignalKind::Hold, price, 0.0)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_hold(&self) -> bool {
        self.kind == SignalKind::Hold
    }
}

/// Lifecycle state of a deployed strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyState {
    Initialized,
    Active,
    Paused,
    Removed,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::Initialized => write!(f, "initialized"),
            StrategyState::Active => write!(f, "active"),
            StrategyState::Paused => write!(f, "paused"),
            StrategyState::Removed => write!(f, "removed"),
        }
    }
}

/// Tolerance applied when checking that allocations sum to at most 1.0.
pub const ALLOC_EPSILON: f64 = 1e-6;

/// Reason an admission check denied a request.
///
/// These are expected business outcomes, returned as values and surfaced
/// verbatim to the client. They never crash the daemon.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Denial {
    #[error("unknown strategy '{id}'")]
    UnknownStrategy { id: String },

    #[error("strategy '{id}' already deployed")]
    DuplicateStrategy { id: String },

    #[error("allocation {pct:.4} outside (0, 1]")]
    InvalidAllocation { pct: f64 },

    #[error("allocation {requested:.4} exceeds uncommitted share {remaining:.4}")]
    AllocationExceeded { requested: f64, remaining: f64 },

    #[error("strategy '{id}' has {available:.2} available, needs {requested:.2}")]
    InsufficientCapital {
        id: String,
        requested: f64,
        available: f64,
    },

    #[error("invalid trade amount {amount:.2}")]
    InvalidAmount { amount: f64 },

    #[error("symbol '{symbol}' is owned by strategy '{owner}'")]
    SymbolOwned { symbol: String, owner: String },

    #[error("strategy '{id}' does not own symbol '{symbol}'")]
    NotOwner { id: String, symbol: String },
}

/// Data granularity, also the tick cadence of the polling loop.
///
/// Parses compact strings: `"30s"`, `"1m"`, `"4h"`, `"1d"`; a bare number is
/// seconds. The loop floors the cadence at one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Granularity {
    secs: u64,
}

impl Granularity {
    pub fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.secs.max(1))
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self { secs: 60 }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let last = s.chars().last().ok_or("empty granularity")?;
        let (num, unit) = if last.is_ascii_alphabetic() {
            s.split_at(s.len() - 1)
        } else {
            (s, "s")
        };
        let n: u64 = num
            .parse()
            .map_err(|_| format!("bad granularity number in '{s}'"))?;
        let secs = match unit {
            "s" | "S" => n,
            "m" | "M" => n * 60,
            "h" | "H" => n * 3_600,
            "d" | "D" => n * 86_400,
            other => return Err(format!("unknown granularity unit '{other}'")),
        };
        Ok(Self { secs })
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.secs {
            s if s % 86_400 == 0 && s > 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 && s > 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 && s > 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{s}s"),
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> String {
        g.to_string()
    }
}
