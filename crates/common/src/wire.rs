use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Granularity, StrategyState};

/// A command sent to the daemon, tagged by `type` on the wire:
/// `{"type": "deploy", "strategy_id": "sma", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Deploy {
        /// Path to a TOML strategy definition readable by the daemon.
        path: String,
        strategy_id: String,
        /// Fraction of total capital in (0, 1].
        allocation: f64,
        symbol: String,
    },
    Pause {
        strategy_id: String,
    },
    Resume {
        strategy_id: String,
    },
    Undeploy {
        strategy_id: String,
    },
    Rebalance {
        allocations: HashMap<String, f64>,
    },
    GetStatus,
    Shutdown,
}

impl Request {
    /// Only `GetStatus` runs without the state write lock.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Request::GetStatus)
    }
}

/// Uniform command response: success plus message, or failure plus error.
/// Never partially applied — a failed command left no state change behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusReport>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            status: None,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
            status: None,
        }
    }

    pub fn with_status(status: StatusReport) -> Self {
        Self {
            success: true,
            message: None,
            error: None,
            status: Some(status),
        }
    }
}

/// Consistent snapshot of the daemon, returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Orchestrator phase: idle, priming, running, draining, stopped.
    pub phase: String,
    pub uptime_secs: u64,
    pub granularity: Granularity,
    pub trading_enabled: bool,
    pub total_value: f64,
    pub strategies: Vec<StrategyReport>,
}

/// Per-strategy slice of a status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub id: String,
    pub symbol: String,
    pub state: StrategyState,
    pub lookback: usize,
    pub allocation_pct: f64,
    pub allocated: f64,
    pub spent: f64,
    pub available: f64,
    pub owned_symbols: Vec<String>,
}
