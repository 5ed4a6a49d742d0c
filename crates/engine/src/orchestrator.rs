use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use common::{Bar, Broker, DataFeed, Granularity, Result, Signal};
use ledger::CapitalLedger;
use strategy::StrategyPool;

use crate::stop::StopSignal;

/// Bars retained per symbol. Old bars roll off the front.
const BUFFER_CAP: usize = 512;

/// The strategy pool and capital ledger shared between the control plane
/// and the tick loop. Command handlers mutate it under the write guard;
/// status reads take the read guard.
pub struct Core {
    pub pool: StrategyPool,
    pub ledger: CapitalLedger,
}

impl Core {
    pub fn new(total_capital: f64) -> Self {
        Self {
            pool: StrategyPool::new(),
            ledger: CapitalLedger::new(total_capital),
        }
    }

    pub fn shared(total_capital: f64) -> SharedCore {
        Arc::new(RwLock::new(Self::new(total_capital)))
    }
}

pub type SharedCore = Arc<RwLock<Core>>;

/// Where the polling loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Priming,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Priming => write!(f, "priming"),
            Phase::Running => write!(f, "running"),
            Phase::Draining => write!(f, "draining"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub granularity: Granularity,
    /// When false, admitted signals are logged but never reach the broker.
    pub trading_enabled: bool,
    /// Optional deadline measured from loop start.
    pub run_for: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            trading_enabled: true,
            run_for: None,
        }
    }
}

/// Counters flushed as the drain summary.
#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub ticks: u64,
    pub signals: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub failures: u64,
}

/// Cloneable handle held by the control plane.
#[derive(Clone)]
pub struct OrchestratorHandle {
    phase: Arc<RwLock<Phase>>,
    stop: StopSignal,
}

impl OrchestratorHandle {
    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    pub fn request_stop(&self) {
        self.stop.trigger();
    }
}

/// The live polling loop.
///
/// Single task; ticks never overlap. Sole writer of the historical-bar
/// buffers — the control plane mutates the pool and ledger between ticks,
/// never the buffers.
pub struct Orchestrator {
    core: SharedCore,
    feed: Arc<dyn DataFeed>,
    broker: Arc<dyn Broker>,
    settings: LoopSettings,
    phase: Arc<RwLock<Phase>>,
    stop: StopSignal,
    buffers: HashMap<String, Vec<Bar>>,
    stats: TickStats,
}

impl Orchestrator {
    pub fn new(
        core: SharedCore,
        feed: Arc<dyn DataFeed>,
        broker: Arc<dyn Broker>,
        settings: LoopSettings,
    ) -> (Self, OrchestratorHandle) {
        let phase = Arc::new(RwLock::new(Phase::Idle));
        let stop = StopSignal::new();
        let handle = OrchestratorHandle {
            phase: phase.clone(),
            stop: stop.clone(),
        };
        let orchestrator = Orchestrator {
            core,
            feed,
            broker,
            settings,
            phase,
            stop,
            buffers: HashMap::new(),
            stats: TickStats::default(),
        };
        (orchestrator, handle)
    }

    /// Run the loop to completion. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        self.set_phase(Phase::Priming).await;
        self.prime_all().await;

        let cadence = self.settings.granularity.tick_interval();
        let deadline = self.settings.run_for.map(|d| Instant::now() + d);
        info!(
            cadence_secs = cadence.as_secs(),
            trading = self.settings.trading_enabled,
            "Orchestrator running"
        );
        self.set_phase(Phase::Running).await;

        loop {
            if self.stop.triggered() {
                info!("Stop requested");
                break;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    info!("Run deadline reached");
                    break;
                }
            }

            self.tick().await;
            self.stats.ticks += 1;

            let wait = match deadline {
                Some(d) => cadence.min(d.saturating_duration_since(Instant::now())),
                None => cadence,
            };
            if !self.stop.sleep(wait).await {
                info!("Stop requested during inter-tick wait");
                break;
            }
        }

        self.set_phase(Phase::Draining).await;
        info!(
            ticks = self.stats.ticks,
            signals = self.stats.signals,
            dispatched = self.stats.dispatched,
            rejected = self.stats.rejected,
            failures = self.stats.failures,
            "Orchestrator drained"
        );
        self.set_phase(Phase::Stopped).await;
    }

    async fn set_phase(&self, phase: Phase) {
        *self.phase.write().await = phase;
        debug!(%phase, "Orchestrator phase");
    }

    // ─── Priming ──────────────────────────────────────────────────────────────

    async fn prime_all(&mut self) {
        let symbols = self.core.read().await.pool.symbols();
        for symbol in symbols {
            self.prime_symbol(&symbol).await;
        }
    }

    /// One historical pull per symbol. An under-delivering or failing feed
    /// is not retried here; the loop starts with what it has and
    /// accumulates one bar per cycle.
    async fn prime_symbol(&mut self, symbol: &str) {
        let lookback = self.core.read().await.pool.max_lookback_for(symbol);
        match self.feed.historical(symbol, lookback).await {
            Ok(bars) => {
                if bars.len() < lookback {
                    warn!(
                        symbol,
                        got = bars.len(),
                        want = lookback,
                        "Feed under-delivered history; accumulating from live bars"
                    );
                }
                self.buffers.insert(symbol.to_string(), bars);
            }
            Err(e) => {
                warn!(symbol, error = %e, "History fetch failed; starting with empty buffer");
                self.buffers.insert(symbol.to_string(), Vec::new());
            }
        }
    }

    // ─── Ticking ──────────────────────────────────────────────────────────────

    async fn tick(&mut self) {
        let symbols = self.core.read().await.pool.symbols();
        for symbol in &symbols {
            if let Err(e) = self.tick_symbol(symbol).await {
                self.stats.failures += 1;
                error!(symbol, error = %e, "Symbol tick failed; continuing with the rest");
            }
        }
        // Buffers of undeployed symbols are dropped with their strategies
        self.buffers.retain(|symbol, _| symbols.contains(symbol));
    }

    async fn tick_symbol(&mut self, symbol: &str) -> Result<()> {
        if !self.buffers.contains_key(symbol) {
            // Hot-swapped in since the previous cycle
            self.prime_symbol(symbol).await;
        }

        if let Some(bar) = self.feed.latest(symbol).await? {
            let buffer = self.buffers.entry(symbol.to_string()).or_default();
            buffer.push(bar);
            if buffer.len() > BUFFER_CAP {
                let excess = buffer.len() - BUFFER_CAP;
                buffer.drain(..excess);
            }
        }

        let signals = {
            let buffer = match self.buffers.get(symbol) {
                Some(b) if !b.is_empty() => b,
                _ => return Ok(()),
            };
            self.core.read().await.pool.generate_signals(symbol, buffer)
        };

        for signal in signals {
            self.stats.signals += 1;
            if signal.is_hold() {
                if let Some(note) = &signal.note {
                    debug!(symbol, strategy = %signal.strategy_id, note, "HOLD");
                }
                continue;
            }
            self.dispatch(symbol, signal).await;
        }
        Ok(())
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────────

    /// Admission check, broker execution, fill reporting. The lock is held
    /// only around ledger touches, never across the broker await.
    async fn dispatch(&mut self, symbol: &str, signal: Signal) {
        let id = signal.strategy_id.clone();

        let (amount, admitted) = {
            let core = self.core.read().await;
            if signal.kind.is_entry() {
                let amount = signal
                    .size
                    .unwrap_or_else(|| core.ledger.available(&id).unwrap_or(0.0));
                (amount, core.ledger.can_buy(&id, symbol, amount))
            } else {
                let amount = signal.size.unwrap_or_else(|| core.ledger.cost_basis(symbol));
                (amount, core.ledger.can_sell(&id, symbol))
            }
        };

        if let Err(denial) = admitted {
            self.stats.rejected += 1;
            warn!(symbol, strategy = %id, kind = %signal.kind, reason = %denial, "Signal rejected by ledger");
            return;
        }

        if !self.settings.trading_enabled {
            info!(symbol, strategy = %id, kind = %signal.kind, price = signal.price,
                "Trading disabled; signal logged only");
            return;
        }

        match self.broker.execute(symbol, &signal).await {
            Ok(true) => {
                let mut core = self.core.write().await;
                let recorded = if signal.kind.is_entry() {
                    core.ledger.record_buy(&id, symbol, amount)
                } else {
                    core.ledger.record_sell(&id, symbol, amount)
                };
                match recorded {
                    Ok(()) => {
                        self.stats.dispatched += 1;
                        info!(symbol, strategy = %id, kind = %signal.kind, amount,
                            confidence = signal.confidence, "Fill recorded");
                    }
                    Err(denial) => {
                        // Admission moved between check and fill (e.g. a
                        // concurrent rebalance); the fill is not recorded.
                        self.stats.rejected += 1;
                        warn!(symbol, strategy = %id, reason = %denial,
                            "Fill no longer admissible; not recorded");
                    }
                }
            }
            Ok(false) => {
                self.stats.failures += 1;
                warn!(symbol, strategy = %id, "Broker declined the order");
            }
            Err(e) => {
                self.stats.failures += 1;
                error!(symbol, strategy = %id, error = %e, "Broker execution failed");
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
