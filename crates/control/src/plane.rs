use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{
    Broker, DataFeed, Error, Request, Response, Result, StatusReport, StrategyReport,
};
use engine::{Core, LoopSettings, Orchestrator, OrchestratorHandle, Phase, SharedCore, StopSignal};
use strategy::StrategyDefinition;

/// How long the orchestrator gets to drain before shutdown is declared
/// failed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct LoopTask {
    handle: OrchestratorHandle,
    join: JoinHandle<()>,
}

/// The daemon's brain: exactly one Orchestrator/StrategyPool/CapitalLedger
/// triple, explicitly constructed and passed by reference into the
/// transport — never ambient global state.
///
/// Mutating commands serialize on the core's write guard: at most one
/// concurrent mutation, and a denied command leaves no state behind.
/// `get_status` takes only read guards.
pub struct ControlPlane {
    core: SharedCore,
    feed: Arc<dyn DataFeed>,
    broker: Arc<dyn Broker>,
    loop_settings: LoopSettings,
    /// Spawned by the first deploy; later deploys hot-swap into it.
    loop_task: Mutex<Option<LoopTask>>,
    /// Trips when a shutdown command arrives; the transport drains on it.
    shutdown: StopSignal,
    started_at: DateTime<Utc>,
}

impl ControlPlane {
    pub fn new(
        total_capital: f64,
        feed: Arc<dyn DataFeed>,
        broker: Arc<dyn Broker>,
        loop_settings: LoopSettings,
    ) -> Self {
        Self {
            core: Core::shared(total_capital),
            feed,
            broker,
            loop_settings,
            loop_task: Mutex::new(None),
            shutdown: StopSignal::new(),
            started_at: Utc::now(),
        }
    }

    pub fn core(&self) -> SharedCore {
        self.core.clone()
    }

    /// Resolves once a shutdown command has been accepted.
    pub async fn shutdown_requested(&self) {
        self.shutdown.wait().await;
    }

    pub async fn phase(&self) -> Phase {
        let handle = self
            .loop_task
            .lock()
            .expect("loop task mutex poisoned")
            .as_ref()
            .map(|t| t.handle.clone());
        match handle {
            Some(h) => h.phase().await,
            None => Phase::Idle,
        }
    }

    // ─── Command dispatch ─────────────────────────────────────────────────────

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Deploy {
                path,
                strategy_id,
                allocation,
                symbol,
            } => self.deploy(&path, &strategy_id, allocation, &symbol).await,
            Request::Pause { strategy_id } => self.pause(&strategy_id).await,
            Request::Resume { strategy_id } => self.resume(&strategy_id).await,
            Request::Undeploy { strategy_id } => self.undeploy(&strategy_id).await,
            Request::Rebalance { allocations } => self.rebalance(&allocations).await,
            Request::GetStatus => self.status().await,
            Request::Shutdown => self.begin_shutdown(),
        }
    }

    async fn deploy(&self, path: &str, id: &str, allocation: f64, symbol: &str) -> Response {
        let def = match StrategyDefinition::load(path) {
            Ok(def) => def,
            Err(e) => return Response::err(e),
        };
        {
            let mut guard = self.core.write().await;
            let Core { pool, ledger } = &mut *guard;
            if let Err(e) = pool.deploy(&def, id, allocation, symbol, ledger) {
                return Response::err(e);
            }
        }
        self.ensure_loop();
        Response::ok(format!("strategy '{id}' deployed on {symbol}"))
    }

    async fn pause(&self, id: &str) -> Response {
        match self.core.write().await.pool.pause(id) {
            Ok(()) => Response::ok(format!("strategy '{id}' paused")),
            Err(denial) => Response::err(denial),
        }
    }

    async fn resume(&self, id: &str) -> Response {
        match self.core.write().await.pool.resume(id) {
            Ok(()) => Response::ok(format!("strategy '{id}' resumed")),
            Err(denial) => Response::err(denial),
        }
    }

    async fn undeploy(&self, id: &str) -> Response {
        let mut guard = self.core.write().await;
        let Core { pool, ledger } = &mut *guard;
        match pool.undeploy(id, ledger) {
            Ok(()) => Response::ok(format!("strategy '{id}' undeployed")),
            Err(denial) => Response::err(denial),
        }
    }

    async fn rebalance(&self, allocations: &std::collections::HashMap<String, f64>) -> Response {
        let mut guard = self.core.write().await;
        let Core { pool, ledger } = &mut *guard;
        match pool.rebalance(allocations, ledger) {
            Ok(()) => Response::ok(format!("rebalanced {} strategies", allocations.len())),
            Err(denial) => Response::err(denial),
        }
    }

    /// Read-only consistent snapshot. Never mutates anything.
    async fn status(&self) -> Response {
        let phase = self.phase().await;
        let core = self.core.read().await;
        let strategies = core
            .pool
            .records()
            .map(|r| {
                let ls = core.ledger.status(&r.id);
                let (allocation_pct, allocated, spent, available, owned_symbols) = match ls {
                    Some(ls) => (
                        ls.allocation_pct,
                        ls.allocated,
                        ls.spent,
                        ls.available,
                        ls.owned_symbols,
                    ),
                    None => (r.allocation, 0.0, 0.0, 0.0, Vec::new()),
                };
                StrategyReport {
                    id: r.id.clone(),
                    symbol: r.symbol.clone(),
                    state: r.state,
                    lookback: r.lookback,
                    allocation_pct,
                    allocated,
                    spent,
                    available,
                    owned_symbols,
                }
            })
            .collect();

        Response::with_status(StatusReport {
            phase: phase.to_string(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            granularity: self.loop_settings.granularity,
            trading_enabled: self.loop_settings.trading_enabled,
            total_value: core.ledger.total_value(),
            strategies,
        })
    }

    fn begin_shutdown(&self) -> Response {
        info!("Shutdown requested");
        self.shutdown.trigger();
        Response::ok("daemon stopping")
    }

    // ─── Loop lifecycle ───────────────────────────────────────────────────────

    /// Construct and spawn the orchestrator if it is not running yet. The
    /// first deploy lands here; every later deploy finds it already up.
    fn ensure_loop(&self) {
        let mut guard = self.loop_task.lock().expect("loop task mutex poisoned");
        if guard.is_some() {
            return;
        }
        let (orchestrator, handle) = Orchestrator::new(
            self.core.clone(),
            self.feed.clone(),
            self.broker.clone(),
            self.loop_settings.clone(),
        );
        let join = tokio::spawn(orchestrator.run());
        info!("Orchestrator constructed on first deploy");
        *guard = Some(LoopTask { handle, join });
    }

    /// Stop the orchestrator and wait for it to drain. Called after the
    /// transport has released; exceeding the grace period is fatal.
    pub async fn stop_loop(&self) -> Result<()> {
        let task = self
            .loop_task
            .lock()
            .expect("loop task mutex poisoned")
            .take();
        let Some(LoopTask { handle, join }) = task else {
            return Ok(());
        };

        handle.request_stop();
        match tokio::time::timeout(SHUTDOWN_GRACE, join).await {
            Ok(Ok(())) => {
                info!("Orchestrator drained cleanly");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Daemon(format!("orchestrator task failed: {e}"))),
            Err(_) => {
                warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Orchestrator missed the grace period");
                Err(Error::Daemon(format!(
                    "orchestrator did not drain within {}s",
                    SHUTDOWN_GRACE.as_secs()
                )))
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
