use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{Config, Request};
use control::{serve, ControlPlane, DaemonHandle};
use engine::LoopSettings;
use paper::{PaperBroker, SyntheticFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        port = cfg.port,
        granularity = %cfg.granularity,
        trading = cfg.trading_enabled,
        capital = cfg.total_capital,
        "Flotilla daemon starting"
    );

    // ── Collaborators ─────────────────────────────────────────────────────────
    let feed = Arc::new(SyntheticFeed::new());
    let broker = Arc::new(PaperBroker::new(cfg.slippage_bps));
    let settings = LoopSettings {
        granularity: cfg.granularity,
        trading_enabled: cfg.trading_enabled,
        run_for: cfg.run_for_secs.map(Duration::from_secs),
    };
    let plane = Arc::new(ControlPlane::new(cfg.total_capital, feed, broker, settings));

    // ── Transport ─────────────────────────────────────────────────────────────
    // Bind before writing the handle so a bind failure is fatal and the
    // handle never points at a dead port.
    let listener = TcpListener::bind(("127.0.0.1", cfg.port))
        .await
        .with_context(|| format!("failed to bind command transport on port {}", cfg.port))?;
    let port = listener.local_addr()?.port();

    let handle_path = cfg.handle_path();
    DaemonHandle::current(port)
        .write(&handle_path)
        .context("failed to write discovery handle")?;
    info!(path = %handle_path.display(), pid = std::process::id(), "Discovery handle written");

    // Ctrl-C takes the same path as a shutdown command
    {
        let plane = plane.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received; shutting down");
                let _ = plane.handle(Request::Shutdown).await;
            }
        });
    }

    // ── Serve until shutdown ──────────────────────────────────────────────────
    let served = serve(plane.clone(), listener).await;

    DaemonHandle::remove(&handle_path);
    served.context("command transport failed")?;
    plane
        .stop_loop()
        .await
        .context("orchestrator failed to stop within the grace period")?;

    info!("Flotilla daemon exited cleanly");
    Ok(())
}
