use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use common::{Error, Request, Response, Result};

use crate::handle::DaemonHandle;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);
const SPAWN_POLL: Duration = Duration::from_millis(250);

/// HTTP client for one daemon's command transport.
#[derive(Clone, Debug)]
pub struct DaemonClient {
    http: reqwest::Client,
    base: String,
}

impl DaemonClient {
    pub fn for_port(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://127.0.0.1:{port}"),
        }
    }

    pub async fn send(&self, request: &Request) -> Result<Response> {
        let response = self
            .http
            .post(format!("{}/command", self.base))
            .timeout(COMMAND_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("daemon unreachable: {e}")))?;
        response
            .json::<Response>()
            .await
            .map_err(|e| Error::Transport(format!("malformed daemon response: {e}")))
    }

    pub async fn healthy(&self) -> bool {
        self.http
            .get(format!("{}/healthz", self.base))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Finds a running daemon through the discovery handle; spawns one and
/// retries within a bounded startup wait when nothing answers.
pub struct DaemonLauncher {
    /// Daemon executable to spawn when no live daemon is found.
    pub program: PathBuf,
    pub args: Vec<String>,
    pub handle_path: PathBuf,
    pub startup_wait: Duration,
}

impl DaemonLauncher {
    pub async fn connect(&self) -> Result<DaemonClient> {
        if let Some(client) = self.try_existing().await {
            return Ok(client);
        }

        self.spawn_daemon()?;
        let deadline = Instant::now() + self.startup_wait;
        loop {
            tokio::time::sleep(SPAWN_POLL).await;
            if let Some(client) = self.try_existing().await {
                return Ok(client);
            }
            if Instant::now() >= deadline {
                return Err(Error::Transport(format!(
                    "daemon did not come up within {:?}",
                    self.startup_wait
                )));
            }
        }
    }

    /// Trust the handle only when the referenced process is alive and the
    /// health endpoint answers; anything less is stale and removed.
    async fn try_existing(&self) -> Option<DaemonClient> {
        let handle = DaemonHandle::read(&self.handle_path)?;
        if handle.process_alive() {
            let client = DaemonClient::for_port(handle.port);
            if client.healthy().await {
                return Some(client);
            }
        }
        warn!(pid = handle.pid, port = handle.port, "Stale daemon handle; removing");
        DaemonHandle::remove(&self.handle_path);
        None
    }

    fn spawn_daemon(&self) -> Result<()> {
        info!(program = %self.program.display(), "No daemon answering; spawning one");
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Daemon(format!("failed to spawn daemon: {e}")))?;
        Ok(())
    }
}
