use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use common::Result;

/// On-disk discovery handle: just enough plain data for a second client to
/// locate a running daemon. Disposable — cross-process access always goes
/// through the command protocol, never through shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHandle {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

impl DaemonHandle {
    pub fn current(port: u16) -> Self {
        Self {
            pid: std::process::id(),
            port,
            started_at: Utc::now(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Read a handle if one exists. A corrupt file counts as absent — the
    /// handle is disposable, not a database.
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt daemon handle ignored");
                None
            }
        }
    }

    pub fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    /// Best-effort liveness of the referenced process. On platforms
    /// without /proc the health probe is the real arbiter.
    pub fn process_alive(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            Path::new(&format!("/proc/{}", self.pid)).exists()
        }
        #[cfg(not(target_os = "linux"))]
        {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_through_disk() {
        let path = std::env::temp_dir().join("flotilla-handle-test.json");
        let handle = DaemonHandle::current(7878);
        handle.write(&path).unwrap();

        let read = DaemonHandle::read(&path).unwrap();
        assert_eq!(read.pid, handle.pid);
        assert_eq!(read.port, 7878);

        DaemonHandle::remove(&path);
        assert!(DaemonHandle::read(&path).is_none());
    }

    #[test]
    fn corrupt_handle_reads_as_absent() {
        let path = std::env::temp_dir().join("flotilla-handle-corrupt.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(DaemonHandle::read(&path).is_none());
        DaemonHandle::remove(&path);
    }

    #[test]
    fn own_process_is_alive() {
        let handle = DaemonHandle::current(0);
        assert!(handle.process_alive());
    }
}
