pub mod client;
pub mod handle;
pub mod plane;
pub mod server;

pub use client::{DaemonClient, DaemonLauncher};
pub use handle::DaemonHandle;
pub use plane::{ControlPlane, SHUTDOWN_GRACE};
pub use server::serve;
