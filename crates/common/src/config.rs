use std::path::PathBuf;

use crate::Granularity;

/// Daemon configuration, loaded from `FLOTILLA_*` environment variables at
/// startup. Every knob has a working default so a bare daemon can run;
/// malformed values panic immediately with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    /// Loopback port for the command transport.
    pub port: u16,
    /// Directory for the discovery handle.
    pub runtime_dir: PathBuf,
    /// Total account value shared by all strategies.
    pub total_capital: f64,
    /// Data granularity, also the tick cadence.
    pub granularity: Granularity,
    /// When false, signals are generated and logged but never dispatched.
    pub trading_enabled: bool,
    /// Optional run deadline; the loop drains when it passes.
    pub run_for_secs: Option<u64>,
    /// Paper-broker slippage in basis points.
    pub slippage_bps: f64,
}

impl Config {
    /// Load configuration. Loads `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            port: parsed_env("FLOTILLA_PORT", 7878),
            runtime_dir: optional_env("FLOTILLA_RUNTIME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("flotilla")),
            total_capital: parsed_env("FLOTILLA_CAPITAL", 10_000.0),
            granularity: optional_env("FLOTILLA_GRANULARITY")
                .map(|v| {
                    v.parse().unwrap_or_else(|e| {
                        panic!("FLOTILLA_GRANULARITY invalid: {e}")
                    })
                })
                .unwrap_or_default(),
            trading_enabled: optional_env("FLOTILLA_TRADING")
                .map(|v| match v.to_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    other => panic!("FLOTILLA_TRADING must be true/false, got '{other}'"),
                })
                .unwrap_or(true),
            run_for_secs: optional_env("FLOTILLA_RUN_FOR_SECS")
                .map(|v| {
                    v.parse().unwrap_or_else(|_| {
                        panic!("FLOTILLA_RUN_FOR_SECS must be an integer, got '{v}'")
                    })
                }),
            slippage_bps: parsed_env("FLOTILLA_SLIPPAGE_BPS", 10.0),
        }
    }

    /// Path of the on-disk discovery handle.
    pub fn handle_path(&self) -> PathBuf {
        self.runtime_dir.join("daemon.json")
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("Environment variable '{key}' has invalid value '{v}'")),
        Err(_) => default,
    }
}
