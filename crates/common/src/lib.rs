pub mod config;
pub mod error;
pub mod market;
pub mod types;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use market::{Broker, DataFeed};
pub use types::*;
pub use wire::{Request, Response, StatusReport, StrategyReport};
