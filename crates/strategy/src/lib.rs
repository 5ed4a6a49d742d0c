pub mod definition;
pub mod engines;
pub mod indicators;
pub mod pool;

pub use definition::{classify, EngineKind, EngineRegistry, StrategyDefinition};
pub use engines::{MacdEngine, RsiEngine, SignalEngine, SmaCrossEngine};
pub use pool::{StrategyPool, StrategyRecord};
