pub mod orchestrator;
pub mod stop;

pub use orchestrator::{
    Core, LoopSettings, Orchestrator, OrchestratorHandle, Phase, SharedCore, TickStats,
};
pub use stop::StopSignal;
