pub mod accumulator;
pub mod api;
pub mod commands;
pub mod ingest;
pub mod liveness;
pub mod orchestrator;
pub mod router;
pub mod server;
pub mod state;

#[cfg(test)]
mod test_support;

pub use accumulator::MediaGroupAccumulator;
pub use orchestrator::{Orchestrator, OrchestratorSettings, TurnOutcome, TurnRoute};
pub use server::GatewayServer;
