pub mod analysis;
pub mod intake;
pub mod orchestrator;
pub mod recorder;
pub mod registry;
