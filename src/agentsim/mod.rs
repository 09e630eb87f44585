// src/agentsim/mod.rs

pub mod backends;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod judge;
pub mod model;
pub mod orchestrator;
pub mod participant;
#[cfg(feature = "server")]
pub mod server;
pub mod simulation;
pub mod store;

// Export the orchestrator at this level so callers don't have to go through
// agentsim::orchestrator::Orchestrator
pub use orchestrator::Orchestrator;
