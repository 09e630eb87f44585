//! Standalone HTTP server for agentsim.
//!
//! Reads its settings from the environment (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`,
//! `OPENAI_BASE_URL`, `AGENTSIM_JUDGE_MODEL`, `PORT`) and logs through `RUST_LOG`.
//!
//! ```text
//! RUST_LOG=info ANTHROPIC_API_KEY=sk-ant-... cargo run --features server --bin agentsim-server
//! ```

use agentsim::server::{serve, AppState};
use agentsim::{AgentSimConfig, ModelRegistry, Orchestrator, RunStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    agentsim::init_logger();

    let config = AgentSimConfig::from_env();
    let models = ModelRegistry::from_config(&config);
    let catalogue = models.catalogue().clone();
    let orchestrator = Orchestrator::new(Arc::new(RunStore::new()), Arc::new(models), &config);

    serve(AppState::new(orchestrator, config, catalogue)).await
}
