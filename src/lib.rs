//! # agentsim
//!
//! agentsim runs scripted two-party conversations between two autonomous LLM-driven
//! participants, the **candidate** and the **sim**. They alternate turns until the candidate
//! asks to be judged (by writing `REQUEST_VERIFICATION` in its reply) or the turn budget runs
//! out, then a judge reads the whole transcript and decides whether the candidate met its
//! objective.
//!
//! The crate is layered leaf-first:
//!
//! * **Envelope**: [`envelope::Envelope`] wraps every utterance handed from one participant
//!   to the other in a small, inspectable protocol frame.
//! * **Backends**: [`LanguageModel`] is the capability that turns a system prompt plus a
//!   history into text, either buffered or as a stream of deltas. [`backends`] provides an
//!   OpenAI-compatible client, an Anthropic Messages client and a [`ModelRegistry`] that
//!   dispatches on model-identifier prefixes.
//! * **Participants**: [`Participant`] owns one side's private view of the conversation.
//! * **Judge**: [`Judge`] issues one deterministic backend call and parses a tolerant verdict.
//! * **Orchestrator**: [`Orchestrator`] alternates speaking rights, streams progress as
//!   [`SimulationEvent`]s, stops on the completion signal and hands the transcript to the judge.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use agentsim::{AgentSimConfig, ModelRegistry, Orchestrator, RunStore};
//! use agentsim::simulation::{ParticipantConfig, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agentsim::init_logger();
//!
//!     let config = AgentSimConfig::from_env();
//!     let models = Arc::new(ModelRegistry::from_config(&config));
//!     let orchestrator = Orchestrator::new(Arc::new(RunStore::new()), models, &config);
//!
//!     let run = RunConfig::new(
//!         ParticipantConfig::new(
//!             "You are trying to find out information.",
//!             "Find out what the other agent's favorite color is.",
//!         ),
//!         ParticipantConfig::new(
//!             "You are a helpful agent.",
//!             "Your favorite color is blue. Share it if asked politely.",
//!         ),
//!         "Check if the candidate learned that the favorite color is blue.",
//!     )
//!     .with_max_turns(4);
//!
//!     let id = orchestrator.create(run)?;
//!     let mut events = orchestrator.run(&id)?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding agentsim can opt-in to simple `RUST_LOG` driven diagnostics
/// without having to choose a specific logging backend upfront.
///
/// ```rust
/// agentsim::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod agentsim;

pub use agentsim::backends;
pub use agentsim::backends::registry::ModelRegistry;
pub use agentsim::config::AgentSimConfig;
pub use agentsim::envelope;
pub use agentsim::error::SimulationError;
pub use agentsim::event;
pub use agentsim::event::{EventHandler, SimulationEvent};
pub use agentsim::judge;
pub use agentsim::judge::Judge;
pub use agentsim::model;
pub use agentsim::model::{
    BackendError, Chunk, ChunkKind, ChunkStream, Generation, GenerationRequest, LanguageModel,
    Message, Role,
};
pub use agentsim::orchestrator::{EventStream, Orchestrator};
pub use agentsim::participant;
pub use agentsim::participant::{Participant, TurnOutput, TurnStream};
#[cfg(feature = "server")]
pub use agentsim::server;
pub use agentsim::simulation;
pub use agentsim::store::RunStore;
