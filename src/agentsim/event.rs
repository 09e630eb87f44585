//! Progress events for simulation runs.
//!
//! [`Orchestrator::run`](crate::Orchestrator::run) hands back a stream of
//! [`SimulationEvent`]s, one per observable step of the turn loop. Each event serializes to
//! a flat JSON object tagged by `type`, which is exactly what the HTTP boundary writes into
//! its Server-Sent Events stream:
//!
//! ```text
//! {"type":"status","status":"running"}
//! {"type":"turn_start","turn":1,"speaker":"candidate"}
//! {"type":"content_delta","speaker":"candidate","delta":"Hi","turn":1}
//! {"type":"message_complete","message":{...},"turn":1}
//! ...
//! {"type":"verification_start"}
//! {"type":"verification_complete","result":{"success":true,...}}
//! {"type":"simulation_complete"}
//! ```
//!
//! Consumers that would rather be called back than poll a stream can register an
//! [`EventHandler`] with
//! [`Orchestrator::with_event_handler`](crate::Orchestrator::with_event_handler); it sees every
//! event, in order, before the stream yields it.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentsim::event::{EventHandler, SimulationEvent};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_event(&self, simulation_id: &str, event: &SimulationEvent) {
//!         if let SimulationEvent::ContentDelta { delta, .. } = event {
//!             print!("{}", delta);
//!         } else {
//!             println!("[{}] {}", simulation_id, event.kind());
//!         }
//!     }
//! }
//! ```

use crate::agentsim::simulation::{RunStatus, Speaker, Turn, VerificationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One observable step of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationEvent {
    /// First event of every execution attempt.
    Status { status: RunStatus },

    /// A participant was given the floor.
    TurnStart { turn: usize, speaker: Speaker },

    /// A piece of visible content, in the order the backend produced it.
    ContentDelta {
        speaker: Speaker,
        delta: String,
        turn: usize,
    },

    /// A piece of private reasoning.
    ReasoningDelta {
        speaker: Speaker,
        delta: String,
        turn: usize,
    },

    /// The turn was committed to the transcript.
    MessageComplete { message: Turn, turn: usize },

    /// The candidate wrote the completion marker; the loop stops after this turn.
    VerificationRequested,

    VerificationStart,

    VerificationComplete { result: VerificationResult },

    /// Terminal event of a successful run.
    SimulationComplete,

    /// Terminal event of a failed run. Nothing follows it.
    Error { message: String },
}

impl SimulationEvent {
    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            SimulationEvent::Status { .. } => "status",
            SimulationEvent::TurnStart { .. } => "turn_start",
            SimulationEvent::ContentDelta { .. } => "content_delta",
            SimulationEvent::ReasoningDelta { .. } => "reasoning_delta",
            SimulationEvent::MessageComplete { .. } => "message_complete",
            SimulationEvent::VerificationRequested => "verification_requested",
            SimulationEvent::VerificationStart => "verification_start",
            SimulationEvent::VerificationComplete { .. } => "verification_complete",
            SimulationEvent::SimulationComplete => "simulation_complete",
            SimulationEvent::Error { .. } => "error",
        }
    }

    /// `true` for the events after which a run's stream ends.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulationEvent::SimulationComplete | SimulationEvent::Error { .. }
        )
    }
}

/// Trait for receiving run events as callbacks.
///
/// Implementations must be `Send + Sync`; the orchestrator awaits the handler inline, so a
/// slow handler slows the run down.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event of every run. The default implementation is a no-op.
    async fn on_event(&self, _simulation_id: &str, _event: &SimulationEvent) {}
}
