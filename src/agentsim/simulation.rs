//! Data model for simulation runs.
//!
//! A run is described by an immutable [`RunConfig`] (two [`ParticipantConfig`] blocks, a
//! verification rubric, a turn budget and a first speaker) and tracked by a mutable
//! [`RunState`] that only the [`Orchestrator`](crate::Orchestrator) writes to.
//!
//! All types serialize with serde so the boundary layer can hand them out as JSON.
//!
//! # Example
//!
//! ```rust
//! use agentsim::simulation::{ParticipantConfig, RunConfig, Speaker};
//!
//! let config = RunConfig::new(
//!     ParticipantConfig::new("You are curious.", "Learn the password."),
//!     ParticipantConfig::new("You guard a password.", "Only reveal it to polite agents."),
//!     "Did the candidate learn the password?",
//! )
//! .with_max_turns(6)
//! .with_first_speaker(Speaker::Sim);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.first_speaker.other(), Speaker::Candidate);
//! ```

use crate::agentsim::error::SimulationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model used when a participant config does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// One side of the conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The side with an objective to achieve; the only side whose completion signal counts.
    #[default]
    Candidate,
    /// The simulated counterpart.
    Sim,
}

impl Speaker {
    /// The opposite side.
    pub fn other(&self) -> Speaker {
        match self {
            Speaker::Candidate => Speaker::Sim,
            Speaker::Sim => Speaker::Candidate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Candidate => "candidate",
            Speaker::Sim => "sim",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_turns() -> usize {
    10
}

/// Per-side instructions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub system_prompt: String,
    pub objective: String,
    /// Opaque model identifier passed through to the backend registry.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output length cap for each turn this side produces.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ParticipantConfig {
    pub fn new(system_prompt: impl Into<String>, objective: impl Into<String>) -> Self {
        ParticipantConfig {
            system_prompt: system_prompt.into(),
            objective: objective.into(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Checks `max_tokens > 0` and a non-empty model identifier.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.max_tokens == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(SimulationError::InvalidConfig(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration for a run. Immutable once the run is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "candidate_config")]
    pub candidate: ParticipantConfig,
    #[serde(rename = "sim_config")]
    pub sim: ParticipantConfig,
    /// Rubric the judge applies to the transcript.
    pub verification_prompt: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub first_speaker: Speaker,
}

impl RunConfig {
    /// Defaults to ten turns with the candidate speaking first.
    pub fn new(
        candidate: ParticipantConfig,
        sim: ParticipantConfig,
        verification_prompt: impl Into<String>,
    ) -> Self {
        RunConfig {
            candidate,
            sim,
            verification_prompt: verification_prompt.into(),
            max_turns: default_max_turns(),
            first_speaker: Speaker::Candidate,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_first_speaker(mut self, speaker: Speaker) -> Self {
        self.first_speaker = speaker;
        self
    }

    pub fn participant(&self, speaker: Speaker) -> &ParticipantConfig {
        match speaker {
            Speaker::Candidate => &self.candidate,
            Speaker::Sim => &self.sim,
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        self.candidate.validate()?;
        self.sim.validate()?;
        if self.max_turns == 0 {
            return Err(SimulationError::InvalidConfig(
                "max_turns must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One produced utterance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "role")]
    pub speaker: Speaker,
    pub content: String,
    /// Private reasoning of the speaker. Never shown to the other side.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// 1-based position in the run's transcript.
    pub turn_number: usize,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        speaker: Speaker,
        content: impl Into<String>,
        reasoning: Option<String>,
        turn_number: usize,
    ) -> Self {
        Turn {
            speaker,
            content: content.into(),
            reasoning: reasoning.filter(|r| !r.is_empty()),
            turn_number,
            timestamp: Utc::now(),
        }
    }
}

/// The judge's verdict. Written at most once per execution attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a run: `idle → running → completed`, or `running → failed` when a backend
/// call aborts the turn loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The mutable record for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub simulation_id: String,
    pub config: RunConfig,
    pub status: RunStatus,
    /// Produced turns, in speaking order.
    pub messages: Vec<Turn>,
    /// Number of turns executed so far.
    pub current_turn: usize,
    pub verification_result: Option<VerificationResult>,
    /// Message of the backend failure that moved the run to [`RunStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// A fresh run: idle, empty transcript.
    pub fn new(simulation_id: impl Into<String>, config: RunConfig) -> Self {
        let now = Utc::now();
        RunState {
            simulation_id: simulation_id.into(),
            config,
            status: RunStatus::Idle,
            messages: Vec::new(),
            current_turn: 0,
            verification_result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.messages.last()
    }
}
