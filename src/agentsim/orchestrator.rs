//! Turn scheduler for two-party simulation runs.
//!
//! The [`Orchestrator`] owns nothing but shared handles: the [`RunStore`] holding every run,
//! the [`LanguageModel`] both participants and the judge call, and an optional
//! [`EventHandler`]. Each call to [`Orchestrator::run`] builds a fresh pair of
//! [`Participant`]s and drives them through a single cooperative loop:
//!
//! ```text
//! status{running}
//! for each turn until the budget runs out or the candidate signals completion:
//!     turn_start → content_delta / reasoning_delta … → message_complete
//! [verification_requested]            (only when the loop stopped on the signal)
//! verification_start → verification_complete → simulation_complete
//! ```
//!
//! Every delta is handed to the consumer before the next one is requested from the backend,
//! so a slow consumer slows the run rather than piling up buffered events. A backend failure
//! ends the stream with an `error` event and leaves the run in [`RunStatus::Failed`].
//!
//! Dropping the event stream before its terminal event stops scheduling further turns and
//! moves the run to [`RunStatus::Failed`], so it can be truncated and run again.
//!
//! # Editing workflow
//!
//! A finished run can be reworked from any turn:
//!
//! 1. [`update_turn`](Orchestrator::update_turn) rewrites a stored turn in place.
//! 2. [`run_single_turn`](Orchestrator::run_single_turn) previews what either side would say
//!    next, without storing it; [`commit_turn`](Orchestrator::commit_turn) keeps a preview
//!    while the turn budget has room, and drops any earlier verdict.
//! 3. [`truncate_from`](Orchestrator::truncate_from) drops a suffix of the transcript and
//!    returns the run to [`RunStatus::Idle`], after which [`run`](Orchestrator::run) resumes
//!    from the remaining turns.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use agentsim::{AgentSimConfig, ModelRegistry, Orchestrator, RunStore, SimulationEvent};
//! use agentsim::simulation::{ParticipantConfig, RunConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentSimConfig::from_env();
//! let orchestrator = Orchestrator::new(
//!     Arc::new(RunStore::new()),
//!     Arc::new(ModelRegistry::from_config(&config)),
//!     &config,
//! );
//!
//! let id = orchestrator.create(RunConfig::new(
//!     ParticipantConfig::new("You are a shopper.", "Buy a used bike for under $200."),
//!     ParticipantConfig::new("You sell bikes.", "Never go below $250."),
//!     "Did the candidate agree on a price under $200?",
//! ))?;
//!
//! let mut events = orchestrator.run(&id)?;
//! while let Some(event) = events.next().await {
//!     if let SimulationEvent::VerificationComplete { result } = &event {
//!         println!("success: {} ({})", result.success, result.explanation);
//!     }
//! }
//!
//! // Rewind to turn 3 and play the rest again.
//! orchestrator.truncate_from(&id, 3)?;
//! let mut events = orchestrator.run(&id)?;
//! while events.next().await.is_some() {}
//! # Ok(())
//! # }
//! ```

use crate::agentsim::config::AgentSimConfig;
use crate::agentsim::error::SimulationError;
use crate::agentsim::event::{EventHandler, SimulationEvent};
use crate::agentsim::judge::Judge;
use crate::agentsim::model::{BackendError, ChunkKind, LanguageModel};
use crate::agentsim::participant::{Participant, TurnOutput};
use crate::agentsim::simulation::{RunConfig, RunState, RunStatus, Speaker, Turn};
use crate::agentsim::store::RunStore;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// The ordered events of one execution attempt.
pub type EventStream = Pin<Box<dyn Stream<Item = SimulationEvent> + Send>>;

/// Drives simulation runs and exposes the editing operations on them.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<RunStore>,
    model: Arc<dyn LanguageModel>,
    judge: Judge,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Orchestrator {
    /// The judge is configured from `config`; everything else is shared with the caller.
    pub fn new(
        store: Arc<RunStore>,
        model: Arc<dyn LanguageModel>,
        config: &AgentSimConfig,
    ) -> Self {
        Orchestrator {
            store,
            model,
            judge: Judge::from_config(config),
            event_handler: None,
        }
    }

    /// Register an observer that sees every event of every run, in order, before the
    /// event stream yields it.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_judge(mut self, judge: Judge) -> Self {
        self.judge = judge;
        self
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Validate `config` and register a fresh idle run under a new v4 UUID.
    pub fn create(&self, config: RunConfig) -> Result<String, SimulationError> {
        config.validate()?;
        let simulation_id = Uuid::new_v4().to_string();
        self.store
            .insert(RunState::new(simulation_id.clone(), config))?;
        log::info!("Orchestrator::create: simulation {} created", simulation_id);
        Ok(simulation_id)
    }

    /// Snapshot of one run.
    pub fn get(&self, simulation_id: &str) -> Option<RunState> {
        self.store.get(simulation_id)
    }

    /// Snapshots of every run, oldest first.
    pub fn list(&self) -> Vec<RunState> {
        self.store.list()
    }

    /// Start the turn loop for an idle run.
    ///
    /// Admission happens here, before any event is produced: a run that is already running
    /// is rejected with [`SimulationError::AlreadyRunning`], a completed or failed one with
    /// [`SimulationError::InvalidState`]. When the run already holds turns (after
    /// [`truncate_from`](Orchestrator::truncate_from)) both participants are rebuilt from
    /// them and the loop continues with the side that did not speak last.
    pub fn run(&self, simulation_id: &str) -> Result<EventStream, SimulationError> {
        let state = self.store.begin_run(simulation_id)?;
        log::info!(
            "Orchestrator::run: simulation {} starting at turn {} of {}",
            simulation_id,
            state.messages.len() + 1,
            state.config.max_turns
        );

        let store = Arc::clone(&self.store);
        let model = Arc::clone(&self.model);
        let judge = self.judge.clone();
        let handler = self.event_handler.clone();
        let mut guard = RunGuard::new(Arc::clone(&store), simulation_id);

        let events = async_stream::stream! {
            let simulation_id = state.simulation_id.clone();
            let config = state.config.clone();

            macro_rules! emit {
                ($event:expr) => {{
                    let event = $event;
                    if let Some(handler) = &handler {
                        handler.on_event(&simulation_id, &event).await;
                    }
                    yield event;
                }};
            }

            macro_rules! fail {
                ($err:expr) => {{
                    let message = $err.to_string();
                    log::error!(
                        "Orchestrator::run: simulation {} failed: {}",
                        simulation_id,
                        message
                    );
                    guard.disarm();
                    record_failure(&store, &simulation_id, &message);
                    emit!(SimulationEvent::Error { message });
                    return;
                }};
            }

            emit!(SimulationEvent::Status { status: RunStatus::Running });

            let mut candidate = Participant::new(Speaker::Candidate, config.candidate.clone());
            let mut sim = Participant::new(Speaker::Sim, config.sim.clone());
            let mut speaker = config.first_speaker;
            let mut incoming: Option<String> = None;

            if let Some(last) = state.messages.last() {
                // the side that spoke last has seen everything; the other side gets the
                // last turn as its incoming message, as in a live run
                let earlier = &state.messages[..state.messages.len() - 1];
                speaker = last.speaker.other();
                match speaker {
                    Speaker::Candidate => {
                        candidate.restore_from(earlier);
                        sim.restore_from(&state.messages);
                    }
                    Speaker::Sim => {
                        sim.restore_from(earlier);
                        candidate.restore_from(&state.messages);
                    }
                }
                incoming = Some(last.content.clone());
            }

            let mut turn_number = state.messages.len();
            while turn_number < config.max_turns {
                turn_number += 1;
                emit!(SimulationEvent::TurnStart { turn: turn_number, speaker });

                let participant = match speaker {
                    Speaker::Candidate => &mut candidate,
                    Speaker::Sim => &mut sim,
                };

                let mut turn = match participant
                    .produce_turn_streaming(model.as_ref(), incoming.as_deref())
                    .await
                {
                    Ok(turn) => turn,
                    Err(err) => fail!(err),
                };

                let mut failure: Option<BackendError> = None;
                let mut stop_after_turn = false;
                while let Some(item) = turn.next().await {
                    match item {
                        Ok(chunk) => {
                            let event = match chunk.kind {
                                ChunkKind::Content => SimulationEvent::ContentDelta {
                                    speaker,
                                    delta: chunk.delta,
                                    turn: turn_number,
                                },
                                ChunkKind::Reasoning => SimulationEvent::ReasoningDelta {
                                    speaker,
                                    delta: chunk.delta,
                                    turn: turn_number,
                                },
                            };
                            emit!(event);
                            if !stop_after_turn && turn.signals_completion() {
                                stop_after_turn = true;
                                log::debug!(
                                    "Orchestrator::run: simulation {} completion marker seen at turn {}",
                                    simulation_id,
                                    turn_number
                                );
                            }
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                if let Some(err) = failure {
                    fail!(err);
                }

                let output: TurnOutput = match turn.finish().await {
                    Ok(output) => output,
                    Err(err) => fail!(err),
                };

                let message = Turn::new(
                    speaker,
                    output.content.clone(),
                    output.reasoning.clone(),
                    turn_number,
                );
                record_turn(&store, &simulation_id, &message);
                emit!(SimulationEvent::MessageComplete { message, turn: turn_number });

                incoming = Some(output.content);
                speaker = speaker.other();

                if stop_after_turn || output.signals_completion {
                    log::info!(
                        "Orchestrator::run: simulation {} candidate requested verification at turn {}",
                        simulation_id,
                        turn_number
                    );
                    emit!(SimulationEvent::VerificationRequested);
                    break;
                }
            }

            emit!(SimulationEvent::VerificationStart);

            // judge what is stored, including edits made while the loop ran
            let transcript = store
                .get(&simulation_id)
                .map(|state| state.messages)
                .unwrap_or_default();
            let result = match judge
                .verify(
                    model.as_ref(),
                    &config.candidate.objective,
                    &config.verification_prompt,
                    &transcript,
                )
                .await
            {
                Ok(result) => result,
                Err(err) => fail!(err),
            };

            guard.disarm();
            let recorded = store.update(&simulation_id, |state| {
                state.verification_result = Some(result.clone());
                state.status = RunStatus::Completed;
                Ok(())
            });
            if let Err(err) = recorded {
                log::warn!("Orchestrator::run: could not record verdict: {}", err);
            }
            log::info!(
                "Orchestrator::run: simulation {} completed, success={}",
                simulation_id,
                result.success
            );

            emit!(SimulationEvent::VerificationComplete { result });
            emit!(SimulationEvent::SimulationComplete);
        };

        Ok(Box::pin(events))
    }

    /// Produce what `speaker` would say next, without storing it.
    ///
    /// The participant is rebuilt from the stored transcript; `content`, when given, is
    /// delivered to it as the incoming message first. The returned turn is numbered as the
    /// next index of the transcript.
    pub async fn run_single_turn(
        &self,
        simulation_id: &str,
        speaker: Speaker,
        content: Option<&str>,
    ) -> Result<Turn, SimulationError> {
        let state = self
            .store
            .get(simulation_id)
            .ok_or_else(|| SimulationError::NotFound(simulation_id.to_string()))?;

        let mut participant = Participant::new(speaker, state.config.participant(speaker).clone());
        participant.restore_from(&state.messages);

        log::debug!(
            "Orchestrator::run_single_turn: simulation {} previewing {} turn {}",
            simulation_id,
            speaker,
            state.messages.len() + 1
        );
        let output = participant.produce_turn(self.model.as_ref(), content).await?;
        Ok(Turn::new(
            speaker,
            output.content,
            output.reasoning,
            state.messages.len() + 1,
        ))
    }

    /// Replace the content of a stored turn, and its reasoning when `reasoning` is given
    /// (an empty string clears it). Every other turn is left untouched.
    pub fn update_turn(
        &self,
        simulation_id: &str,
        turn: usize,
        content: impl Into<String>,
        reasoning: Option<String>,
    ) -> Result<(), SimulationError> {
        let content = content.into();
        self.store.update(simulation_id, |state| {
            let message = state
                .messages
                .iter_mut()
                .find(|message| message.turn_number == turn)
                .ok_or_else(|| SimulationError::TurnNotFound {
                    simulation_id: simulation_id.to_string(),
                    turn,
                })?;
            message.content = content;
            if let Some(reasoning) = reasoning {
                message.reasoning = Some(reasoning).filter(|r| !r.is_empty());
            }
            Ok(())
        })
    }

    /// Drop every turn numbered `turn` or later, set the executed-turn counter to
    /// `turn - 1` and return the run to idle with its verdict cleared.
    pub fn truncate_from(&self, simulation_id: &str, turn: usize) -> Result<(), SimulationError> {
        if turn == 0 {
            return Err(SimulationError::InvalidConfig(
                "turn numbers start at 1".to_string(),
            ));
        }
        self.store.update(simulation_id, |state| {
            if state.status == RunStatus::Running {
                return Err(SimulationError::InvalidState {
                    simulation_id: simulation_id.to_string(),
                    status: state.status,
                });
            }
            state.messages.retain(|message| message.turn_number < turn);
            state.current_turn = turn - 1;
            state.status = RunStatus::Idle;
            state.verification_result = None;
            state.error = None;
            log::info!(
                "Orchestrator::truncate_from: simulation {} rewound to {} turns",
                simulation_id,
                state.messages.len()
            );
            Ok(())
        })
    }

    /// Append a previewed turn. Its number must be the next index of the transcript, the
    /// run must not be running and the turn budget must have room for it.
    ///
    /// The transcript changes, so any earlier verdict is cleared and the run goes back to
    /// [`RunStatus::Idle`], ready to be run or judged again.
    pub fn commit_turn(&self, simulation_id: &str, turn: Turn) -> Result<(), SimulationError> {
        self.store.update(simulation_id, |state| {
            if state.status == RunStatus::Running {
                return Err(SimulationError::InvalidState {
                    simulation_id: simulation_id.to_string(),
                    status: state.status,
                });
            }
            if state.messages.len() >= state.config.max_turns {
                return Err(SimulationError::InvalidConfig(format!(
                    "turn budget of {} is already used up",
                    state.config.max_turns
                )));
            }
            let expected = state.messages.len() + 1;
            if turn.turn_number != expected {
                return Err(SimulationError::InvalidConfig(format!(
                    "turn {} cannot be committed, next turn is {}",
                    turn.turn_number, expected
                )));
            }
            state.current_turn = turn.turn_number;
            state.messages.push(turn);
            state.status = RunStatus::Idle;
            state.verification_result = None;
            state.error = None;
            Ok(())
        })
    }
}

/// Marks a running run failed when its event stream is dropped before the loop reaches a
/// terminal event.
struct RunGuard {
    store: Arc<RunStore>,
    simulation_id: String,
    armed: bool,
}

impl RunGuard {
    fn new(store: Arc<RunStore>, simulation_id: &str) -> Self {
        RunGuard {
            store,
            simulation_id: simulation_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!(
            "Orchestrator::run: event stream for simulation {} dropped mid-run",
            self.simulation_id
        );
        let recorded = self.store.update(&self.simulation_id, |state| {
            if state.status == RunStatus::Running {
                state.status = RunStatus::Failed;
                state.error = Some("event stream dropped before the run finished".to_string());
            }
            Ok(())
        });
        if let Err(err) = recorded {
            log::warn!("Orchestrator::run: could not record dropped stream: {}", err);
        }
    }
}

fn record_turn(store: &RunStore, simulation_id: &str, turn: &Turn) {
    let recorded = store.update(simulation_id, |state| {
        state.messages.push(turn.clone());
        state.current_turn = turn.turn_number;
        Ok(())
    });
    if let Err(err) = recorded {
        log::warn!("Orchestrator::run: could not record turn {}: {}", turn.turn_number, err);
    }
}

fn record_failure(store: &RunStore, simulation_id: &str, message: &str) {
    let recorded = store.update(simulation_id, |state| {
        state.status = RunStatus::Failed;
        state.error = Some(message.to_string());
        Ok(())
    });
    if let Err(err) = recorded {
        log::warn!("Orchestrator::run: could not record failure: {}", err);
    }
}
