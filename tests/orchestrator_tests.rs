use agentsim::participant::START_DIRECTIVE;
use agentsim::simulation::{ParticipantConfig, RunConfig, RunStatus, Speaker, Turn};
use agentsim::{
    AgentSimConfig, BackendError, Chunk, ChunkStream, EventHandler, Generation,
    GenerationRequest, LanguageModel, Orchestrator, Role, RunStore, SimulationError,
    SimulationEvent,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};

const JUDGE_PREFIX: &str = "You are a verification system";

#[derive(Clone, Copy, PartialEq)]
enum Failure {
    /// The backend rejects the call outright.
    OnCall(usize),
    /// The backend emits one delta, then the stream breaks.
    MidStream(usize),
}

#[derive(Default)]
struct Script {
    candidate_signals_on: Option<usize>,
    sim_writes_marker: bool,
    failure: Option<Failure>,
    judge_fails: bool,
    /// Stream one character per delta instead of one word.
    char_chunks: bool,
}

/// Deterministic backend: replies "<side> message <n>" with "<side> private thought <n>" as
/// reasoning, and answers the judge with a positive verdict.
struct ScriptedModel {
    script: Script,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(ScriptedModel {
            script,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn participant_requests(&self, prefix: &str) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system_prompt.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn judge_requests(&self) -> Vec<GenerationRequest> {
        self.participant_requests(JUDGE_PREFIX)
    }

    /// Records the call; returns the reply and whether the stream should break midway.
    fn reply(&self, request: &GenerationRequest) -> Result<(Generation, bool), BackendError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(request.clone());

        if request.system_prompt.starts_with(JUDGE_PREFIX) {
            if self.script.judge_fails {
                return Err(BackendError::new("mock", "judge unavailable").with_status(529));
            }
            return Ok((
                Generation {
                    content: "SUCCESS: YES\nEXPLANATION: objective met".to_string(),
                    reasoning: None,
                },
                false,
            ));
        }

        let call_number = calls
            .iter()
            .filter(|r| !r.system_prompt.starts_with(JUDGE_PREFIX))
            .count();
        let mut break_midway = false;
        match self.script.failure {
            Some(Failure::OnCall(n)) if n == call_number => {
                return Err(BackendError::new("mock", "quota exceeded").with_status(429));
            }
            Some(Failure::MidStream(n)) if n == call_number => break_midway = true,
            _ => {}
        }

        let (side, prefix) = if request.system_prompt.starts_with("CANDIDATE") {
            ("candidate", "CANDIDATE")
        } else {
            ("sim", "SIM")
        };
        let nth = calls
            .iter()
            .filter(|r| r.system_prompt.starts_with(prefix))
            .count();

        let mut content = format!("{} message {}", side, nth);
        if side == "candidate" && self.script.candidate_signals_on == Some(nth) {
            content.push_str(" REQUEST_VERIFICATION final answer");
        }
        if side == "sim" && self.script.sim_writes_marker {
            content.push_str(" REQUEST_VERIFICATION");
        }

        Ok((
            Generation {
                content,
                reasoning: Some(format!("{} private thought {}", side, nth)),
            },
            break_midway,
        ))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        self.reply(request).map(|(generation, _)| generation)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, BackendError> {
        let (generation, break_midway) = self.reply(request)?;
        let mut chunks: Vec<Result<Chunk, BackendError>> = Vec::new();
        if let Some(reasoning) = generation.reasoning {
            chunks.push(Ok(Chunk::reasoning(reasoning)));
        }
        let pieces: Vec<String> = if self.script.char_chunks {
            generation.content.chars().map(String::from).collect()
        } else {
            generation
                .content
                .split_inclusive(' ')
                .map(String::from)
                .collect()
        };
        for piece in pieces {
            chunks.push(Ok(Chunk::content(piece)));
            if break_midway {
                chunks.push(Err(BackendError::new("mock", "connection reset")));
                break;
            }
        }
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

fn run_config(max_turns: usize) -> RunConfig {
    RunConfig::new(
        ParticipantConfig::new("CANDIDATE prompt", "Find out the favorite color.")
            .with_model("mock-model"),
        ParticipantConfig::new("SIM prompt", "Your favorite color is blue.")
            .with_model("mock-model"),
        "The candidate must learn the color is blue.",
    )
    .with_max_turns(max_turns)
}

fn orchestrator(model: Arc<ScriptedModel>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(RunStore::new()),
        model,
        &AgentSimConfig::default(),
    )
}

async fn run_to_end(orchestrator: &Orchestrator, id: &str) -> Vec<SimulationEvent> {
    orchestrator.run(id).unwrap().collect().await
}

/// Event kinds without the per-delta noise.
fn milestones(events: &[SimulationEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| e.kind())
        .filter(|kind| *kind != "content_delta" && *kind != "reasoning_delta")
        .collect()
}

#[tokio::test]
async fn test_turn_budget_numbering_and_alternation() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(4)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    assert_eq!(
        milestones(&events),
        vec![
            "status",
            "turn_start",
            "message_complete",
            "turn_start",
            "message_complete",
            "turn_start",
            "message_complete",
            "turn_start",
            "message_complete",
            "verification_start",
            "verification_complete",
            "simulation_complete",
        ]
    );

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.current_turn, 4);
    let numbers: Vec<usize> = state.messages.iter().map(|t| t.turn_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    let speakers: Vec<Speaker> = state.messages.iter().map(|t| t.speaker).collect();
    assert_eq!(
        speakers,
        vec![Speaker::Candidate, Speaker::Sim, Speaker::Candidate, Speaker::Sim]
    );
    assert_eq!(state.messages[2].content, "candidate message 2");
    assert_eq!(
        state.messages[2].reasoning.as_deref(),
        Some("candidate private thought 2")
    );

    let verdict = state.verification_result.unwrap();
    assert!(verdict.success);
    assert_eq!(verdict.explanation, "objective met");
    assert_eq!(model.judge_requests().len(), 1);
}

#[tokio::test]
async fn test_sim_can_open_the_conversation() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator
        .create(run_config(3).with_first_speaker(Speaker::Sim))
        .unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    assert!(matches!(
        events[1],
        SimulationEvent::TurnStart {
            turn: 1,
            speaker: Speaker::Sim
        }
    ));

    let sim_requests = model.participant_requests("SIM");
    assert_eq!(sim_requests[0].history.len(), 1);
    assert_eq!(&*sim_requests[0].history[0].content, START_DIRECTIVE);

    let state = orchestrator.get(&id).unwrap();
    let speakers: Vec<Speaker> = state.messages.iter().map(|t| t.speaker).collect();
    assert_eq!(speakers, vec![Speaker::Sim, Speaker::Candidate, Speaker::Sim]);
}

#[tokio::test]
async fn test_completion_signal_stops_the_loop() {
    let model = ScriptedModel::new(Script {
        candidate_signals_on: Some(2),
        ..Script::default()
    });
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(10)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let kinds = milestones(&events);
    assert_eq!(
        &kinds[kinds.len() - 5..],
        &[
            "message_complete",
            "verification_requested",
            "verification_start",
            "verification_complete",
            "simulation_complete",
        ]
    );

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 3);
    assert_eq!(state.current_turn, 3);
    assert!(state.messages[2].content.contains("REQUEST_VERIFICATION"));
    assert_eq!(state.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_sim_cannot_trigger_verification() {
    let model = ScriptedModel::new(Script {
        sim_writes_marker: true,
        ..Script::default()
    });
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    assert!(!milestones(&events).contains(&"verification_requested"));
    assert_eq!(orchestrator.get(&id).unwrap().messages.len(), 4);
}

#[tokio::test]
async fn test_deltas_arrive_in_order_and_rebuild_the_turn() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(1)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let mut content = String::new();
    let mut reasoning = String::new();
    for event in &events {
        match event {
            SimulationEvent::ContentDelta { delta, turn, speaker } => {
                assert_eq!(*turn, 1);
                assert_eq!(*speaker, Speaker::Candidate);
                content.push_str(delta);
            }
            SimulationEvent::ReasoningDelta { delta, .. } => reasoning.push_str(delta),
            _ => {}
        }
    }
    assert_eq!(content, "candidate message 1");
    assert_eq!(reasoning, "candidate private thought 1");

    let completed = events
        .iter()
        .find_map(|e| match e {
            SimulationEvent::MessageComplete { message, .. } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(completed.content, content);
    assert_eq!(completed.reasoning.as_deref(), Some(reasoning.as_str()));
}

#[tokio::test]
async fn test_reasoning_stays_private_but_reaches_the_judge() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(4)).unwrap();
    run_to_end(&orchestrator, &id).await;

    for request in model.participant_requests("SIM") {
        for entry in &request.history {
            assert!(!entry.content.contains("candidate private thought"));
            if entry.role == Role::Incoming {
                assert!(entry.content.starts_with("[MCP REQUEST]\n"));
            }
        }
    }
    for request in model.participant_requests("CANDIDATE") {
        assert!(request
            .history
            .iter()
            .all(|entry| !entry.content.contains("sim private thought")));
    }

    let judge = &model.judge_requests()[0];
    assert_eq!(judge.temperature, 0.0);
    assert_eq!(judge.max_output_tokens, 2048);
    let transcript = &judge.history[0].content;
    assert!(transcript.starts_with("Here is the conversation to verify:\n\n[CANDIDATE - Turn 1]"));
    assert!(transcript.contains("[SIM Internal Reasoning: sim private thought 1]"));
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(2)).unwrap();

    let first = orchestrator.run(&id).unwrap();
    assert_eq!(orchestrator.get(&id).unwrap().status, RunStatus::Running);
    assert!(matches!(
        orchestrator.run(&id),
        Err(SimulationError::AlreadyRunning(_))
    ));

    let events: Vec<SimulationEvent> = first.collect().await;
    assert_eq!(events.last(), Some(&SimulationEvent::SimulationComplete));
    // one loop only: two participant turns plus the judge
    assert_eq!(model.calls.lock().unwrap().len(), 3);

    assert!(matches!(
        orchestrator.run(&id),
        Err(SimulationError::InvalidState {
            status: RunStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        orchestrator.run("missing"),
        Err(SimulationError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_backend_failure_fails_the_run() {
    let model = ScriptedModel::new(Script {
        failure: Some(Failure::OnCall(2)),
        ..Script::default()
    });
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(4)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    match events.last() {
        Some(SimulationEvent::Error { message }) => assert!(message.contains("quota exceeded")),
        other => panic!("expected a terminal error event, got {:?}", other),
    }
    assert!(!milestones(&events).contains(&"verification_start"));
    assert!(model.judge_requests().is_empty());

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.messages.len(), 1);
    assert!(state.error.unwrap().contains("HTTP 429"));
    assert!(state.verification_result.is_none());

    // a failed run has to be rewound before it runs again
    assert!(matches!(
        orchestrator.run(&id),
        Err(SimulationError::InvalidState {
            status: RunStatus::Failed,
            ..
        })
    ));
    orchestrator.truncate_from(&id, 2).unwrap();
    let events = run_to_end(&orchestrator, &id).await;
    assert_eq!(events.last(), Some(&SimulationEvent::SimulationComplete));
    assert_eq!(orchestrator.get(&id).unwrap().messages.len(), 4);
}

#[tokio::test]
async fn test_mid_stream_failure_discards_the_partial_turn() {
    let model = ScriptedModel::new(Script {
        failure: Some(Failure::MidStream(1)),
        ..Script::default()
    });
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec!["status", "turn_start", "reasoning_delta", "content_delta", "error"]
    );

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.messages.is_empty());
}

#[tokio::test]
async fn test_judge_failure_fails_the_run() {
    let model = ScriptedModel::new(Script {
        judge_fails: true,
        ..Script::default()
    });
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(2)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let kinds = milestones(&events);
    assert_eq!(&kinds[kinds.len() - 2..], &["verification_start", "error"]);

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.messages.len(), 2);
    assert!(state.verification_result.is_none());
}

#[tokio::test]
async fn test_update_turn() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(3)).unwrap();
    run_to_end(&orchestrator, &id).await;
    let before = orchestrator.get(&id).unwrap();

    orchestrator
        .update_turn(&id, 2, "edited", Some("edited thought".to_string()))
        .unwrap();
    let after = orchestrator.get(&id).unwrap();
    assert_eq!(after.messages[1].content, "edited");
    assert_eq!(after.messages[1].reasoning.as_deref(), Some("edited thought"));
    assert_eq!(after.messages[0], before.messages[0]);
    assert_eq!(after.messages[2], before.messages[2]);

    // content only: reasoning is kept
    orchestrator.update_turn(&id, 1, "again", None).unwrap();
    let after = orchestrator.get(&id).unwrap();
    assert_eq!(after.messages[0].content, "again");
    assert_eq!(after.messages[0].reasoning, before.messages[0].reasoning);

    assert_eq!(
        orchestrator.update_turn(&id, 9, "x", None),
        Err(SimulationError::TurnNotFound {
            simulation_id: id.clone(),
            turn: 9
        })
    );
    assert!(orchestrator
        .update_turn("missing", 1, "x", None)
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_truncate_from() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();
    run_to_end(&orchestrator, &id).await;

    orchestrator.truncate_from(&id, 3).unwrap();
    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.current_turn, 2);
    assert_eq!(state.status, RunStatus::Idle);
    assert!(state.verification_result.is_none());

    orchestrator.truncate_from(&id, 1).unwrap();
    let state = orchestrator.get(&id).unwrap();
    assert!(state.messages.is_empty());
    assert_eq!(state.current_turn, 0);

    assert!(matches!(
        orchestrator.truncate_from(&id, 0),
        Err(SimulationError::InvalidConfig(_))
    ));

    let _running = orchestrator.run(&id).unwrap();
    assert!(orchestrator.truncate_from(&id, 1).unwrap_err().is_invalid_state());
}

#[tokio::test]
async fn test_resume_after_truncation() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model.clone());
    let id = orchestrator.create(run_config(4)).unwrap();
    run_to_end(&orchestrator, &id).await;
    orchestrator.truncate_from(&id, 3).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    assert!(matches!(
        events[1],
        SimulationEvent::TurnStart {
            turn: 3,
            speaker: Speaker::Candidate
        }
    ));

    let state = orchestrator.get(&id).unwrap();
    let numbers: Vec<usize> = state.messages.iter().map(|t| t.turn_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(state.status, RunStatus::Completed);

    // the resumed candidate sees exactly what a live run would have shown it
    let candidate_requests = model.participant_requests("CANDIDATE");
    let resumed = &candidate_requests[candidate_requests.len() - 1];
    let roles: Vec<Role> = resumed.history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Incoming, Role::Own, Role::Incoming]);
    assert_eq!(&*resumed.history[0].content, START_DIRECTIVE);
    assert_eq!(&*resumed.history[1].content, "candidate message 1");
    assert_eq!(&*resumed.history[2].content, "[MCP REQUEST]\nsim message 1");
}

#[tokio::test]
async fn test_single_turn_preview_and_commit() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();
    run_to_end(&orchestrator, &id).await;
    orchestrator.truncate_from(&id, 3).unwrap();

    let preview = orchestrator
        .run_single_turn(&id, Speaker::Candidate, Some("What about green?"))
        .await
        .unwrap();
    assert_eq!(preview.turn_number, 3);
    assert_eq!(preview.speaker, Speaker::Candidate);
    assert_eq!(orchestrator.get(&id).unwrap().messages.len(), 2);

    orchestrator.commit_turn(&id, preview.clone()).unwrap();
    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 3);
    assert_eq!(state.current_turn, 3);
    assert_eq!(state.status, RunStatus::Idle);

    assert!(matches!(
        orchestrator.commit_turn(&id, preview),
        Err(SimulationError::InvalidConfig(_))
    ));
    assert!(matches!(
        orchestrator
            .run_single_turn("missing", Speaker::Sim, None)
            .await,
        Err(SimulationError::NotFound(_))
    ));

    // the committed turn is picked up when the run continues
    let events = run_to_end(&orchestrator, &id).await;
    assert!(matches!(
        events[1],
        SimulationEvent::TurnStart {
            turn: 4,
            speaker: Speaker::Sim
        }
    ));
    assert_eq!(orchestrator.get(&id).unwrap().messages.len(), 4);
}

#[tokio::test]
async fn test_commit_respects_turn_budget() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(2)).unwrap();
    run_to_end(&orchestrator, &id).await;

    let preview = orchestrator
        .run_single_turn(&id, Speaker::Candidate, None)
        .await
        .unwrap();
    assert_eq!(preview.turn_number, 3);
    assert!(matches!(
        orchestrator.commit_turn(&id, preview),
        Err(SimulationError::InvalidConfig(_))
    ));

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.verification_result.is_some());
}

#[tokio::test]
async fn test_commit_onto_completed_run_clears_verdict() {
    let model = ScriptedModel::new(Script {
        candidate_signals_on: Some(1),
        ..Script::default()
    });
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();
    run_to_end(&orchestrator, &id).await;
    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 1);
    assert!(state.verification_result.is_some());

    let preview = orchestrator
        .run_single_turn(&id, Speaker::Sim, None)
        .await
        .unwrap();
    orchestrator.commit_turn(&id, preview).unwrap();
    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.status, RunStatus::Idle);
    assert!(state.verification_result.is_none());

    let events = run_to_end(&orchestrator, &id).await;
    assert_eq!(events.last(), Some(&SimulationEvent::SimulationComplete));
    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.messages.len(), 4);
    assert!(state.verification_result.is_some());
}

#[tokio::test]
async fn test_dropping_the_stream_fails_the_run() {
    let model = ScriptedModel::new(Script::default());
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(4)).unwrap();

    let mut events = orchestrator.run(&id).unwrap();
    while let Some(event) = events.next().await {
        if event.kind() == "turn_start" {
            break;
        }
    }
    drop(events);

    let state = orchestrator.get(&id).unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.error.unwrap().contains("dropped"));
    assert!(matches!(
        orchestrator.run(&id),
        Err(SimulationError::InvalidState {
            status: RunStatus::Failed,
            ..
        })
    ));

    orchestrator.truncate_from(&id, 1).unwrap();
    let events = run_to_end(&orchestrator, &id).await;
    assert_eq!(events.last(), Some(&SimulationEvent::SimulationComplete));
    assert_eq!(orchestrator.get(&id).unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_dropping_an_unpolled_stream_fails_the_run() {
    let orchestrator = orchestrator(ScriptedModel::new(Script::default()));
    let id = orchestrator.create(run_config(2)).unwrap();

    let events = orchestrator.run(&id).unwrap();
    assert_eq!(orchestrator.get(&id).unwrap().status, RunStatus::Running);
    drop(events);

    assert_eq!(orchestrator.get(&id).unwrap().status, RunStatus::Failed);
    assert!(orchestrator.truncate_from(&id, 1).is_ok());
}

#[tokio::test]
async fn test_completion_marker_split_across_deltas() {
    let model = ScriptedModel::new(Script {
        candidate_signals_on: Some(1),
        char_chunks: true,
        ..Script::default()
    });
    let orchestrator = orchestrator(model);
    let id = orchestrator.create(run_config(6)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let deltas = events.iter().filter(|e| e.kind() == "content_delta").count();
    assert!(deltas > "REQUEST_VERIFICATION".len());
    let kinds = milestones(&events);
    assert_eq!(
        &kinds[..4],
        &["status", "turn_start", "message_complete", "verification_requested"]
    );
    assert_eq!(orchestrator.get(&id).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_create_validates_config() {
    let orchestrator = orchestrator(ScriptedModel::new(Script::default()));
    let mut config = run_config(2);
    config.candidate.max_tokens = 0;
    assert!(matches!(
        orchestrator.create(config),
        Err(SimulationError::InvalidConfig(_))
    ));
    assert!(orchestrator.list().is_empty());

    let first = orchestrator.create(run_config(2)).unwrap();
    let second = orchestrator.create(run_config(2)).unwrap();
    assert_ne!(first, second);
    assert_eq!(orchestrator.list().len(), 2);
}

struct Recorder {
    seen: Mutex<Vec<(String, &'static str)>>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_event(&self, simulation_id: &str, event: &SimulationEvent) {
        self.seen
            .lock()
            .unwrap()
            .push((simulation_id.to_string(), event.kind()));
    }
}

#[tokio::test]
async fn test_event_handler_sees_every_event() {
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = orchestrator(ScriptedModel::new(Script::default()))
        .with_event_handler(recorder.clone());
    let id = orchestrator.create(run_config(2)).unwrap();

    let events = run_to_end(&orchestrator, &id).await;
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), events.len());
    for ((run, kind), event) in seen.iter().zip(&events) {
        assert_eq!(run, &id);
        assert_eq!(*kind, event.kind());
    }
}

#[tokio::test]
async fn test_message_complete_serializes_like_the_transcript() {
    let orchestrator = orchestrator(ScriptedModel::new(Script::default()));
    let id = orchestrator.create(run_config(1)).unwrap();
    let events = run_to_end(&orchestrator, &id).await;

    let message: Turn = orchestrator.get(&id).unwrap().messages[0].clone();
    let event = events
        .iter()
        .find(|e| e.kind() == "message_complete")
        .unwrap();
    let json = serde_json::to_value(event).unwrap();
    assert_eq!(json["turn"], 1);
    assert_eq!(json["message"]["role"], "candidate");
    assert_eq!(json["message"]["content"], message.content.as_str());
}
