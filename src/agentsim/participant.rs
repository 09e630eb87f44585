//! One side of a conversation.
//!
//! A [`Participant`] owns a private view of the run: the ordered history of entries it has
//! seen (its own turns as [`Role::Own`], everything handed to it as [`Role::Incoming`]) and
//! the reasoning fragments it produced. The other side's reasoning never enters this view.
//!
//! Turns are produced either in one call ([`Participant::produce_turn`]) or incrementally
//! ([`Participant::produce_turn_streaming`]). Both paths prepare the same request and commit
//! the same end state, so for a deterministic backend they are interchangeable.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentsim::{ModelRegistry, AgentSimConfig, Participant};
//! use agentsim::simulation::{ParticipantConfig, Speaker};
//! use futures_util::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let models = ModelRegistry::from_config(&AgentSimConfig::from_env());
//! let mut candidate = Participant::new(
//!     Speaker::Candidate,
//!     ParticipantConfig::new("You are persuasive.", "Get a discount."),
//! );
//!
//! let mut turn = candidate.produce_turn_streaming(&models, None).await?;
//! while let Some(chunk) = turn.next().await {
//!     print!("{}", chunk?.delta);
//! }
//! let output = turn.finish().await?;
//! println!("\nwants judging: {}", output.signals_completion);
//! # Ok(())
//! # }
//! ```

use crate::agentsim::envelope::Envelope;
use crate::agentsim::model::{
    BackendError, Chunk, ChunkKind, ChunkStream, GenerationRequest, LanguageModel, Message, Role,
};
use crate::agentsim::simulation::{ParticipantConfig, Speaker, Turn};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// In-band phrase the candidate writes to ask for the conversation to be judged.
pub const COMPLETION_MARKER: &str = "REQUEST_VERIFICATION";

/// Seeded into an empty history so the first speaker of a run has something to answer.
pub const START_DIRECTIVE: &str =
    "Begin working on your objective. You may start the conversation.";

/// The committed result of one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutput {
    pub content: String,
    pub reasoning: Option<String>,
    /// `true` iff this is the candidate and `content` contains [`COMPLETION_MARKER`].
    pub signals_completion: bool,
}

/// One side's private conversational context.
#[derive(Clone, Debug)]
pub struct Participant {
    speaker: Speaker,
    config: ParticipantConfig,
    history: Vec<Message>,
    reasoning_log: Vec<String>,
}

impl Participant {
    pub fn new(speaker: Speaker, config: ParticipantConfig) -> Self {
        Participant {
            speaker,
            config,
            history: Vec::new(),
            reasoning_log: Vec::new(),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn reasoning_log(&self) -> &[String] {
        &self.reasoning_log
    }

    /// Base prompt, objective framing and protocol explanation. The candidate also learns
    /// how to request verification.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "{}\n\nYOUR OBJECTIVE:\n{}\n\nCOMMUNICATION PROTOCOL:\n\
             You are talking to another agent. Each of its messages reaches you wrapped in an \
             [MCP ...] envelope, and everything you write is delivered to it.\n",
            self.config.system_prompt, self.config.objective
        );
        if self.speaker == Speaker::Candidate {
            prompt.push_str(&format!(
                "\nVERIFICATION:\n\
                 Once you believe your objective is met and you have what you need, include the \
                 phrase \"{}\" in your reply, followed by your final answer or conclusion. \
                 The conversation will then be judged.\n",
                COMPLETION_MARKER
            ));
        }
        prompt
    }

    /// Whether `content` carries the completion signal for this side.
    pub fn signals_completion(&self, content: &str) -> bool {
        self.speaker == Speaker::Candidate && content.contains(COMPLETION_MARKER)
    }

    /// Produce the next turn with a single backend call.
    pub async fn produce_turn(
        &mut self,
        model: &dyn LanguageModel,
        incoming: Option<&str>,
    ) -> Result<TurnOutput, BackendError> {
        let request = self.prepare(incoming);
        log::debug!(
            "Participant::produce_turn: {} calling {} with {} history entries",
            self.speaker,
            request.model,
            request.history.len()
        );
        let generation = model.generate(&request).await?;
        Ok(self.commit(generation.content, generation.reasoning.unwrap_or_default()))
    }

    /// Produce the next turn incrementally.
    ///
    /// The returned [`TurnStream`] yields every delta as soon as the backend emits it.
    /// Call [`TurnStream::finish`] once the caller is done to commit the turn.
    pub async fn produce_turn_streaming(
        &mut self,
        model: &dyn LanguageModel,
        incoming: Option<&str>,
    ) -> Result<TurnStream<'_>, BackendError> {
        let request = self.prepare(incoming);
        log::debug!(
            "Participant::produce_turn_streaming: {} streaming from {} with {} history entries",
            self.speaker,
            request.model,
            request.history.len()
        );
        let inner = model.generate_stream(&request).await?;
        Ok(TurnStream {
            participant: self,
            inner,
            content: String::new(),
            reasoning: String::new(),
        })
    }

    /// Append an utterance from the other side, framed as a request envelope.
    pub fn receive(&mut self, text: &str) {
        let framed = Envelope::request(text)
            .map(|envelope| envelope.render())
            .unwrap_or_else(|_| text.to_string());
        self.history.push(Message::new(Role::Incoming, framed));
    }

    /// Rebuild this side's context from a stored transcript.
    ///
    /// Own turns come back as [`Role::Own`] along with their reasoning; the other side's turns
    /// come back as incoming envelopes without theirs. When this side opened the transcript
    /// the start directive is restored in front, matching what a live run would have seen.
    pub fn restore_from(&mut self, turns: &[Turn]) {
        self.reset();
        if turns.first().map(|t| t.speaker) == Some(self.speaker) {
            self.history.push(Message::new(Role::Incoming, START_DIRECTIVE));
        }
        for turn in turns {
            if turn.speaker == self.speaker {
                self.history.push(Message::new(Role::Own, &turn.content));
                if let Some(reasoning) = turn.reasoning.as_deref().filter(|r| !r.is_empty()) {
                    self.reasoning_log.push(reasoning.to_string());
                }
            } else {
                self.receive(&turn.content);
            }
        }
    }

    /// Clear history and reasoning log.
    pub fn reset(&mut self) {
        self.history.clear();
        self.reasoning_log.clear();
    }

    fn prepare(&mut self, incoming: Option<&str>) -> GenerationRequest {
        match incoming.filter(|text| !text.is_empty()) {
            Some(text) => self.receive(text),
            None if self.history.is_empty() => {
                self.history
                    .push(Message::new(Role::Incoming, START_DIRECTIVE));
            }
            None => {}
        }

        GenerationRequest {
            model: self.config.model.clone(),
            system_prompt: self.system_prompt(),
            history: self.history.clone(),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_tokens,
        }
    }

    fn commit(&mut self, content: String, reasoning: String) -> TurnOutput {
        self.history.push(Message::new(Role::Own, &content));
        let reasoning = if reasoning.is_empty() {
            None
        } else {
            self.reasoning_log.push(reasoning.clone());
            Some(reasoning)
        };
        let signals_completion = self.signals_completion(&content);
        TurnOutput {
            content,
            reasoning,
            signals_completion,
        }
    }
}

/// An in-flight streaming turn.
///
/// Yields `Chunk`s tagged content or reasoning, accumulating both buffers as they pass.
/// The completion signal is a predicate over the accumulated content
/// ([`TurnStream::signals_completion`]) rather than a flag carried by each item, so a consumer
/// can notice it mid-stream, before generation ends.
pub struct TurnStream<'p> {
    participant: &'p mut Participant,
    inner: ChunkStream,
    content: String,
    reasoning: String,
}

impl<'p> TurnStream<'p> {
    pub fn speaker(&self) -> Speaker {
        self.participant.speaker
    }

    /// Content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Reasoning accumulated so far.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Re-scans the accumulated content for the completion marker.
    pub fn signals_completion(&self) -> bool {
        self.participant.signals_completion(&self.content)
    }

    /// Drain whatever the caller did not consume, then commit the full content to history
    /// exactly once and any non-empty reasoning to the reasoning log.
    pub async fn finish(mut self) -> Result<TurnOutput, BackendError> {
        while let Some(item) = self.next().await {
            item?;
        }
        let TurnStream {
            participant,
            content,
            reasoning,
            ..
        } = self;
        Ok(participant.commit(content, reasoning))
    }
}

impl Stream for TurnStream<'_> {
    type Item = Result<Chunk, BackendError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                match chunk.kind {
                    ChunkKind::Content => this.content.push_str(&chunk.delta),
                    ChunkKind::Reasoning => this.reasoning.push_str(&chunk.delta),
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
