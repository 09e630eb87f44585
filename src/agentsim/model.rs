//! A [`LanguageModel`] is the capability that turns a system prompt plus a message history
//! into text. It does not keep track of the conversation; that is the job of a
//! [`Participant`](crate::Participant), which owns one side's history and uses a
//! `LanguageModel` to produce each turn.

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// Who authored a history entry, from the point of view of the participant that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Something the other side said (or the start directive); sent as `user`.
    #[serde(rename = "incoming")]
    Incoming,
    /// Something this participant produced itself; sent as `assistant`.
    #[serde(rename = "self")]
    Own,
}

impl Role {
    /// The tag used in a participant's private history.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Incoming => "incoming",
            Role::Own => "self",
        }
    }

    /// The chat-completion role a provider expects for this entry.
    pub fn as_provider_role(&self) -> &'static str {
        match self {
            Role::Incoming => "user",
            Role::Own => "assistant",
        }
    }
}

/// One entry in a participant's history.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message. Stored as `Arc<str>` so cloning histories is cheap.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Message {
            role,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Everything a backend needs to produce one reply.
///
/// The model identifier is an opaque string; nothing in the orchestration core interprets
/// it beyond passing it through. Routing on it is the [`ModelRegistry`](crate::ModelRegistry)'s
/// business.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// A completed, buffered reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generation {
    pub content: String,
    /// Private reasoning ("thinking") text, when the provider exposes it.
    pub reasoning: Option<String>,
}

/// Which buffer a streamed delta belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Content,
    Reasoning,
}

/// Represents one incremental piece of a streaming reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub delta: String,
}

impl Chunk {
    pub fn content(delta: impl Into<String>) -> Self {
        Chunk {
            kind: ChunkKind::Content,
            delta: delta.into(),
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Chunk {
            kind: ChunkKind::Reasoning,
            delta: delta.into(),
        }
    }
}

/// A lazy, finite, non-restartable sequence of deltas. Terminates normally at the end of
/// generation; a failure surfaces as an `Err` item.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, BackendError>> + Send>>;

/// A language-model call failed: transport, provider rejection, quota, or an undecodable
/// reply. Participants and the judge propagate it unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendError {
    /// Short provider tag, e.g. `"openai"` or `"anthropic"`.
    pub provider: String,
    pub message: String,
    /// HTTP status code, when the failure came back from the provider.
    pub status: Option<u16>,
}

impl BackendError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError {
            provider: provider.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "{} backend error (HTTP {}): {}",
                self.provider, status, self.message
            ),
            None => write!(f, "{} backend error: {}", self.provider, self.message),
        }
    }
}

impl Error for BackendError {}

/// Trait defining the interface to a language-model provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a complete reply in one call.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError>;

    /// Produce the reply incrementally. Each item is forwarded as soon as the provider
    /// emits it.
    ///
    /// The default implementation falls back to [`generate`](LanguageModel::generate) and
    /// replays the result as at most two chunks, so providers without streaming still work
    /// with the turn loop.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, BackendError> {
        let generation = self.generate(request).await?;
        let mut chunks: Vec<Result<Chunk, BackendError>> = Vec::with_capacity(2);
        if let Some(reasoning) = generation.reasoning.filter(|r| !r.is_empty()) {
            chunks.push(Ok(Chunk::reasoning(reasoning)));
        }
        chunks.push(Ok(Chunk::content(generation.content)));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    /// Provider tag used in logs and error messages.
    fn provider_name(&self) -> &str;
}
