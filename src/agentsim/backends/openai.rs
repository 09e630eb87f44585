//! OpenAI-compatible chat-completions backend.
//!
//! Buffered calls go through the `openai-rust2` client; streamed calls post the same chat
//! payload with `"stream": true` over the pooled `reqwest` client and decode the
//! `text/event-stream` body, so the resulting [`ChunkStream`] can be moved across tasks.
//!
//! Any endpoint that speaks the `/v1/chat/completions` dialect works; point
//! [`OpenAiBackend::new_with_base_url`] at it. Endpoints that stream a
//! `reasoning_content` delta (several self-hosted reasoning models do) get it surfaced as
//! reasoning chunks.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentsim::backends::openai::OpenAiBackend;
//! use agentsim::{GenerationRequest, LanguageModel, Message, Role};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = std::env::var("OPENAI_API_KEY")?;
//! let backend = OpenAiBackend::new(&key);
//! let reply = backend
//!     .generate(&GenerationRequest {
//!         model: "gpt-4".to_string(),
//!         system_prompt: "You are terse.".to_string(),
//!         history: vec![Message::new(Role::Incoming, "Say hi.")],
//!         temperature: 0.2,
//!         max_output_tokens: 64,
//!     })
//!     .await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

use crate::agentsim::backends::http_pool::get_http_client;
use crate::agentsim::backends::sse::{check_status, data_stream};
use crate::agentsim::config::DEFAULT_OPENAI_BASE_URL;
use crate::agentsim::model::{
    BackendError, Chunk, ChunkStream, Generation, GenerationRequest, LanguageModel,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "openai";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Backend for OpenAI and OpenAI-compatible endpoints.
pub struct OpenAiBackend {
    client: openai_rust::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    /// Construct a backend for the public OpenAI endpoint.
    pub fn new(secret_key: &str) -> Self {
        Self::new_with_base_url(secret_key, DEFAULT_OPENAI_BASE_URL)
    }

    /// Construct a backend targeting a custom OpenAI-compatible base URL. A trailing `/v1`
    /// is accepted and ignored.
    pub fn new_with_base_url(secret_key: &str, base_url: &str) -> Self {
        let base_url = normalize_base_url(base_url);
        OpenAiBackend {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_http_client(&base_url),
                &base_url,
            ),
            api_key: secret_key.to_string(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The system prompt followed by the history, in chat-completions roles.
    fn chat_messages(request: &GenerationRequest) -> Vec<chat::Message> {
        let mut formatted_messages = Vec::with_capacity(request.history.len() + 1);
        formatted_messages.push(chat::Message {
            role: "system".to_owned(),
            content: request.system_prompt.clone(),
        });
        for msg in &request.history {
            formatted_messages.push(chat::Message {
                role: msg.role.as_provider_role().to_owned(),
                content: msg.content.to_string(),
            });
        }
        formatted_messages
    }

    fn stream_body(request: &GenerationRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = Self::chat_messages(request)
            .into_iter()
            .map(|msg| json!({"role": msg.role, "content": msg.content}))
            .collect();
        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "stream": true,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let mut chat_arguments =
            chat::ChatArguments::new(&request.model, Self::chat_messages(request));
        chat_arguments.temperature = Some(request.temperature);
        chat_arguments.max_tokens = Some(request.max_output_tokens);

        let response = self
            .client
            .create_chat(chat_arguments, Some(CHAT_COMPLETIONS_PATH.to_string()))
            .await
            .map_err(|err| {
                log::error!(
                    "OpenAiBackend::generate(...): OpenAI API Error: {}",
                    err
                );
                BackendError::new(PROVIDER, err.to_string())
            })?;

        let content = response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| BackendError::new(PROVIDER, "response contained no choices"))?;

        Ok(Generation {
            content,
            reasoning: None,
        })
    }

    /// `openai-rust2`'s chat stream is not `Send`, so the same chat payload is posted over
    /// the pooled `reqwest` client and its event stream decoded here instead.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, BackendError> {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let response = get_http_client(&self.base_url)
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::stream_body(request))
            .send()
            .await
            .map_err(|err| BackendError::new(PROVIDER, err.to_string()))?;
        let response = check_status(response, PROVIDER).await?;

        let payloads = data_stream(response, PROVIDER);
        let chunks = payloads.flat_map(|payload| {
            let chunks: Vec<Result<Chunk, BackendError>> = match payload {
                Ok(data) => decode_stream_payload(&data).into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            };
            futures_util::stream::iter(chunks)
        });
        Ok(Box::pin(chunks))
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Map one `data:` payload to zero, one or two chunks. Undecodable payloads are skipped.
fn decode_stream_payload(data: &str) -> Vec<Chunk> {
    let payload: StreamPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(err) => {
            log::debug!("OpenAiBackend: skipping undecodable stream payload: {}", err);
            return Vec::new();
        }
    };
    let mut chunks = Vec::new();
    if let Some(choice) = payload.choices.into_iter().next() {
        if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
            chunks.push(Chunk::reasoning(reasoning));
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            chunks.push(Chunk::content(content));
        }
    }
    chunks
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}
