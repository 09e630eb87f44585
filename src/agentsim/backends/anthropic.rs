//! Anthropic Messages API backend.
//!
//! Speaks the native `/v1/messages` endpoint so that extended-thinking output comes back as
//! reasoning rather than being folded into the visible content. Streaming decodes the
//! `content_block_delta` events: `text_delta` becomes content, `thinking_delta` becomes
//! reasoning, everything else is bookkeeping and is skipped.

use crate::agentsim::backends::http_pool::get_http_client;
use crate::agentsim::backends::sse::{check_status, data_stream};
use crate::agentsim::config::DEFAULT_ANTHROPIC_BASE_URL;
use crate::agentsim::model::{
    BackendError, Chunk, ChunkStream, Generation, GenerationRequest, LanguageModel, Role,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER: &str = "anthropic";
const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for Anthropic's Claude models.
pub struct AnthropicBackend {
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(secret_key: &str) -> Self {
        Self::new_with_base_url(secret_key, DEFAULT_ANTHROPIC_BASE_URL)
    }

    pub fn new_with_base_url(secret_key: &str, base_url: &str) -> Self {
        AnthropicBackend {
            api_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Request body for `/v1/messages`. The API wants strictly alternating roles, so
    /// consecutive entries from the same side are joined with a blank line.
    fn request_body(request: &GenerationRequest, stream: bool) -> Value {
        let mut messages: Vec<(Role, String)> = Vec::with_capacity(request.history.len());
        for msg in &request.history {
            match messages.last_mut() {
                Some((role, content)) if *role == msg.role => {
                    content.push_str("\n\n");
                    content.push_str(&msg.content);
                }
                _ => messages.push((msg.role, msg.content.to_string())),
            }
        }
        let messages: Vec<Value> = messages
            .into_iter()
            .map(|(role, content)| json!({"role": role.as_provider_role(), "content": content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "system": request.system_prompt,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, BackendError> {
        let response = get_http_client(&self.base_url)
            .post(format!("{}{}", self.base_url, MESSAGES_PATH))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::new(PROVIDER, err.to_string()))?;
        check_status(response, PROVIDER).await
    }
}

#[async_trait]
impl LanguageModel for AnthropicBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let response = self.post(&Self::request_body(request, false)).await?;
        let reply: MessagesResponse = response.json().await.map_err(|err| {
            log::error!("AnthropicBackend::generate(...): undecodable reply: {}", err);
            BackendError::new(PROVIDER, err.to_string())
        })?;
        Ok(reply.into_generation())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, BackendError> {
        let response = self.post(&Self::request_body(request, true)).await?;
        let payloads = data_stream(response, PROVIDER);
        let chunks = payloads.filter_map(|payload| async move {
            match payload {
                Ok(data) => decode_stream_event(&data).transpose(),
                Err(err) => Some(Err(err)),
            }
        });
        Ok(Box::pin(chunks))
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
    thinking: Option<String>,
}

impl MessagesResponse {
    fn into_generation(self) -> Generation {
        let mut content = String::new();
        let mut reasoning = String::new();
        for block in self.content {
            match block.block_type.as_str() {
                "text" => content.push_str(block.text.as_deref().unwrap_or_default()),
                "thinking" => reasoning.push_str(block.thinking.as_deref().unwrap_or_default()),
                _ => {}
            }
        }
        Generation {
            content,
            reasoning: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<StreamDelta>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

/// Decode one `data:` payload. `Ok(None)` for events that carry no delta.
fn decode_stream_event(data: &str) -> Result<Option<Chunk>, BackendError> {
    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(err) => {
            log::debug!("AnthropicBackend: skipping undecodable stream event: {}", err);
            return Ok(None);
        }
    };
    match event.event_type.as_str() {
        "content_block_delta" => {
            let delta = match event.delta {
                Some(delta) => delta,
                None => return Ok(None),
            };
            let chunk = match delta.delta_type.as_deref() {
                Some("text_delta") => delta.text.map(Chunk::content),
                Some("thinking_delta") => delta.thinking.map(Chunk::reasoning),
                _ => None,
            };
            Ok(chunk.filter(|chunk| !chunk.delta.is_empty()))
        }
        "error" => {
            let message = event
                .error
                .map(|err| err.message)
                .unwrap_or_else(|| "stream error".to_string());
            Err(BackendError::new(PROVIDER, message))
        }
        _ => Ok(None),
    }
}
