//! Server-Sent Events plumbing shared by the streaming backends.
//!
//! Both providers answer a streaming request with an `text/event-stream` body in which each
//! event's JSON payload sits on a `data:` line. [`data_stream`] turns a `reqwest::Response`
//! into a stream of those payloads; the backends decode them.

use crate::agentsim::model::BackendError;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;

/// Payload OpenAI-compatible endpoints send as the final event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A stream of `data:` payloads in arrival order.
pub type DataStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Accumulates raw body bytes and hands back complete lines.
///
/// Works on bytes rather than text so a multi-byte character split across two network
/// chunks is decoded only once both halves have arrived.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        SseLineBuffer {
            pending: Vec::with_capacity(1024),
        }
    }

    /// Append `bytes` and drain every complete, non-blank line (trimmed).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

/// The payload of a `data:` line, or `None` for comments, `event:` lines and the like.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim_start)
}

/// Fail with the provider's own error text when the response is not a 2xx.
pub async fn check_status(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::new(provider, body).with_status(status.as_u16()))
}

/// Turn a successful streaming response into its `data:` payloads. Ends at the body's end
/// or at the [`DONE_SENTINEL`], whichever comes first.
pub fn data_stream(response: reqwest::Response, provider: &'static str) -> DataStream {
    Box::pin(async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut done = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| BackendError::new(provider, err.to_string()))?;
            for line in buffer.push(&chunk) {
                match data_payload(&line) {
                    Some(DONE_SENTINEL) => done = true,
                    Some(data) if !done => yield data.to_string(),
                    _ => {}
                }
            }
            if done {
                break;
            }
        }

        if !done {
            if let Some(line) = buffer.finish() {
                if let Some(data) = data_payload(&line).filter(|data| *data != DONE_SENTINEL) {
                    yield data.to_string();
                }
            }
        }
    })
}
