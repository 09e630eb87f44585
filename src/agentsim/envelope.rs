//! Envelope protocol for participant-to-participant hand-offs.
//!
//! Every utterance one participant produces is wrapped in an [`Envelope`] before it is
//! appended to the other participant's context. The rendered form is what the receiving
//! model actually reads, so its exact shape is part of the contract between the
//! [`Orchestrator`](crate::Orchestrator) and [`Participant`](crate::Participant):
//!
//! ```text
//! [MCP REQUEST] (ID: req-7)
//! What's your favorite color?
//! [Metadata: {"turn":3}]
//! ```
//!
//! The `(ID: …)` suffix only appears when a correlation id is set, and the metadata line
//! only when metadata is non-empty.
//!
//! # Example
//!
//! ```rust
//! use agentsim::envelope::{Envelope, EnvelopeKind};
//!
//! let envelope = Envelope::make(EnvelopeKind::Request, "Hello there", None, None).unwrap();
//! assert_eq!(envelope.render(), "[MCP REQUEST]\nHello there");
//!
//! let parsed = Envelope::parse("[MCP RESPONSE] (ID: 42)\nGeneral Kenobi").unwrap();
//! assert_eq!(parsed.kind, EnvelopeKind::Response);
//! assert_eq!(parsed.request_id.as_deref(), Some("42"));
//! assert_eq!(parsed.content, "General Kenobi");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

const HEADER_PREFIX: &str = "[MCP";
const METADATA_PREFIX: &str = "[Metadata: ";

/// Types of envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Request,
    Response,
    /// Doesn't expect a reply.
    Notification,
    Error,
}

impl EnvelopeKind {
    /// Upper-case tag used in the rendered header.
    pub fn as_tag(&self) -> &'static str {
        match self {
            EnvelopeKind::Request => "REQUEST",
            EnvelopeKind::Response => "RESPONSE",
            EnvelopeKind::Notification => "NOTIFICATION",
            EnvelopeKind::Error => "ERROR",
        }
    }

    fn from_tag(tag: &str) -> Self {
        let tag = tag.to_ascii_uppercase();
        if tag.contains("RESPONSE") {
            EnvelopeKind::Response
        } else if tag.contains("NOTIFICATION") {
            EnvelopeKind::Notification
        } else if tag.contains("ERROR") {
            EnvelopeKind::Error
        } else {
            EnvelopeKind::Request
        }
    }
}

/// Returned by [`Envelope::make`] when a non-error envelope has no content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmptyContent(pub EnvelopeKind);

impl fmt::Display for EmptyContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} envelope requires content", self.0.as_tag())
    }
}

impl Error for EmptyContent {}

/// A uniform, inspectable wrapper around one utterance. Transient: built per hand-off and
/// never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Correlation id for matching requests to responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    /// Build an envelope. Request, response and notification envelopes must carry content;
    /// an error envelope may be empty.
    pub fn make(
        kind: EnvelopeKind,
        content: impl Into<String>,
        request_id: Option<String>,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Result<Self, EmptyContent> {
        let content = content.into();
        if content.is_empty() && kind != EnvelopeKind::Error {
            return Err(EmptyContent(kind));
        }
        Ok(Envelope {
            kind,
            content,
            metadata,
            request_id,
        })
    }

    pub fn request(content: impl Into<String>) -> Result<Self, EmptyContent> {
        Self::make(EnvelopeKind::Request, content, None, None)
    }

    pub fn response(
        content: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Result<Self, EmptyContent> {
        Self::make(EnvelopeKind::Response, content, Some(request_id.into()), None)
    }

    pub fn notification(content: impl Into<String>) -> Result<Self, EmptyContent> {
        Self::make(EnvelopeKind::Notification, content, None, None)
    }

    pub fn error(content: impl Into<String>, request_id: Option<String>) -> Self {
        Envelope {
            kind: EnvelopeKind::Error,
            content: content.into(),
            metadata: None,
            request_id,
        }
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// Deterministic textual form appended to a participant's context.
    pub fn render(&self) -> String {
        let mut rendered = format!("{} {}]", HEADER_PREFIX, self.kind.as_tag());
        if let Some(id) = &self.request_id {
            rendered.push_str(&format!(" (ID: {})", id));
        }
        rendered.push('\n');
        rendered.push_str(&self.content);
        if let Some(metadata) = self.metadata.as_ref().filter(|m| !m.is_empty()) {
            // BTreeMap keeps the key order stable
            let json = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string());
            rendered.push('\n');
            rendered.push_str(METADATA_PREFIX);
            rendered.push_str(&json);
            rendered.push(']');
        }
        rendered
    }

    /// Best-effort recovery of an envelope from free-form model output.
    ///
    /// When the first non-blank line is an `[MCP <KIND>]` header, the kind, correlation id,
    /// content and a trailing metadata line are recovered. Any other text is wrapped whole
    /// as a request. Returns `None` only for a header that opens but never closes.
    pub fn parse(text: &str) -> Option<Envelope> {
        let trimmed = text.trim_start();
        if !trimmed.starts_with(HEADER_PREFIX) {
            return Some(Envelope {
                kind: EnvelopeKind::Request,
                content: text.to_string(),
                metadata: None,
                request_id: None,
            });
        }

        let (header, body) = match trimmed.split_once('\n') {
            Some((header, body)) => (header.trim_end(), body),
            None => (trimmed.trim_end(), ""),
        };

        let close = header.find(']')?;
        let kind = EnvelopeKind::from_tag(&header[HEADER_PREFIX.len()..close]);
        let request_id = parse_request_id(&header[close + 1..]);

        let (content, metadata) = split_metadata(body);

        Some(Envelope {
            kind,
            content: content.to_string(),
            metadata,
            request_id,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Envelope> {
        serde_json::from_str(json)
    }
}

fn parse_request_id(rest: &str) -> Option<String> {
    let start = rest.find("(ID:")? + "(ID:".len();
    let end = rest[start..].find(')')? + start;
    let id = rest[start..end].trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn split_metadata(body: &str) -> (&str, Option<BTreeMap<String, Value>>) {
    let (content, last_line) = match body.rsplit_once('\n') {
        Some((content, last)) => (content, last),
        None => ("", body),
    };
    let candidate = last_line.trim();
    if let Some(json) = candidate
        .strip_prefix(METADATA_PREFIX)
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if let Ok(metadata) = serde_json::from_str::<BTreeMap<String, Value>>(json) {
            return (content, Some(metadata));
        }
    }
    (body, None)
}
