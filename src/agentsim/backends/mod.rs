//! Provider backends implementing [`LanguageModel`](crate::LanguageModel).
//!
//! * [`openai`]: OpenAI and OpenAI-compatible chat completions.
//! * [`anthropic`]: Anthropic Messages API, with extended-thinking output surfaced as reasoning.
//! * [`registry`]: prefix-based dispatch across the configured backends.

pub mod anthropic;
pub mod http_pool;
pub mod openai;
pub mod registry;
pub mod sse;
