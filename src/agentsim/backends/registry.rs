//! Routing of model identifiers to backends.
//!
//! The [`ModelRegistry`] is a strategy table: an ordered list of `(prefix, backend)` routes
//! plus an optional fallback. It implements [`LanguageModel`] itself, so the orchestrator
//! and the judge hold one `Arc<dyn LanguageModel>` and never look at model identifiers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use agentsim::ModelRegistry;
//! use agentsim::backends::anthropic::AnthropicBackend;
//! use agentsim::backends::openai::OpenAiBackend;
//!
//! let registry = ModelRegistry::new()
//!     .with_route("claude", Arc::new(AnthropicBackend::new("sk-ant-...")))
//!     .with_fallback(Arc::new(OpenAiBackend::new("sk-...")));
//!
//! assert_eq!(registry.resolve("claude-3-haiku-20240307").unwrap().provider_name(), "anthropic");
//! assert_eq!(registry.resolve("gpt-4").unwrap().provider_name(), "openai");
//! ```

use crate::agentsim::backends::anthropic::AnthropicBackend;
use crate::agentsim::backends::openai::OpenAiBackend;
use crate::agentsim::config::AgentSimConfig;
use crate::agentsim::model::{BackendError, ChunkStream, Generation, GenerationRequest, LanguageModel};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

const PROVIDER: &str = "registry";

/// Anthropic models offered when an Anthropic key is configured.
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-5-20250929",
    "claude-opus-4-5-20251101",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
];

/// OpenAI models offered when an OpenAI key is configured.
pub const OPENAI_MODELS: &[&str] = &["gpt-4-turbo", "gpt-4", "gpt-3.5-turbo"];

struct Route {
    prefix: String,
    backend: Arc<dyn LanguageModel>,
}

/// Strategy table from model-identifier prefixes to backends.
#[derive(Default)]
pub struct ModelRegistry {
    routes: Vec<Route>,
    fallback: Option<Arc<dyn LanguageModel>>,
    catalogue: BTreeMap<String, Vec<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Route every model id starting with `prefix` to `backend`.
    pub fn with_route(mut self, prefix: impl Into<String>, backend: Arc<dyn LanguageModel>) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            backend,
        });
        self
    }

    /// Backend for model ids no route claims.
    pub fn with_fallback(mut self, backend: Arc<dyn LanguageModel>) -> Self {
        self.fallback = Some(backend);
        self
    }

    /// Advertise `models` under `provider` in [`catalogue`](ModelRegistry::catalogue).
    pub fn with_catalogue<I, S>(mut self, provider: impl Into<String>, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalogue
            .insert(provider.into(), models.into_iter().map(Into::into).collect());
        self
    }

    /// Wire the providers whose keys are present: `claude*` to Anthropic, everything else to
    /// the OpenAI-compatible endpoint.
    pub fn from_config(config: &AgentSimConfig) -> Self {
        let mut registry = ModelRegistry::new();
        if let Some(key) = &config.anthropic_api_key {
            registry = registry
                .with_route(
                    "claude",
                    Arc::new(AnthropicBackend::new_with_base_url(
                        key,
                        &config.anthropic_base_url,
                    )),
                )
                .with_catalogue("anthropic", ANTHROPIC_MODELS.iter().copied());
        }
        if let Some(key) = &config.openai_api_key {
            registry = registry
                .with_fallback(Arc::new(OpenAiBackend::new_with_base_url(
                    key,
                    &config.openai_base_url,
                )))
                .with_catalogue("openai", OPENAI_MODELS.iter().copied());
        }
        if registry.routes.is_empty() && registry.fallback.is_none() {
            log::warn!("ModelRegistry::from_config: no provider API key configured");
        }
        registry
    }

    /// Known model ids per configured provider.
    pub fn catalogue(&self) -> &BTreeMap<String, Vec<String>> {
        &self.catalogue
    }

    /// The backend serving `model`: the longest matching prefix wins, then the fallback.
    pub fn resolve(&self, model: &str) -> Result<&Arc<dyn LanguageModel>, BackendError> {
        self.routes
            .iter()
            .filter(|route| model.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len())
            .map(|route| &route.backend)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                BackendError::new(
                    PROVIDER,
                    format!("no backend configured for model {}", model),
                )
            })
    }
}

#[async_trait]
impl LanguageModel for ModelRegistry {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        let backend = self.resolve(&request.model)?;
        log::debug!(
            "ModelRegistry::generate: {} -> {}",
            request.model,
            backend.provider_name()
        );
        backend.generate(request).await
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, BackendError> {
        let backend = self.resolve(&request.model)?;
        log::debug!(
            "ModelRegistry::generate_stream: {} -> {}",
            request.model,
            backend.provider_name()
        );
        backend.generate_stream(request).await
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }
}
