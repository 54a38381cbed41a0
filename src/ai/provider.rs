//! The [`LlmProvider`] trait — the seam between the router and concrete
//! provider adapters.

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse};

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, String>;

/// A concrete LLM backend (OpenRouter, Ollama, GLM, ...).
///
/// Implementations are held behind `Arc<dyn LlmProvider>` in the router.
/// Provider-specific message-shape constraints are the adapter's problem:
/// the router always hands over the canonical sequence and the adapter
/// reshapes it before the wire (see [`crate::ai::reshape`]).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Lightweight connectivity probe.  Must finish within ~5 s.
    async fn health_check(&self) -> bool;

    /// Stable provider identifier (matches the config key).
    fn provider_name(&self) -> &str;

    /// Local providers (Ollama) are gated by failures; cloud providers
    /// remain eligible after transient errors.
    fn local(&self) -> bool {
        false
    }
}
