//! Provider abstraction for upstream LLM services
//!
//! Defines the `ProviderAdapter` trait that decouples key rotation from the
//! wire protocol of each upstream. The rotation layer only ever sees
//! `chat`/`embed` results and `ProviderError`s; it never inspects adapter
//! internals. `AdapterFactory` builds one adapter per (provider, key) pair.

pub mod message;
pub mod openai_compat;

pub use message::{
    Capability, ChatMessage, ChatOptions, ContentPart, EmbedOptions, ImageUrl, MessageContent,
    Role, requires_vision,
};
pub use openai_compat::{Endpoint, OpenAiCompatAdapter, OpenAiCompatFactory};

use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Classification of upstream errors to determine the cooldown policy.
///
/// - RateLimited puts the key in a long cooldown and fails over
/// - Unauthorized sidelines the key until an operator intervenes
/// - Transient only counts towards the consecutive-error threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// 429 / quota exhausted
    RateLimited,
    /// 401/403, invalid or revoked key
    Unauthorized,
    /// Network blips, 5xx, anything unrecognised
    Transient,
}

impl ErrorClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::RateLimited => "rate_limited",
            ErrorClassification::Unauthorized => "unauthorized",
            ErrorClassification::Transient => "transient",
        }
    }
}

/// Errors returned by provider adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("provider configuration error: {0}")]
    Config(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by the dyn-compatible adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One callable bound to a single provider and a single API key.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ProviderAdapter>`).
pub trait ProviderAdapter: Send + Sync {
    /// Provider name this adapter talks to (e.g. "openrouter").
    fn provider(&self) -> &str;

    /// Send chat messages and return the assistant reply text.
    fn chat<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
    ) -> BoxFuture<'a, Result<String>>;

    /// Return one embedding vector per input text.
    ///
    /// Providers without an embeddings endpoint keep the default, which
    /// fails with `Unsupported`.
    fn embed<'a>(
        &'a self,
        _texts: &'a [String],
        _options: &'a EmbedOptions,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        let provider = self.provider().to_string();
        Box::pin(async move {
            Err(ProviderError::Unsupported(format!(
                "{provider} does not provide embeddings"
            )))
        })
    }
}

/// Builds adapters for a (provider, credential) pair.
///
/// An error here is an adapter initialisation failure, which the rotation
/// layer treats differently from a failed request.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        provider: &str,
        credential: &Secret<String>,
    ) -> Result<Arc<dyn ProviderAdapter>>;
}
