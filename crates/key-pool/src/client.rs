//! Rotating client: the single entry point for chat and embedding calls
//!
//! Each call runs a bounded retry loop. Every attempt acquires a fresh key
//! from the manager, builds an adapter for it, and reports the outcome back,
//! so key health is recorded even when the call as a whole fails. Nothing
//! about the key used survives the call except what the manager persists.

use std::sync::Arc;

use provider::{
    AdapterFactory, BoxFuture, Capability, ChatMessage, ChatOptions, EmbedOptions,
    ProviderAdapter, requires_vision,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manager::{RotationManager, StatusSummary};

fn default_max_attempts() -> u32 {
    3
}

/// Retry budget per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

pub struct RotatingClient {
    manager: Arc<RotationManager>,
    factory: Arc<dyn AdapterFactory>,
    retry: RetryPolicy,
    last_provider: Mutex<Option<String>>,
}

impl RotatingClient {
    pub fn new(
        manager: Arc<RotationManager>,
        factory: Arc<dyn AdapterFactory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            factory,
            retry,
            last_provider: Mutex::new(None),
        }
    }

    /// Send chat messages with key rotation and provider fallback.
    ///
    /// Requests carrying images only go to vision-capable providers.
    pub async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let capability = if requires_vision(messages) {
            Capability::Vision
        } else {
            Capability::Text
        };
        self.with_rotation("chat", capability, |adapter| {
            Box::pin(async move { adapter.chat(messages, options).await })
        })
        .await
    }

    /// Embed texts with key rotation and provider fallback.
    ///
    /// Only providers that serve embeddings are tried.
    pub async fn embed(&self, texts: &[String], options: &EmbedOptions) -> Result<Vec<Vec<f32>>> {
        self.with_rotation("embed", Capability::Embed, |adapter| {
            Box::pin(async move { adapter.embed(texts, options).await })
        })
        .await
    }

    /// Provider that served the most recent successful call.
    pub async fn current_provider(&self) -> Option<String> {
        self.last_provider.lock().await.clone()
    }

    pub async fn status_summary(&self) -> StatusSummary {
        self.manager.status_summary().await
    }

    pub fn manager(&self) -> &Arc<RotationManager> {
        &self.manager
    }

    /// Run `call` against freshly acquired keys until it succeeds, the retry
    /// budget is spent, or the manager runs out of keys.
    ///
    /// Adapter construction failures sideline the key and re-acquire without
    /// spending an attempt. At most one such failure per configured key is
    /// tolerated, so the loop terminates even if a cooldown lapses while it
    /// runs.
    async fn with_rotation<'c, T>(
        &self,
        operation: &'static str,
        capability: Capability,
        call: impl Fn(Arc<dyn ProviderAdapter>) -> BoxFuture<'c, provider::Result<T>>,
    ) -> Result<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let max_init_failures = self.manager.key_count();
        let mut attempt = 0;
        let mut init_failures = 0;

        loop {
            // Exhaustion propagates immediately: retrying cannot help
            let credential = self.manager.acquire_next(capability).await?;

            let adapter = match self.factory.create(&credential.provider, &credential.key) {
                Ok(adapter) => adapter,
                Err(e) => {
                    self.manager
                        .report_adapter_init_failure(&credential, &e)
                        .await;
                    init_failures += 1;
                    if init_failures >= max_init_failures {
                        return Err(Error::Provider(e));
                    }
                    continue;
                }
            };

            attempt += 1;
            debug!(
                operation,
                attempt,
                provider = %credential.provider,
                key = %credential.key.masked(),
                "calling provider"
            );

            match call(adapter).await {
                Ok(value) => {
                    self.manager.report_success(&credential).await;
                    *self.last_provider.lock().await = Some(credential.provider.clone());
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        provider = %credential.provider,
                        key = %credential.key.masked(),
                        error = %e,
                        "provider call failed"
                    );
                    self.manager.report_failure(&credential, &e).await;
                    if attempt >= max_attempts {
                        return Err(Error::Provider(e));
                    }
                }
            }
        }
    }
}
