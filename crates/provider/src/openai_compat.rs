//! OpenAI-compatible HTTP adapter
//!
//! OpenRouter, Groq and Gemini's compatibility endpoint all accept the
//! `/chat/completions` and `/embeddings` request shapes, so a single adapter
//! parameterised by base URL and default models covers them. Non-2xx
//! responses are returned as `ProviderError::Upstream` with the raw body so
//! the rotation layer can classify them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    AdapterFactory, BoxFuture, ChatMessage, ChatOptions, EmbedOptions, ProviderAdapter,
    ProviderError, Result,
};

/// Where and how to reach one provider.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Base URL without trailing path, e.g. `https://openrouter.ai/api/v1`
    pub base_url: String,
    /// Model used when `ChatOptions::model` is unset
    pub chat_model: String,
    /// Model used when `EmbedOptions::model` is unset; `None` disables embeddings
    pub embedding_model: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Factory producing `OpenAiCompatAdapter`s for the configured providers.
///
/// Shares one `reqwest::Client` (and its connection pool) across all adapters.
pub struct OpenAiCompatFactory {
    client: reqwest::Client,
    endpoints: HashMap<String, Endpoint>,
}

impl OpenAiCompatFactory {
    pub fn new(client: reqwest::Client, endpoints: HashMap<String, Endpoint>) -> Self {
        Self { client, endpoints }
    }
}

impl AdapterFactory for OpenAiCompatFactory {
    fn create(
        &self,
        provider: &str,
        credential: &Secret<String>,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let endpoint = self
            .endpoints
            .get(provider)
            .ok_or_else(|| ProviderError::Config(format!("unknown provider: {provider}")))?;
        if credential.expose().trim().is_empty() {
            return Err(ProviderError::Config(format!(
                "empty API key for provider {provider}"
            )));
        }
        Ok(Arc::new(OpenAiCompatAdapter {
            provider: provider.to_string(),
            endpoint: endpoint.clone(),
            key: credential.clone(),
            client: self.client.clone(),
        }))
    }
}

/// Adapter bound to a single provider endpoint and API key.
pub struct OpenAiCompatAdapter {
    provider: String,
    endpoint: Endpoint,
    key: Secret<String>,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// POST a JSON body and return the parsed JSON response.
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint.url(path);
        debug!(provider = %self.provider, key = %self.key.masked(), %url, "sending upstream request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.key.expose())
            .timeout(self.endpoint.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("reading response body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::Upstream { status, body: text });
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("response is not JSON: {e}")))
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn chat<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let body = chat_body(&self.endpoint, messages, options);
            let response = self.post("chat/completions", &body).await?;
            parse_chat_response(&response)
        })
    }

    fn embed<'a>(
        &'a self,
        texts: &'a [String],
        options: &'a EmbedOptions,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let model = options
                .model
                .as_deref()
                .or(self.endpoint.embedding_model.as_deref())
                .ok_or_else(|| {
                    ProviderError::Unsupported(format!(
                        "no embedding model configured for {}",
                        self.provider
                    ))
                })?;
            let body = json!({ "model": model, "input": texts });
            let response = self.post("embeddings", &body).await?;
            parse_embedding_response(&response, texts.len())
        })
    }
}

/// Build the `/chat/completions` request body.
fn chat_body(endpoint: &Endpoint, messages: &[ChatMessage], options: &ChatOptions) -> Value {
    let model = options.model.as_deref().unwrap_or(&endpoint.chat_model);
    let mut body = json!({ "model": model, "messages": messages });
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
}

/// Extract `data[*].embedding`, ordered by each entry's `index`.
fn parse_embedding_response(response: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = response
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, entry) in data.iter().enumerate() {
        let index = entry
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = entry
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("entry without embedding".into()))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ProviderError::InvalidResponse("non-numeric embedding".into()))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
