//! keyrot
//!
//! Operator CLI for the key rotation layer:
//! 1. Loads provider endpoints and API keys from config and env
//! 2. Restores persisted key state and reconciles it with the config
//! 3. Runs one command: inspect health, clear cooldowns, or make a call
//!    through the rotating client

mod cli;
mod config;
mod metrics;

use anyhow::{Context, Result, bail};
use clap::Parser;
use key_pool::{JsonFileStore, RotatingClient, RotationManager};
use provider::{ChatMessage, ChatOptions, EmbedOptions, OpenAiCompatFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Usage errors exit with code 2 before any logging is set up
    let args = Args::parse();

    // Logs go to stderr so command output on stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = if args.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    info!(path = %args.config.display(), "loading configuration");
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    info!(
        providers = config.providers.len(),
        state_path = %config.state.path.display(),
        max_attempts = config.retry.max_attempts,
        "configuration loaded"
    );

    let store = Arc::new(JsonFileStore::new(&config.state.path));
    let manager = Arc::new(
        RotationManager::new(config.provider_keys(), config.cooldown, store).await,
    );
    let factory = Arc::new(OpenAiCompatFactory::new(
        reqwest::Client::new(),
        config.endpoints(),
    ));
    let client = RotatingClient::new(manager, factory, config.retry);

    let started = Instant::now();
    let result = run(&client, &args.command).await;
    metrics::record_command(
        args.command.name(),
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );

    if let Some(handle) = prometheus_handle {
        print!("{}", handle.render());
    }

    match result {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => {
            error!(command = args.command.name(), error = %e, "command failed");
            Err(e)
        }
    }
}

/// Run one command and return what it prints.
async fn run(client: &RotatingClient, command: &Command) -> Result<String> {
    match command {
        Command::Status => {
            let summary = client.status_summary().await;
            Ok(serde_json::to_string_pretty(&summary)?)
        }
        Command::Clear { providers } => {
            let scope = clear_scope(&client.manager().provider_names(), providers)?;
            let cleared = client.manager().clear_cooldowns(scope).await;
            Ok(format!("cleared {cleared} cooldown(s)"))
        }
        Command::Chat { prompt } => {
            let messages = [ChatMessage::user(prompt.join(" "))];
            let reply = client
                .chat(&messages, &ChatOptions::default())
                .await
                .context("chat failed")?;
            if let Some(provider) = client.current_provider().await {
                info!(%provider, "chat served");
            }
            Ok(reply)
        }
        Command::Embed { texts } => {
            let vectors = client
                .embed(texts, &EmbedOptions::default())
                .await
                .context("embed failed")?;
            Ok(serde_json::to_string(&vectors)?)
        }
    }
}

/// Map `clear` arguments to a manager scope: no names means every provider.
/// Unknown names are rejected before anything is cleared.
fn clear_scope<'a>(known: &[String], requested: &'a [String]) -> Result<Option<&'a [String]>> {
    if let Some(unknown) = requested.iter().find(|p| !known.contains(p)) {
        bail!(
            "unknown provider: {unknown} (configured: {})",
            known.join(", ")
        );
    }
    Ok((!requested.is_empty()).then_some(requested))
}


#[cfg(test)]
mod tests {
    use super::*;
    use key_pool::{CooldownPolicy, ProviderKeys, RetryPolicy};
    use provider::{Capability, Endpoint, ProviderError};
    use std::collections::HashMap;
    use std::time::Duration;

    struct TestClient {
        _dir: tempfile::TempDir,
        client: RotatingClient,
    }

    async fn test_client() -> TestClient {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
        let providers = ["openrouter", "groq"]
            .into_iter()
            .map(|name| ProviderKeys {
                name: name.into(),
                keys: vec![format!("{name}-key-0001")],
                vision: false,
                embeddings: false,
            })
            .collect();
        let manager =
            Arc::new(RotationManager::new(providers, CooldownPolicy::default(), store).await);

        let endpoints: HashMap<String, Endpoint> = ["openrouter", "groq"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    Endpoint {
                        base_url: "http://127.0.0.1:9".into(),
                        chat_model: "test-model".into(),
                        embedding_model: None,
                        timeout: Duration::from_secs(1),
                    },
                )
            })
            .collect();
        let factory = Arc::new(OpenAiCompatFactory::new(reqwest::Client::new(), endpoints));

        TestClient {
            _dir: dir,
            client: RotatingClient::new(manager, factory, RetryPolicy::default()),
        }
    }

    /// Put every configured key into a rate-limit cooldown.
    async fn cool_down_everything(client: &RotatingClient) {
        let manager = client.manager();
        for _ in 0..manager.key_count() {
            let credential = manager.acquire_next(Capability::Text).await.unwrap();
            manager
                .report_failure(
                    &credential,
                    &ProviderError::Upstream {
                        status: 429,
                        body: "rate limit exceeded".into(),
                    },
                )
                .await;
        }
        let summary = client.status_summary().await;
        assert!(summary.providers.iter().all(|p| p.available == 0));
    }

    #[tokio::test]
    async fn clear_without_names_clears_every_provider() {
        let t = test_client().await;
        cool_down_everything(&t.client).await;

        let output = run(&t.client, &Command::Clear { providers: vec![] })
            .await
            .unwrap();
        assert_eq!(output, "cleared 2 cooldown(s)");

        let summary = t.client.status_summary().await;
        assert!(summary.providers.iter().all(|p| p.available == p.total));
    }

    #[tokio::test]
    async fn clear_named_provider_only() {
        let t = test_client().await;
        cool_down_everything(&t.client).await;

        run(
            &t.client,
            &Command::Clear {
                providers: vec!["groq".into()],
            },
        )
        .await
        .unwrap();

        let summary = t.client.status_summary().await;
        assert_eq!(summary.provider("groq").unwrap().available, 1);
        assert_eq!(summary.provider("openrouter").unwrap().available, 0);
    }

    #[tokio::test]
    async fn clear_unknown_provider_fails_and_clears_nothing() {
        let t = test_client().await;
        cool_down_everything(&t.client).await;

        let err = run(
            &t.client,
            &Command::Clear {
                providers: vec!["groq".into(), "mistral".into()],
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown provider: mistral"), "got: {err}");

        let summary = t.client.status_summary().await;
        assert!(summary.providers.iter().all(|p| p.available == 0));
    }

    #[tokio::test]
    async fn status_prints_summary_json() {
        let t = test_client().await;
        let output = run(&t.client, &Command::Status).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["providers"][0]["provider"], "openrouter");
        assert_eq!(json["providers"][1]["status"], "healthy");
    }

    #[tokio::test]
    async fn embed_without_embedding_providers_is_exhaustion() {
        let t = test_client().await;
        let err = run(
            &t.client,
            &Command::Embed {
                texts: vec!["hello".into()],
            },
        )
        .await
        .unwrap_err();
        let rotation = err.downcast_ref::<key_pool::Error>().unwrap();
        assert!(rotation.is_exhausted());
    }

    #[test]
    fn clear_scope_maps_names() {
        let known = vec!["openrouter".to_string(), "groq".to_string()];
        assert_eq!(clear_scope(&known, &[]).unwrap(), None);

        let named = vec!["groq".to_string()];
        assert_eq!(clear_scope(&known, &named).unwrap(), Some(&named[..]));

        let unknown = vec!["mistral".to_string()];
        assert!(clear_scope(&known, &unknown).is_err());
    }
}
