//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The file path itself comes from `--config` or `CONFIG_PATH` (see `cli`).
//! API keys are loaded from each provider's `keys_env` variable or
//! `keys_file`, never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use key_pool::{CooldownPolicy, ProviderKeys, RetryPolicy};
use provider::Endpoint;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cooldown: CooldownPolicy,
    /// Priority order is file order
    pub providers: Vec<ProviderConfig>,
}

/// Where key state is persisted
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// One upstream provider and the source of its keys
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub chat_model: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub vision: bool,
    /// Env var holding a comma-separated key list
    #[serde(default)]
    pub keys_env: Option<String>,
    /// File holding one key per line (alternative to keys_env)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub keys: Vec<Secret<String>>,
}

/// Every cooldown must be positive: a zero cooldown hands a failed key
/// straight back to the retry loop.
fn validate_cooldown(policy: &CooldownPolicy) -> common::Result<()> {
    let durations = [
        ("rate_limit_mins", policy.rate_limit_mins),
        ("unauthorized_mins", policy.unauthorized_mins),
        ("transient_mins", policy.transient_mins),
        ("adapter_init_mins", policy.adapter_init_mins),
    ];
    if let Some((name, _)) = durations.iter().find(|(_, mins)| *mins == 0) {
        return Err(common::Error::Config(format!(
            "[cooldown] {name} must be greater than 0"
        )));
    }
    if policy.transient_threshold == 0 {
        return Err(common::Error::Config(
            "[cooldown] transient_threshold must be at least 1".into(),
        ));
    }
    Ok(())
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".llm_key_state.json")
}

fn default_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file, then resolve provider keys.
    ///
    /// Key resolution order per provider:
    /// 1. `keys_env` env var, when set
    /// 2. `keys_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        for provider in &mut config.providers {
            provider.keys = provider.resolve_keys()?;
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.providers.is_empty() {
            return Err(common::Error::Config(
                "at least one [[providers]] entry is required".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }

        validate_cooldown(&self.cooldown)?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(common::Error::Config("provider name must not be empty".into()));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(common::Error::provider(
                    &provider.name,
                    format_args!(
                        "base_url must start with http:// or https://, got: {}",
                        provider.base_url
                    ),
                ));
            }
            if provider.timeout_secs == 0 {
                return Err(common::Error::provider(
                    &provider.name,
                    "timeout_secs must be greater than 0",
                ));
            }
        }

        Ok(())
    }

    /// Provider list in priority order, as the rotation manager takes it.
    pub fn provider_keys(&self) -> Vec<ProviderKeys> {
        self.providers
            .iter()
            .map(|p| ProviderKeys {
                name: p.name.clone(),
                keys: p.keys.iter().map(|k| k.expose().clone()).collect(),
                vision: p.vision,
                embeddings: p.embedding_model.is_some(),
            })
            .collect()
    }

    /// Endpoints keyed by provider name, for the adapter factory.
    pub fn endpoints(&self) -> HashMap<String, Endpoint> {
        self.providers
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    Endpoint {
                        base_url: p.base_url.clone(),
                        chat_model: p.chat_model.clone(),
                        embedding_model: p.embedding_model.clone(),
                        timeout: Duration::from_secs(p.timeout_secs),
                    },
                )
            })
            .collect()
    }
}

impl ProviderConfig {
    fn resolve_keys(&self) -> common::Result<Vec<Secret<String>>> {
        let from_env = self
            .keys_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        let raw = match (from_env, &self.keys_file) {
            (Some(list), _) => split_keys(&list, ','),
            (None, Some(key_file)) => {
                let contents = std::fs::read_to_string(key_file).map_err(|source| {
                    common::Error::KeysFile {
                        provider: self.name.clone(),
                        path: key_file.clone(),
                        source,
                    }
                })?;
                split_keys(&contents, '\n')
            }
            (None, None) => Vec::new(),
        };

        Ok(raw.into_iter().map(Secret::new).collect())
    }
}

/// Split a key list, trimming entries, dropping blanks, and removing
/// duplicates while keeping first-occurrence order.
fn split_keys(list: &str, separator: char) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(separator)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(*k))
        .map(str::to_owned)
        .collect()
}
