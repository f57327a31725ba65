//! Common error types

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and key loading errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider's `keys_file` could not be read
    #[error("failed to read keys file {} for provider {provider}: {source}", path.display())]
    KeysFile {
        provider: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a configuration error about one provider.
    pub fn provider(provider: &str, message: impl std::fmt::Display) -> Self {
        Error::Config(format!("provider {provider}: {message}"))
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
