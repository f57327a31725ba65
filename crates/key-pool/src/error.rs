//! Error types for key rotation

use provider::ProviderError;

/// Errors surfaced to callers of the rotation layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No key is available in any provider. Retrying immediately is pointless.
    #[error("all API keys exhausted across all providers ({0})")]
    AllKeysExhausted(String),

    /// The last attempt's provider error after the retry budget ran out.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("state store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether this is the terminal "nothing left to try" condition.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::AllKeysExhausted(_))
    }
}

/// Result alias for rotation operations.
pub type Result<T> = std::result::Result<T, Error>;
