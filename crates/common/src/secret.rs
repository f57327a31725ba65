//! Secret wrapper for API keys and other sensitive values

use std::fmt;
use zeroize::Zeroize;

/// Characters kept from the start of a key by [`Secret::masked`].
const MASK_PREFIX: usize = 6;
/// Characters kept from the end of a key by [`Secret::masked`].
const MASK_SUFFIX: usize = 4;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Short diagnostic form of the key: `sk-or-...9f3a`.
    ///
    /// Keys too short to keep both ends without revealing most of the value
    /// render as `***`.
    pub fn masked(&self) -> String {
        mask(&self.0)
    }
}

/// Mask a raw key string the same way [`Secret::masked`] does.
pub fn mask(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() < MASK_PREFIX + MASK_SUFFIX + 2 {
        return "***".to_string();
    }
    let head: String = chars[..MASK_PREFIX].iter().collect();
    let tail: String = chars[chars.len() - MASK_SUFFIX..].iter().collect();
    format!("{head}...{tail}")
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
