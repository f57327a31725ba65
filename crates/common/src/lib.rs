//! Common types shared by the key rotation crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask};
