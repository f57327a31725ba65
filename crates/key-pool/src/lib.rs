//! API key rotation and provider fallback
//!
//! Tracks the health of every configured API key, selects keys round-robin
//! within a provider and falls back across providers in a fixed priority
//! order. All key state is persisted after every mutation so cooldowns
//! survive restarts.
//!
//! Key lifecycle:
//! 1. Key appears in configuration → fresh record appended to its provider pool
//! 2. Manager hands the key out round-robin while it is available
//! 3. 429/quota error → cooldown (60 min by default)
//! 4. 401/invalid key → long cooldown (24 h by default)
//! 5. Other errors → counted; the third in a row triggers a short cooldown
//! 6. Cooldown expires → key is selectable again on the next check (no timers)
//! 7. Success → cooldown and error counter cleared

pub mod classify;
pub mod client;
pub mod clock;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod record;
pub mod store;

pub use classify::classify;
pub use client::{RetryPolicy, RotatingClient};
pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use manager::{AcquiredCredential, ProviderKeys, RotationManager, StatusSummary};
pub use policy::CooldownPolicy;
pub use pool::{CredentialPool, PoolSummary};
pub use record::CredentialRecord;
pub use store::{JsonFileStore, PoolState, StateSnapshot, StateStore};
