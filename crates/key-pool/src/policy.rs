//! Cooldown policy
//!
//! Durations applied per error classification. All fields default to the
//! values the rotation layer has always used, so a config section may set
//! only the ones it wants to tune.

use std::time::Duration;

use provider::ErrorClassification;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CooldownPolicy {
    /// Cooldown after a 429 / quota error
    pub rate_limit_mins: u64,
    /// Cooldown after a 401 / invalid key error
    pub unauthorized_mins: u64,
    /// Cooldown once `transient_threshold` consecutive transient errors accrue
    pub transient_mins: u64,
    pub transient_threshold: u32,
    /// Cooldown when the adapter for a key cannot be built
    pub adapter_init_mins: u64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limit_mins: 60,
            unauthorized_mins: 24 * 60,
            transient_mins: 10,
            transient_threshold: 3,
            adapter_init_mins: 5,
        }
    }
}

impl CooldownPolicy {
    /// Cooldown for a classification. Transient errors only apply it once the
    /// threshold is reached; the caller checks that.
    pub fn cooldown_for(&self, classification: ErrorClassification) -> Duration {
        let mins = match classification {
            ErrorClassification::RateLimited => self.rate_limit_mins,
            ErrorClassification::Unauthorized => self.unauthorized_mins,
            ErrorClassification::Transient => self.transient_mins,
        };
        minutes(mins)
    }

    pub fn adapter_init_cooldown(&self) -> Duration {
        minutes(self.adapter_init_mins)
    }
}

fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}
