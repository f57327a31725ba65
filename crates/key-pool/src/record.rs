//! Per-key rotation state
//!
//! Availability is a pure function of the wall clock: a record is available
//! when `now > unavailable_until`. There are no timers; an expired cooldown is
//! simply observed as available on the next check.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rotation state for one API key. Timestamps are unix milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub key: String,
    pub provider: String,
    #[serde(default)]
    pub last_used_at: u64,
    /// 0 means available; anything in the future means cooling down
    #[serde(default)]
    pub unavailable_until: u64,
    #[serde(default)]
    pub consecutive_error_count: u32,
    #[serde(default)]
    pub success_count: u64,
    /// Lifetime error count; unlike `consecutive_error_count` it survives success
    #[serde(default)]
    pub error_count: u64,
}

impl CredentialRecord {
    pub fn new(key: impl Into<String>, provider: impl Into<String>, now: u64) -> Self {
        Self {
            key: key.into(),
            provider: provider.into(),
            last_used_at: now,
            unavailable_until: 0,
            consecutive_error_count: 0,
            success_count: 0,
            error_count: 0,
        }
    }

    pub fn is_available(&self, now: u64) -> bool {
        now > self.unavailable_until
    }

    /// Remaining cooldown at `now`, if any.
    pub fn cooldown_remaining(&self, now: u64) -> Option<Duration> {
        if self.is_available(now) {
            None
        } else {
            Some(Duration::from_millis(self.unavailable_until - now))
        }
    }

    /// Count an error and put the key in cooldown for `duration` from `now`.
    pub fn mark_rate_limited(&mut self, now: u64, duration: Duration) {
        self.record_error();
        self.extend_cooldown(now, duration);
    }

    /// Count an error without touching availability. Returns the new
    /// consecutive count.
    pub fn record_error(&mut self) -> u32 {
        self.error_count = self.error_count.saturating_add(1);
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        self.consecutive_error_count
    }

    /// Set the cooldown end to `now + duration` unless it already ends later.
    ///
    /// Cooldowns are measured from `now`, never accumulated, and never shortened.
    pub fn extend_cooldown(&mut self, now: u64, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let until = now.saturating_add(millis);
        if until > self.unavailable_until {
            self.unavailable_until = until;
        }
    }

    pub fn mark_success(&mut self, now: u64) {
        self.last_used_at = now;
        self.success_count = self.success_count.saturating_add(1);
        self.unavailable_until = 0;
        self.consecutive_error_count = 0;
    }

    /// Administrative reset: availability only, counters untouched.
    pub fn clear_cooldown(&mut self) -> bool {
        let was_cooling = self.unavailable_until > 0;
        self.unavailable_until = 0;
        was_cooling
    }

    /// Masked key for logs.
    pub fn masked_key(&self) -> String {
        common::mask(&self.key)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("key", &self.masked_key())
            .field("provider", &self.provider)
            .field("last_used_at", &self.last_used_at)
            .field("unavailable_until", &self.unavailable_until)
            .field("consecutive_error_count", &self.consecutive_error_count)
            .field("success_count", &self.success_count)
            .field("error_count", &self.error_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_730_000_000_000;
    const MINUTE: u64 = 60_000;

    fn record() -> CredentialRecord {
        CredentialRecord::new("sk-test-0123456789abcdef", "openrouter", NOW)
    }

    #[test]
    fn fresh_record_is_available() {
        let r = record();
        assert!(r.is_available(NOW));
        assert_eq!(r.cooldown_remaining(NOW), None);
    }

    #[test]
    fn rate_limited_until_now_plus_duration() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        assert_eq!(r.unavailable_until, NOW + 60 * MINUTE);
        assert_eq!(r.consecutive_error_count, 1);
        assert!(!r.is_available(NOW + 59 * MINUTE));
        assert_eq!(
            r.cooldown_remaining(NOW + 30 * MINUTE),
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn cooldown_ending_exactly_now_is_still_unavailable() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60));
        assert!(!r.is_available(NOW + MINUTE));
        assert!(r.is_available(NOW + MINUTE + 1));
    }

    #[test]
    fn recovers_without_explicit_wake_up() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(10 * 60));
        assert!(!r.is_available(NOW));
        assert!(r.is_available(NOW + 10 * MINUTE + 1));
        // Observing availability does not mutate anything
        assert_eq!(r.unavailable_until, NOW + 10 * MINUTE);
    }

    #[test]
    fn repeated_cooldowns_are_not_additive() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        assert_eq!(r.unavailable_until, NOW + 60 * MINUTE);
        assert_eq!(r.consecutive_error_count, 2);
    }

    #[test]
    fn shorter_second_cooldown_never_shortens() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        let first = r.unavailable_until;
        r.mark_rate_limited(NOW + MINUTE, Duration::from_secs(10 * 60));
        assert_eq!(r.unavailable_until, first);
    }

    #[test]
    fn later_cooldown_extends_from_its_own_now() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(10 * 60));
        r.mark_rate_limited(NOW + 5 * MINUTE, Duration::from_secs(10 * 60));
        // now + d of the second call, not first end + d
        assert_eq!(r.unavailable_until, NOW + 15 * MINUTE);
    }

    #[test]
    fn success_resets_cooldown_and_errors() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        r.mark_success(NOW + MINUTE);
        assert!(r.is_available(NOW + MINUTE));
        assert_eq!(r.unavailable_until, 0);
        assert_eq!(r.consecutive_error_count, 0);
        assert_eq!(r.success_count, 1);
        assert_eq!(r.last_used_at, NOW + MINUTE);
    }

    #[test]
    fn lifetime_error_count_survives_success() {
        let mut r = record();
        r.record_error();
        r.mark_rate_limited(NOW, Duration::from_secs(60));
        r.mark_success(NOW + MINUTE);
        r.record_error();
        assert_eq!(r.consecutive_error_count, 1);
        assert_eq!(r.error_count, 3);
    }

    #[test]
    fn clear_cooldown_keeps_counters() {
        let mut r = record();
        r.mark_rate_limited(NOW, Duration::from_secs(60 * 60));
        assert!(r.clear_cooldown());
        assert!(r.is_available(NOW));
        assert_eq!(r.consecutive_error_count, 1);
        assert!(!r.clear_cooldown());
    }

    #[test]
    fn debug_masks_key() {
        let debug = format!("{:?}", record());
        assert!(!debug.contains("0123456789abcdef"), "got: {debug}");
        assert!(debug.contains("sk-tes...cdef"), "got: {debug}");
    }
}
