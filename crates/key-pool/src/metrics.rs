//! Key rotation metrics
//!
//! - `key_rotation_selections_total` (counter): label `provider`
//! - `key_rotation_successes_total` (counter): label `provider`
//! - `key_rotation_failures_total` (counter): labels `provider`, `classification`
//! - `key_rotation_exhausted_total` (counter)
//!
//! Without an installed recorder these calls are no-ops.

use provider::ErrorClassification;

pub fn record_selection(provider: &str) {
    metrics::counter!("key_rotation_selections_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_success(provider: &str) {
    metrics::counter!("key_rotation_successes_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_failure(provider: &str, classification: ErrorClassification) {
    metrics::counter!(
        "key_rotation_failures_total",
        "provider" => provider.to_string(),
        "classification" => classification.label()
    )
    .increment(1);
}

pub fn record_exhausted() {
    metrics::counter!("key_rotation_exhausted_total").increment(1);
}
