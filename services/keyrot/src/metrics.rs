//! Prometheus metrics exposition
//!
//! The key-pool crate records rotation counters through the `metrics`
//! facade; this module installs the recorder they land in and adds the
//! CLI's own series:
//!
//! - `keyrot_commands_total` (counter): labels `command`, `outcome`
//! - `keyrot_command_duration_seconds` (histogram): label `command`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "keyrot_command_duration_seconds";

/// Bucket boundaries from 5ms to 5 minutes: one command may walk several
/// providers, each with its own request timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format printed by `--metrics`.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a finished command with its outcome (`ok` or `error`).
pub fn record_command(command: &'static str, ok: bool, duration_secs: f64) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("keyrot_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "command" => command).record(duration_secs);
}
