//! Rotation manager: provider fallback, error handling and persistence
//!
//! Owns one `CredentialPool` per provider behind a single manager-wide lock.
//! Every mutation (cursor advance, success, failure, administrative clear) is
//! written to the state store while the lock is still held, so concurrent
//! callers never interleave partial writes and a crash never loses key
//! health recorded before it.
//!
//! Providers are tried strictly in configured order; round-robin only
//! applies between keys of the same provider.

use std::sync::Arc;

use common::Secret;
use provider::{Capability, ErrorClassification, ProviderError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::metrics;
use crate::policy::CooldownPolicy;
use crate::pool::{CredentialPool, PoolSummary};
use crate::store::{PoolState, StateSnapshot, StateStore};

/// Configured keys for one provider, in priority order within the manager.
#[derive(Debug, Clone)]
pub struct ProviderKeys {
    pub name: String,
    pub keys: Vec<String>,
    /// Whether this provider accepts image inputs
    pub vision: bool,
    /// Whether this provider serves embeddings
    pub embeddings: bool,
}

/// A key handed out for one attempt.
#[derive(Debug, Clone)]
pub struct AcquiredCredential {
    pub provider: String,
    pub key: Secret<String>,
}

/// Diagnostics view of every pool.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub providers: Vec<PoolSummary>,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl StatusSummary {
    pub fn provider(&self, name: &str) -> Option<&PoolSummary> {
        self.providers.iter().find(|p| p.provider == name)
    }

    /// One-line description used in exhaustion errors.
    fn describe(&self) -> String {
        self.providers
            .iter()
            .map(|p| format!("{} {}/{} available", p.provider, p.available, p.total))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Static per-provider settings that never change after construction.
#[derive(Debug, Clone)]
struct ProviderSlot {
    name: String,
    vision: bool,
    embeddings: bool,
}

impl ProviderSlot {
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Text => true,
            Capability::Vision => self.vision,
            Capability::Embed => self.embeddings,
        }
    }
}

pub struct RotationManager {
    providers: Vec<ProviderSlot>,
    /// Index-aligned with `providers`
    pools: Mutex<Vec<CredentialPool>>,
    /// Pool membership is fixed once construction has reconciled it
    key_count: usize,
    policy: CooldownPolicy,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl RotationManager {
    /// Load saved state, reconcile it with the configured keys, and persist
    /// the reconciled state before returning.
    pub async fn new(
        providers: Vec<ProviderKeys>,
        policy: CooldownPolicy,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self::with_clock(providers, policy, store, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        providers: Vec<ProviderKeys>,
        policy: CooldownPolicy,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let saved = store.load().await.unwrap_or_default();
        let now = clock.now_millis();

        let mut slots = Vec::with_capacity(providers.len());
        let mut pools = Vec::with_capacity(providers.len());
        for configured in providers {
            let mut pool = match saved.pool(&configured.name) {
                Some(state) => CredentialPool::from_parts(
                    state.provider.clone(),
                    state.records.clone(),
                    state.cursor,
                ),
                None => CredentialPool::new(configured.name.clone()),
            };
            let (added, removed) = pool.reconcile(&configured.keys, now);
            if added > 0 || removed > 0 {
                info!(
                    provider = %configured.name,
                    added,
                    removed,
                    "reconciled keys with configuration"
                );
            }
            pools.push(pool);
            slots.push(ProviderSlot {
                name: configured.name,
                vision: configured.vision,
                embeddings: configured.embeddings,
            });
        }

        info!(
            providers = ?slots.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            keys = pools.iter().map(CredentialPool::len).sum::<usize>(),
            "key rotation manager initialized"
        );

        let key_count = pools.iter().map(CredentialPool::len).sum();
        let manager = Self {
            providers: slots,
            pools: Mutex::new(pools),
            key_count,
            policy,
            store,
            clock,
        };
        {
            let pools = manager.pools.lock().await;
            manager.persist(&pools, now).await;
        }
        manager
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Number of keys across every provider.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Pick the next available key, trying providers in priority order.
    ///
    /// Providers lacking the requested capability are skipped. Returns
    /// `AllKeysExhausted` when no provider has an available key.
    pub async fn acquire_next(&self, capability: Capability) -> Result<AcquiredCredential> {
        let mut pools = self.pools.lock().await;
        let now = self.clock.now_millis();

        let hit = self
            .providers
            .iter()
            .zip(pools.iter_mut())
            .filter(|(slot, _)| slot.supports(capability))
            .find_map(|(slot, pool)| {
                pool.next_available(now)
                    .map(|record| (slot.name.clone(), record.key.clone()))
            });

        if let Some((provider, key)) = hit {
            let acquired = AcquiredCredential {
                provider,
                key: Secret::new(key),
            };
            debug!(provider = %acquired.provider, key = %acquired.key.masked(), "selected key");
            metrics::record_selection(&acquired.provider);
            self.persist(&pools, now).await;
            return Ok(acquired);
        }

        let summary = self.summarize(&pools, now);
        warn!(?capability, pools = %summary.describe(), "all API keys exhausted");
        metrics::record_exhausted();
        Err(Error::AllKeysExhausted(summary.describe()))
    }

    /// Record a successful call: clears cooldown and error count.
    pub async fn report_success(&self, credential: &AcquiredCredential) {
        let mut pools = self.pools.lock().await;
        let now = self.clock.now_millis();
        let Some(record) = find_record(&mut pools, credential) else {
            warn!(
                provider = %credential.provider,
                key = %credential.key.masked(),
                "success reported for a key that is no longer configured"
            );
            return;
        };
        record.mark_success(now);
        metrics::record_success(&credential.provider);
        self.persist(&pools, now).await;
    }

    /// Classify a failed call and apply the matching cooldown policy.
    ///
    /// Never fails: unrecognised errors land in the transient bucket.
    pub async fn report_failure(
        &self,
        credential: &AcquiredCredential,
        error: &ProviderError,
    ) -> ErrorClassification {
        let classification = classify(error);
        let mut pools = self.pools.lock().await;
        let now = self.clock.now_millis();
        metrics::record_failure(&credential.provider, classification);

        let Some(record) = find_record(&mut pools, credential) else {
            warn!(
                provider = %credential.provider,
                key = %credential.key.masked(),
                "failure reported for a key that is no longer configured"
            );
            return classification;
        };

        match classification {
            ErrorClassification::RateLimited | ErrorClassification::Unauthorized => {
                let cooldown = self.policy.cooldown_for(classification);
                record.mark_rate_limited(now, cooldown);
                warn!(
                    provider = %credential.provider,
                    key = %credential.key.masked(),
                    classification = classification.label(),
                    cooldown_mins = cooldown.as_secs() / 60,
                    "key entering cooldown"
                );
            }
            ErrorClassification::Transient => {
                let count = record.record_error();
                if count >= self.policy.transient_threshold {
                    let cooldown = self.policy.cooldown_for(classification);
                    record.extend_cooldown(now, cooldown);
                    warn!(
                        provider = %credential.provider,
                        key = %credential.key.masked(),
                        consecutive_errors = count,
                        cooldown_mins = cooldown.as_secs() / 60,
                        "key entering cooldown after repeated errors"
                    );
                } else {
                    debug!(
                        provider = %credential.provider,
                        key = %credential.key.masked(),
                        consecutive_errors = count,
                        "transient error recorded, key stays available"
                    );
                }
            }
        }

        self.persist(&pools, now).await;
        classification
    }

    /// Sideline a key whose adapter could not be built.
    pub async fn report_adapter_init_failure(
        &self,
        credential: &AcquiredCredential,
        error: &ProviderError,
    ) {
        let mut pools = self.pools.lock().await;
        let now = self.clock.now_millis();
        let Some(record) = find_record(&mut pools, credential) else {
            return;
        };
        let cooldown = self.policy.adapter_init_cooldown();
        record.mark_rate_limited(now, cooldown);
        warn!(
            provider = %credential.provider,
            key = %credential.key.masked(),
            error = %error,
            cooldown_mins = cooldown.as_secs() / 60,
            "adapter initialization failed, key entering cooldown"
        );
        self.persist(&pools, now).await;
    }

    /// Administrative reset of cooldowns for the named providers, or all
    /// providers when `None`. Error counters are left untouched.
    ///
    /// Returns the number of keys that were cooling down.
    pub async fn clear_cooldowns(&self, providers: Option<&[String]>) -> usize {
        let mut pools = self.pools.lock().await;
        let now = self.clock.now_millis();
        let mut cleared = 0;
        for pool in pools.iter_mut() {
            let selected = providers.is_none_or(|names| names.iter().any(|n| n == pool.provider()));
            if selected {
                cleared += pool.clear_cooldowns();
            }
        }
        self.persist(&pools, now).await;

        let scope = match providers {
            Some(names) => names.join(", "),
            None => "all".to_string(),
        };
        info!(providers = %scope, cleared, "cooldowns cleared");
        cleared
    }

    /// Per-provider counts for diagnostics.
    pub async fn status_summary(&self) -> StatusSummary {
        let pools = self.pools.lock().await;
        self.summarize(&pools, self.clock.now_millis())
    }

    /// Current state as it would be persisted.
    pub async fn snapshot(&self) -> StateSnapshot {
        let pools = self.pools.lock().await;
        snapshot_of(&pools, self.clock.now_millis())
    }

    fn summarize(&self, pools: &[CredentialPool], now: u64) -> StatusSummary {
        StatusSummary {
            providers: pools.iter().map(|p| p.summary(now)).collect(),
            timestamp: now,
        }
    }

    /// Write the state while the caller still holds the pools lock.
    ///
    /// Failures are logged, not returned: in-memory state stays authoritative
    /// and the next mutation retries the write.
    async fn persist(&self, pools: &[CredentialPool], now: u64) {
        let snapshot = snapshot_of(pools, now);
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "failed to persist key state");
        }
    }
}

fn snapshot_of(pools: &[CredentialPool], now: u64) -> StateSnapshot {
    StateSnapshot {
        pools: pools
            .iter()
            .map(|p| PoolState {
                provider: p.provider().to_string(),
                records: p.records().to_vec(),
                cursor: p.cursor(),
            })
            .collect(),
        last_updated: now,
    }
}

fn find_record<'a>(
    pools: &'a mut [CredentialPool],
    credential: &AcquiredCredential,
) -> Option<&'a mut crate::record::CredentialRecord> {
    pools
        .iter_mut()
        .find(|p| p.provider() == credential.provider)?
        .find_mut(credential.key.expose())
}
