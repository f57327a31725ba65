//! Per-provider key pool with round-robin selection
//!
//! The cursor points at the next candidate. Each successful selection moves
//! it one past the chosen record, so consecutive calls spread load across all
//! available keys instead of always favouring index 0.

use std::collections::HashSet;

use serde::Serialize;

use crate::record::CredentialRecord;

/// Ordered keys for exactly one provider plus the round-robin cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPool {
    provider: String,
    records: Vec<CredentialRecord>,
    cursor: usize,
}

/// Per-provider counts for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub provider: String,
    /// "healthy" (all available), "degraded" (some), "unhealthy" (none)
    pub status: &'static str,
    pub total: usize,
    pub available: usize,
    pub cooling_down: usize,
    pub success_calls: u64,
    pub error_calls: u64,
}

impl CredentialPool {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            records: Vec::new(),
            cursor: 0,
        }
    }

    /// Rebuild a pool from persisted parts. An out-of-range cursor resets to 0.
    pub fn from_parts(
        provider: impl Into<String>,
        records: Vec<CredentialRecord>,
        cursor: usize,
    ) -> Self {
        let mut pool = Self {
            provider: provider.into(),
            records,
            cursor,
        };
        pool.clamp_cursor();
        pool
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return the first available record at or after the cursor, wrapping once.
    ///
    /// Advances the cursor past the returned record. Returns `None` when the
    /// pool is empty or every key is cooling down; the cursor is left alone.
    pub fn next_available(&mut self, now: u64) -> Option<&CredentialRecord> {
        let n = self.records.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor % n;
        let idx = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&idx| self.records[idx].is_available(now))?;
        self.cursor = (idx + 1) % n;
        Some(&self.records[idx])
    }

    /// Sync membership with the configured keys.
    ///
    /// Records for keys still configured keep their state and order; records
    /// for removed keys are dropped; new keys are appended with a fresh record.
    /// Returns `(added, removed)`.
    pub fn reconcile(&mut self, configured: &[String], now: u64) -> (usize, usize) {
        let wanted: HashSet<&str> = configured.iter().map(String::as_str).collect();
        let before = self.records.len();
        self.records.retain(|r| wanted.contains(r.key.as_str()));
        let removed = before - self.records.len();

        let mut known: HashSet<String> = self.records.iter().map(|r| r.key.clone()).collect();
        let mut added = 0;
        for key in configured {
            if known.insert(key.clone()) {
                self.records
                    .push(CredentialRecord::new(key.clone(), self.provider.clone(), now));
                added += 1;
            }
        }

        self.clamp_cursor();
        (added, removed)
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut CredentialRecord> {
        self.records.iter_mut().find(|r| r.key == key)
    }

    /// Clear every cooldown in the pool. Returns how many were cooling.
    pub fn clear_cooldowns(&mut self) -> usize {
        self.records
            .iter_mut()
            .map(CredentialRecord::clear_cooldown)
            .filter(|&cleared| cleared)
            .count()
    }

    pub fn summary(&self, now: u64) -> PoolSummary {
        let total = self.records.len();
        let available = self.records.iter().filter(|r| r.is_available(now)).count();
        let status = if total > 0 && available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        PoolSummary {
            provider: self.provider.clone(),
            status,
            total,
            available,
            cooling_down: total - available,
            success_calls: self.records.iter().map(|r| r.success_count).sum(),
            error_calls: self.records.iter().map(|r| r.error_count).sum(),
        }
    }

    fn clamp_cursor(&mut self) {
        if self.cursor >= self.records.len() {
            self.cursor = 0;
        }
    }
}
