//! Provenance-verifying rule cache.
//!
//! The cache is the only component allowed to satisfy a validation without a
//! live store query, so it enforces the provenance invariant twice: `put`
//! rejects any document with incomplete metadata, and `get` re-validates on
//! read as a defense against anything that mutated entries in between. A
//! healthy cache reports exactly 100% provenance compliance — anything less
//! is a correctness alarm, not a tunable threshold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use lattice_types::RuleDocument;

struct CacheEntry {
    docs: Vec<RuleDocument>,
    cached_at: Instant,
    ttl: Duration,
    source_query: String,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Outcome of a `put`: how many documents were stored and how many were
/// rejected by the provenance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePutOutcome {
    pub stored: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_rules: usize,
    pub provenance_compliant_pct: f64,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub forced_misses: u64,
    pub rejected_puts: u64,
}

/// Shared, process-scoped rule cache keyed by query fingerprint.
pub struct RuleCache {
    entries: tokio::sync::RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    forced_misses: AtomicU64,
    rejected_puts: AtomicU64,
}

impl RuleCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: tokio::sync::RwLock::new(HashMap::new()),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            forced_misses: AtomicU64::new(0),
            rejected_puts: AtomicU64::new(0),
        }
    }

    /// Look up a cached rule batch, re-validating provenance on read.
    ///
    /// Expired entries and entries that no longer pass the provenance gate
    /// are evicted and counted as misses (the latter additionally as forced
    /// misses).
    pub async fn get(&self, key: &str) -> Option<Vec<RuleDocument>> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.expired() {
            entries.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if !entry.docs.iter().all(RuleDocument::has_complete_provenance) {
            tracing::warn!(
                key,
                source_query = %entry.source_query,
                "Cached entry failed provenance re-validation, evicting"
            );
            entries.remove(key);
            self.forced_misses.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.docs.clone())
    }

    /// Store a rule batch, filtering out any document that fails the
    /// provenance gate. Rejections are logged and counted, never silent.
    pub async fn put(
        &self,
        key: &str,
        docs: Vec<RuleDocument>,
        source_query: &str,
        ttl: Option<Duration>,
    ) -> CachePutOutcome {
        let (valid, invalid): (Vec<_>, Vec<_>) = docs
            .into_iter()
            .partition(RuleDocument::has_complete_provenance);

        for doc in &invalid {
            tracing::warn!(
                rule_id = %doc.id,
                collection = %doc.collection,
                missing = ?doc.missing_metadata_keys(),
                "Rejecting rule without complete provenance from cache"
            );
        }
        self.rejected_puts
            .fetch_add(invalid.len() as u64, Ordering::Relaxed);

        let outcome = CachePutOutcome {
            stored: valid.len(),
            rejected: invalid.len(),
        };

        if !valid.is_empty() {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.to_string(),
                CacheEntry {
                    docs: valid,
                    cached_at: Instant::now(),
                    ttl: ttl.unwrap_or(self.default_ttl),
                    source_query: source_query.to_string(),
                },
            );
        }
        outcome
    }

    /// Drop a single entry.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total_rules: usize = entries.values().map(|e| e.docs.len()).sum();
        let compliant: usize = entries
            .values()
            .flat_map(|e| e.docs.iter())
            .filter(|d| d.has_complete_provenance())
            .count();
        let provenance_compliant_pct = if total_rules == 0 {
            100.0
        } else {
            compliant as f64 / total_rules as f64 * 100.0
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            entries: entries.len(),
            total_rules,
            provenance_compliant_pct,
            hit_rate,
            hits,
            misses,
            forced_misses: self.forced_misses.load(Ordering::Relaxed),
            rejected_puts: self.rejected_puts.load(Ordering::Relaxed),
        }
    }
}
