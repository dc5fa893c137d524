// workbridge-upstream/src/cache.rs
// ============================================================================
// Module: Response Cache
// Description: TTL-bounded memoization of read-only tool results.
// Purpose: Bound upstream load under bursty identical read demand.
// Dependencies: workbridge-core, serde_json
// ============================================================================

//! ## Overview
//! Read results are memoized in KV under a fingerprint of the tool name and
//! the canonical JSON of its arguments. Writes never invalidate entries;
//! readers tolerate up to one TTL of staleness. Errors are never cached, and
//! KV trouble degrades to a direct upstream call rather than failing the
//! request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use workbridge_core::fingerprint;
use workbridge_core::kv::SharedKvStore;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// KV-backed response cache keyed by tool fingerprints.
#[derive(Clone)]
pub struct ResponseCache {
    /// Shared KV store.
    kv: SharedKvStore,
    /// Key namespace prefix.
    namespace: String,
}

impl ResponseCache {
    /// Creates a cache over the shared store.
    #[must_use]
    pub fn new(kv: SharedKvStore, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }

    fn key_for(&self, tool: &str, args: &Value) -> Option<String> {
        let digest = fingerprint(tool, args).ok()?;
        Some(format!("{}:cache:{digest}", self.namespace))
    }

    /// Looks up a cached result. Misses, expired entries, and KV failures all
    /// read as `None`.
    pub async fn get(&self, tool: &str, args: &Value) -> Option<Value> {
        let key = self.key_for(tool, args)?;
        let stored = self.kv.get(&key).await.ok()??;
        serde_json::from_str(&stored).ok()
    }

    /// Stores a successful result under the tool-declared TTL. A zero TTL
    /// disables storage; KV failures are swallowed (the result still flows to
    /// the caller).
    pub async fn put(&self, tool: &str, args: &Value, value: &Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(key) = self.key_for(tool, args) else {
            return;
        };
        let Ok(serialized) = serde_json::to_string(value) else {
            return;
        };
        let _ = self.kv.set(&key, &serialized, ttl).await;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
