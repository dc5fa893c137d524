// workbridge-core/src/kv.rs
// ============================================================================
// Module: KV Store Facade
// Description: Abstraction over a TTL-bearing key-value store.
// Purpose: Provide the single coordination point for ephemeral shared state.
// Dependencies: async-trait, tokio
// ============================================================================

//! ## Overview
//! The KV facade backs every piece of ephemeral shared state: the upstream
//! access credential, the refresh lock, cached read responses, rate-limit
//! counters, idempotency markers, and webhook replay records. All entries are
//! TTL-bounded and expire passively; nothing survives a restart.
//!
//! Transient connectivity failures are reported as [`KvError::Unavailable`]
//! and are distinct from a miss (`Ok(None)`). `create_if_absent` is atomic
//! and is the primitive behind the single-flight refresh lock and the
//! createTask idempotency marker.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Entry count above which the in-memory store sweeps expired entries.
const SWEEP_THRESHOLD: usize = 4_096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// KV facade errors.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backing store could not be reached.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Counter state returned by [`KvStore::incr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvCounter {
    /// Counter value after the increment.
    pub value: u64,
    /// Time remaining before the counter window expires.
    pub window_remaining: Duration,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// TTL-bearing key-value store interface.
///
/// # Invariants
/// - `create_if_absent` is atomic with respect to concurrent callers.
/// - Expired entries behave exactly like absent entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a value. Returns `Ok(None)` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Writes a value with a TTL, replacing any existing entry atomically.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Creates an entry only when absent. Returns `true` when created.
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError>;

    /// Deletes an entry. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Increments a windowed counter, creating it with the given TTL on the
    /// first increment. The TTL is not extended by subsequent increments.
    async fn incr(&self, key: &str, window: Duration) -> Result<KvCounter, KvError>;

    /// Checks store connectivity.
    async fn ping(&self) -> Result<(), KvError>;
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Stored entry with its absolute expiry.
struct MemoryEntry {
    /// Stored value bytes.
    value: String,
    /// Absolute expiry instant.
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process KV store with passive expiry.
///
/// Suitable for a single replica; a remote backend plugs in through
/// [`KvStore`] without touching callers.
#[derive(Default)]
pub struct MemoryKvStore {
    /// Entries guarded by a single async mutex.
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired entries when the map grows past the sweep threshold.
    fn maybe_sweep(entries: &mut HashMap<String, MemoryEntry>, now: Instant) {
        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired(now));
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::maybe_sweep(&mut entries, now);
        if ttl.is_zero() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(key.to_string(), MemoryEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        });
        Ok(())
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::maybe_sweep(&mut entries, now);
        let occupied = entries.get(key).is_some_and(|entry| !entry.is_expired(now));
        if occupied {
            return Ok(false);
        }
        entries.insert(key.to_string(), MemoryEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<KvCounter, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::maybe_sweep(&mut entries, now);
        let current = entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.value.parse::<u64>().ok());
        match current {
            Some(value) => {
                let next = value.saturating_add(1);
                let expires_at = entries
                    .get(key)
                    .map_or(now + window, |entry| entry.expires_at);
                entries.insert(key.to_string(), MemoryEntry {
                    value: next.to_string(),
                    expires_at,
                });
                Ok(KvCounter {
                    value: next,
                    window_remaining: expires_at.saturating_duration_since(now),
                })
            }
            None => {
                entries.insert(key.to_string(), MemoryEntry {
                    value: "1".to_string(),
                    expires_at: now + window,
                });
                Ok(KvCounter {
                    value: 1,
                    window_remaining: window,
                })
            }
        }
    }

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Shared Wrapper
// ============================================================================

/// Cloneable handle over a dynamic [`KvStore`] implementation.
#[derive(Clone)]
pub struct SharedKvStore {
    /// Underlying store implementation.
    inner: Arc<dyn KvStore>,
}

impl SharedKvStore {
    /// Wraps a concrete store implementation.
    #[must_use]
    pub fn from_store(store: impl KvStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub fn from_arc(store: Arc<dyn KvStore>) -> Self {
        Self {
            inner: store,
        }
    }

    /// Reads a value. Returns `Ok(None)` on a miss or an expired entry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.get(key).await
    }

    /// Writes a value with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.inner.set(key, value, ttl).await
    }

    /// Creates an entry only when absent. Returns `true` when created.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        self.inner.create_if_absent(key, value, ttl).await
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key).await
    }

    /// Increments a windowed counter.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn incr(&self, key: &str, window: Duration) -> Result<KvCounter, KvError> {
        self.inner.incr(key, window).await
    }

    /// Checks store connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store is unreachable.
    pub async fn ping(&self) -> Result<(), KvError> {
        self.inner.ping().await
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
