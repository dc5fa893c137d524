// workbridge-core/src/lib.rs
// ============================================================================
// Module: Workbridge Core
// Description: Shared primitives for the Workbridge protocol adapter.
// Purpose: Provide the KV facade, fingerprinting, and timestamp helpers.
// Dependencies: serde, sha2, tokio
// ============================================================================

//! ## Overview
//! Core primitives shared across the Workbridge crates. The KV store facade is
//! the sole serialisation point for cross-task coordination: the access
//! credential, refresh lock, response cache, rate-limit counters, idempotency
//! markers, and webhook replay records all live behind it. Fingerprinting
//! provides the deterministic cache and dedup keys derived from canonical
//! JSON.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod hashing;
pub mod kv;
pub mod net;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::FingerprintError;
pub use hashing::canonical_json;
pub use hashing::fingerprint;
pub use kv::KvCounter;
pub use kv::KvError;
pub use kv::KvStore;
pub use kv::MemoryKvStore;
pub use kv::SharedKvStore;
pub use net::AllowedNet;
pub use net::NetParseError;
pub use time::unix_now_millis;
pub use time::unix_now_secs;
