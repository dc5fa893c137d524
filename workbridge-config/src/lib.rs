// workbridge-config/src/lib.rs
// ============================================================================
// Module: Workbridge Configuration
// Description: Configuration loading and validation for the adapter.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: workbridge-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file (path override via the
//! `WORKBRIDGE_CONFIG` environment variable) with strict size limits. Missing
//! or invalid configuration fails closed: the process refuses to start rather
//! than running with a weakened admission gate or unusable upstream
//! credentials.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::AuthConfig;
pub use config::CacheConfig;
pub use config::ConfigError;
pub use config::KvConfig;
pub use config::KvStoreType;
pub use config::RateLimitConfig;
pub use config::ServerConfig;
pub use config::ServerTransport;
pub use config::UpstreamConfig;
pub use config::WebhookConfig;
pub use config::WorkbridgeConfig;
