// workbridge-config/src/config.rs
// ============================================================================
// Module: Configuration Model
// Description: Typed configuration with strict validation.
// Purpose: Fail closed on missing credentials, weak keys, or invalid limits.
// Dependencies: workbridge-core, serde, toml
// ============================================================================

//! ## Overview
//! The configuration model mirrors the deployment surface: server transport
//! and limits, admission policy (bearer key, allow-list, rate limit), the KV
//! store selection, upstream credentials and endpoints, cache policy, and the
//! webhook secret. `validate` runs on every load and on programmatic
//! construction before a server is built.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use workbridge_core::net::AllowedNet;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "workbridge.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "WORKBRIDGE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Minimum bearer signing key length in bytes.
pub(crate) const MIN_SIGNING_KEY_BYTES: usize = 32;
/// Maximum request body size: base64 for a 1 GiB upload plus envelope slack.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024 * 1024 / 3 * 4 + 64 * 1024;
/// Default handler timeout in milliseconds.
const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;
/// Default end-to-end request timeout in milliseconds.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
/// Default rate limit ceiling per window.
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
/// Default rate limit window in seconds.
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
/// Maximum accepted rate limit ceiling.
const MAX_RATE_LIMIT_REQUESTS: u32 = 100_000;
/// Default bearer token lifetime ceiling in seconds (24 h).
const DEFAULT_MAX_TOKEN_LIFETIME_SECS: u64 = 86_400;
/// Default access-credential safety margin in seconds.
const DEFAULT_TOKEN_SAFETY_MARGIN_SECS: u64 = 300;
/// Default ceiling on the cached access-credential TTL in seconds.
const DEFAULT_TOKEN_TTL_CEILING_SECS: u64 = 3_300;
/// Default refresh lock timeout in seconds.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 30;
/// Default per-call upstream timeout in milliseconds.
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;
/// Default upstream connection pool size per host.
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 100;
/// Default cache TTL in seconds for tools without an explicit TTL.
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Default webhook timestamp tolerance in seconds (±5 min).
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
/// Default projects API base URL.
const DEFAULT_PROJECTS_BASE_URL: &str = "https://projectsapi.zoho.com/restapi";
/// Default files API base URL.
const DEFAULT_FILES_BASE_URL: &str = "https://www.zohoapis.com/workdrive/api/v1";
/// Default OAuth token endpoint.
const DEFAULT_TOKEN_URL: &str = "https://accounts.zoho.com/oauth/v2/token";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Workbridge adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkbridgeConfig {
    /// Server transport and limits.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission gate policy.
    #[serde(default)]
    pub auth: AuthConfig,
    /// KV store selection.
    #[serde(default)]
    pub kv: KvConfig,
    /// Upstream credentials and endpoints.
    pub upstream: UpstreamConfig,
    /// Response cache policy.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Webhook ingestion policy.
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl WorkbridgeConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.auth.validate(self.server.transport)?;
        self.upstream.validate()?;
        self.webhook.validate()?;
        Ok(())
    }
}

/// Server transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// HTTP transport with the full admission gate.
    #[default]
    Http,
    /// Newline-delimited JSON over stdin/stdout, no admission gate.
    Stdio,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport selection.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for the HTTP transport.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Per-handler timeout in milliseconds.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    /// End-to-end request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Http,
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            handler_timeout_ms: default_handler_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            audit: AuditConfig::default(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.handler_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server timeouts must be greater than zero".to_string(),
            ));
        }
        if self.handler_timeout_ms > self.request_timeout_ms {
            return Err(ConfigError::Invalid(
                "server.handler_timeout_ms must not exceed request_timeout_ms".to_string(),
            ));
        }
        if self.transport == ServerTransport::Http && self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind must be set for http".to_string()));
        }
        Ok(())
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional file path; stderr when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Admission gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC-SHA-256 signing key for inbound bearer tokens.
    #[serde(default)]
    pub bearer_signing_key: String,
    /// Allowed source addresses and CIDR blocks.
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,
    /// Ceiling on accepted bearer token lifetimes in seconds.
    #[serde(default = "default_max_token_lifetime_secs")]
    pub max_token_lifetime_secs: u64,
    /// Accept requests without a resolvable peer address (test profile only).
    #[serde(default)]
    pub test_profile: bool,
    /// Rate limit policy.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bearer_signing_key: String::new(),
            allowed_ips: default_allowed_ips(),
            max_token_lifetime_secs: default_max_token_lifetime_secs(),
            test_profile: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AuthConfig {
    fn validate(&self, transport: ServerTransport) -> Result<(), ConfigError> {
        if transport == ServerTransport::Http
            && self.bearer_signing_key.len() < MIN_SIGNING_KEY_BYTES
        {
            return Err(ConfigError::Invalid(format!(
                "auth.bearer_signing_key must be at least {MIN_SIGNING_KEY_BYTES} bytes"
            )));
        }
        if self.allowed_ips.is_empty() {
            return Err(ConfigError::Invalid("auth.allowed_ips must not be empty".to_string()));
        }
        for entry in &self.allowed_ips {
            AllowedNet::parse(entry).map_err(|err| {
                ConfigError::Invalid(format!("auth.allowed_ips entry invalid: {err}"))
            })?;
        }
        if self.max_token_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth.max_token_lifetime_secs must be greater than zero".to_string(),
            ));
        }
        self.rate_limit.validate()
    }
}

/// Fixed-window rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 || self.max_requests > MAX_RATE_LIMIT_REQUESTS {
            return Err(ConfigError::Invalid(format!(
                "auth.rate_limit.max_requests must be in 1..={MAX_RATE_LIMIT_REQUESTS}"
            )));
        }
        if self.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth.rate_limit.window_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// KV store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvStoreType {
    /// In-process store with passive expiry.
    #[default]
    Memory,
}

/// KV store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    /// Backend selection.
    #[serde(default)]
    pub store: KvStoreType,
    /// Key namespace prefix shared by all entries.
    #[serde(default = "default_kv_namespace")]
    pub namespace: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            store: KvStoreType::Memory,
            namespace: default_kv_namespace(),
        }
    }
}

/// Upstream credentials and endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Long-lived refresh credential.
    pub refresh_token: String,
    /// Upstream tenant (portal) identifier.
    pub portal_id: String,
    /// Projects API base URL.
    #[serde(default = "default_projects_base_url")]
    pub projects_base_url: String,
    /// Files API base URL.
    #[serde(default = "default_files_base_url")]
    pub files_base_url: String,
    /// OAuth token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Remaining lifetime below which a credential counts as expired.
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: u64,
    /// Ceiling on the cached access-credential TTL.
    #[serde(default = "default_token_ttl_ceiling_secs")]
    pub token_ttl_ceiling_secs: u64,
    /// Refresh lock TTL and waiter timeout.
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    /// Per-call upstream timeout in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection pool size per upstream host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl UpstreamConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("upstream.client_id", &self.client_id),
            ("upstream.client_secret", &self.client_secret),
            ("upstream.refresh_token", &self.refresh_token),
            ("upstream.portal_id", &self.portal_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must be set")));
            }
        }
        for (field, value) in [
            ("upstream.projects_base_url", &self.projects_base_url),
            ("upstream.files_base_url", &self.files_base_url),
            ("upstream.token_url", &self.token_url),
        ] {
            if !value.starts_with("https://") && !value.starts_with("http://") {
                return Err(ConfigError::Invalid(format!(
                    "{field} must include http:// or https://"
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "upstream.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.refresh_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.refresh_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Default TTL in seconds for read tools without an explicit TTL.
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

/// Webhook ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Whether the webhook endpoint is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Shared HMAC secret for delivery signatures.
    #[serde(default)]
    pub secret: String,
    /// Accepted clock skew for delivery timestamps, in seconds.
    #[serde(default = "default_webhook_tolerance_secs")]
    pub timestamp_tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            timestamp_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
        }
    }
}

impl WebhookConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "webhook.secret must be set when webhooks are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

const fn default_handler_timeout_ms() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_MS
}

const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

const fn default_true() -> bool {
    true
}

fn default_allowed_ips() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}

const fn default_max_token_lifetime_secs() -> u64 {
    DEFAULT_MAX_TOKEN_LIFETIME_SECS
}

const fn default_rate_limit_max_requests() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

const fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_kv_namespace() -> String {
    "workbridge".to_string()
}

fn default_projects_base_url() -> String {
    DEFAULT_PROJECTS_BASE_URL.to_string()
}

fn default_files_base_url() -> String {
    DEFAULT_FILES_BASE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

const fn default_token_safety_margin_secs() -> u64 {
    DEFAULT_TOKEN_SAFETY_MARGIN_SECS
}

const fn default_token_ttl_ceiling_secs() -> u64 {
    DEFAULT_TOKEN_TTL_CEILING_SECS
}

const fn default_refresh_timeout_secs() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

const fn default_upstream_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}

const fn default_pool_max_idle_per_host() -> usize {
    DEFAULT_POOL_MAX_IDLE_PER_HOST
}

const fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

const fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves the config path: explicit argument, env override, then default.
fn resolve_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    if let Ok(value) = env::var(CONFIG_ENV_VAR) {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File access failed.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing failed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Validation failed.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::ConfigError;
    use super::ServerTransport;
    use super::WorkbridgeConfig;

    fn minimal_toml(signing_key: &str) -> String {
        format!(
            r#"
[auth]
bearer_signing_key = "{signing_key}"

[upstream]
client_id = "client"
client_secret = "secret"
refresh_token = "refresh"
portal_id = "portal-1"
"#
        )
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let file = write_config(&minimal_toml(&"k".repeat(32)));
        let config = WorkbridgeConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.server.transport, ServerTransport::Http);
        assert_eq!(config.auth.rate_limit.max_requests, 100);
        assert_eq!(config.auth.rate_limit.window_secs, 60);
        assert_eq!(config.auth.allowed_ips, vec!["127.0.0.1", "::1"]);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.upstream.token_safety_margin_secs, 300);
        assert!(!config.webhook.enabled);
    }

    #[test]
    fn short_signing_key_is_rejected_for_http() {
        let file = write_config(&minimal_toml("too-short"));
        let err = WorkbridgeConfig::load(Some(file.path())).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("bearer_signing_key"));
    }

    #[test]
    fn stdio_transport_does_not_require_signing_key() {
        let file = write_config(
            r#"
[server]
transport = "stdio"

[upstream]
client_id = "client"
client_secret = "secret"
refresh_token = "refresh"
portal_id = "portal-1"
"#,
        );
        let config = WorkbridgeConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.server.transport, ServerTransport::Stdio);
    }

    #[test]
    fn missing_upstream_credentials_fail() {
        let file = write_config(
            r#"
[auth]
bearer_signing_key = "0123456789abcdef0123456789abcdef"

[upstream]
client_id = ""
client_secret = "secret"
refresh_token = "refresh"
portal_id = "portal-1"
"#,
        );
        let err = WorkbridgeConfig::load(Some(file.path())).expect_err("must fail");
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn invalid_allow_list_entry_fails() {
        let file = write_config(&format!(
            r#"
[auth]
bearer_signing_key = "{}"
allowed_ips = ["not-an-ip"]

[upstream]
client_id = "client"
client_secret = "secret"
refresh_token = "refresh"
portal_id = "portal-1"
"#,
            "k".repeat(32)
        ));
        let err = WorkbridgeConfig::load(Some(file.path())).expect_err("must fail");
        assert!(err.to_string().contains("allowed_ips"));
    }

    #[test]
    fn webhook_enabled_requires_secret() {
        let file = write_config(&format!(
            r#"
[auth]
bearer_signing_key = "{}"

[upstream]
client_id = "client"
client_secret = "secret"
refresh_token = "refresh"
portal_id = "portal-1"

[webhook]
enabled = true
"#,
            "k".repeat(32)
        ));
        let err = WorkbridgeConfig::load(Some(file.path())).expect_err("must fail");
        assert!(err.to_string().contains("webhook.secret"));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = WorkbridgeConfig::load(Some(Path::new("/nonexistent/workbridge.toml")))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
