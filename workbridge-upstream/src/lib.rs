// workbridge-upstream/src/lib.rs
// ============================================================================
// Module: Workbridge Upstream
// Description: Authenticated access to the upstream REST APIs.
// Purpose: Token management, classified HTTP access, and read caching.
// Dependencies: workbridge-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! This crate owns every outbound byte: the OAuth token manager performs
//! single-flight refreshes coordinated through the KV refresh lock, the HTTP
//! client wraps both upstream APIs with retry, backoff, and a stable error
//! classification, and the response cache memoizes read results under short
//! TTLs. Handlers never interpret upstream failures themselves; the
//! classification produced here is final.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cache;
pub mod client;
pub mod token;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::ResponseCache;
pub use client::ApiTarget;
pub use client::HttpMethod;
pub use client::MultipartUpload;
pub use client::RequestBody;
pub use client::UpstreamClient;
pub use client::UpstreamClientConfig;
pub use client::UpstreamError;
pub use client::UpstreamGateway;
pub use client::UpstreamRequest;
pub use token::HttpRefreshEndpoint;
pub use token::RefreshEndpoint;
pub use token::RefreshedCredential;
pub use token::TokenError;
pub use token::TokenManager;
pub use token::TokenManagerConfig;
