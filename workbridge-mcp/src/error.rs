// workbridge-mcp/src/error.rs
// ============================================================================
// Module: Tool Errors
// Description: Client-facing error taxonomy for tool execution.
// Purpose: Carry stable error kinds from handlers to the dispatcher.
// Dependencies: workbridge-upstream, thiserror
// ============================================================================

//! ## Overview
//! Every failure path is an explicit value produced by the component that
//! detected it. Upstream failures are classified once at the HTTP client
//! boundary and converted here without reinterpretation; handlers only attach
//! domain context. The dispatcher maps these kinds to stable JSON-RPC codes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use workbridge_upstream::client::UpstreamError;
use workbridge_upstream::token::TokenError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool execution errors surfaced through the JSON-RPC envelope.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool is not in the registry.
    #[error("unknown tool")]
    UnknownTool,
    /// Argument validation failed; the message names the offending field.
    #[error("{0}")]
    InvalidParams(String),
    /// Upstream reported the resource missing.
    #[error("not found: {0}")]
    NotFound(String),
    /// Upstream reported a conflicting write.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Upstream was unreachable or kept failing after retries.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Upstream HTTP status when one was received.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },
    /// Upstream rejected the request outright.
    #[error("upstream rejected ({status}): {message}")]
    UpstreamRejected {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream error message.
        message: String,
    },
    /// No upstream access credential could be produced.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),
    /// A deadline elapsed.
    #[error("deadline exceeded")]
    Timeout,
    /// Programming error or unclassified failure.
    #[error("internal error: {0}")]
    Internal(String),
    /// Response encoding failed.
    #[error("serialization failed")]
    Serialization,
}

impl From<UpstreamError> for ToolError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound(message) => Self::NotFound(message),
            UpstreamError::Conflict(message) => Self::Conflict(message),
            UpstreamError::Rejected {
                status,
                message,
            } => Self::UpstreamRejected {
                status,
                message,
            },
            UpstreamError::Unavailable {
                status,
                message,
            } => Self::UpstreamUnavailable {
                status,
                message,
            },
            UpstreamError::Timeout => Self::Timeout,
            UpstreamError::Credential(err) => Self::from(err),
        }
    }
}

impl From<TokenError> for ToolError {
    fn from(err: TokenError) -> Self {
        Self::CredentialUnavailable(err.to_string())
    }
}

impl ToolError {
    /// Returns the upstream HTTP status attached to this error, when any.
    #[must_use]
    pub const fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamRejected {
                status, ..
            } => Some(*status),
            Self::UpstreamUnavailable {
                status, ..
            } => *status,
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
