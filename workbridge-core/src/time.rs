// workbridge-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: Unix timestamp helpers for tokens and audit events.
// Purpose: Provide a single clock access point for time comparisons.
// Dependencies: std
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current Unix time in whole seconds.
#[must_use]
pub fn unix_now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Returns the current Unix time in milliseconds.
#[must_use]
pub fn unix_now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
