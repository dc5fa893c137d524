// workbridge-contract/src/lib.rs
// ============================================================================
// Module: Workbridge Contract
// Description: Closed tool registry and manifest contract.
// Purpose: Provide the canonical tool names, parameter schemas, and manifest.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The contract crate declares the closed set of tools exposed to assistants:
//! their names, parameter contracts, mutability, and cache policy. The
//! registry is bound at process start; the advertised manifest is derived
//! from the same descriptors the validator enforces, so the two can never
//! drift apart.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod tooling;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use tooling::ParamSpec;
pub use tooling::ParamType;
pub use tooling::ToolDefinition;
pub use tooling::ToolDescriptor;
pub use tooling::ToolName;
pub use tooling::ToolNature;
pub use tooling::ToolRegistry;
