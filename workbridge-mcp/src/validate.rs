// workbridge-mcp/src/validate.rs
// ============================================================================
// Module: Argument Validation
// Description: Declarative validation of tool arguments.
// Purpose: Reject malformed arguments before any upstream call.
// Dependencies: workbridge-contract, serde_json
// ============================================================================

//! ## Overview
//! Validation is driven entirely by the tool descriptors: unknown parameters,
//! missing required parameters, empty strings, out-of-set enum values,
//! malformed dates, and oversized base64 payloads are all rejected here with
//! a message naming the offending field. Base64 size enforcement inspects the
//! encoded length so a 1.4 GiB payload is rejected without decoding it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use workbridge_contract::ParamSpec;
use workbridge_contract::ParamType;
use workbridge_contract::ToolDescriptor;
use workbridge_contract::ToolName;

use crate::error::ToolError;

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates tool arguments against the descriptor.
///
/// # Errors
///
/// Returns [`ToolError::InvalidParams`] naming the offending field.
pub fn validate_arguments(descriptor: &ToolDescriptor, args: &Value) -> Result<(), ToolError> {
    let Some(map) = args.as_object() else {
        return Err(ToolError::InvalidParams("arguments must be an object".to_string()));
    };

    for key in map.keys() {
        if !descriptor.params.iter().any(|param| param.name == key) {
            return Err(ToolError::InvalidParams(format!("unknown parameter: {key}")));
        }
    }

    for param in descriptor.params {
        match map.get(param.name) {
            Some(value) => validate_value(param, value)?,
            None if param.required => {
                return Err(ToolError::InvalidParams(format!(
                    "missing required parameter: {}",
                    param.name
                )));
            }
            None => {}
        }
    }

    validate_tool_rules(descriptor.name, map)
}

/// Validates a single argument value against its parameter contract.
fn validate_value(param: &ParamSpec, value: &Value) -> Result<(), ToolError> {
    match param.param_type {
        ParamType::String => {
            let text = expect_string(param.name, value)?;
            if text.trim().is_empty() {
                return Err(ToolError::InvalidParams(format!(
                    "parameter {} must not be empty",
                    param.name
                )));
            }
        }
        ParamType::Integer => {
            if !value.is_i64() && !value.is_u64() {
                return Err(ToolError::InvalidParams(format!(
                    "parameter {} must be an integer",
                    param.name
                )));
            }
        }
        ParamType::Date => {
            let text = expect_string(param.name, value)?;
            if !is_valid_date(text) {
                return Err(ToolError::InvalidParams(format!(
                    "parameter {} must be an ISO 8601 date (YYYY-MM-DD)",
                    param.name
                )));
            }
        }
        ParamType::Enum => {
            let text = expect_string(param.name, value)?;
            if !param.allowed_values.contains(&text) {
                return Err(ToolError::InvalidParams(format!(
                    "parameter {} must be one of: {}",
                    param.name,
                    param.allowed_values.join(", ")
                )));
            }
        }
        ParamType::Base64Bytes => {
            let text = expect_string(param.name, value)?;
            validate_base64_bounds(param, text)?;
        }
    }
    Ok(())
}

/// Cross-field rules that a single parameter contract cannot express.
fn validate_tool_rules(
    name: ToolName,
    map: &serde_json::Map<String, Value>,
) -> Result<(), ToolError> {
    if name == ToolName::UpdateTask
        && !map.contains_key("status")
        && !map.contains_key("due_date")
        && !map.contains_key("owner")
    {
        return Err(ToolError::InvalidParams(
            "at least one of status, due_date, owner is required".to_string(),
        ));
    }
    Ok(())
}

fn expect_string<'a>(name: &str, value: &'a Value) -> Result<&'a str, ToolError> {
    value
        .as_str()
        .ok_or_else(|| ToolError::InvalidParams(format!("parameter {name} must be a string")))
}

/// Checks base64 shape and the decoded size ceiling from the encoded length.
fn validate_base64_bounds(param: &ParamSpec, text: &str) -> Result<(), ToolError> {
    if text.is_empty() {
        return Err(ToolError::InvalidParams(format!(
            "parameter {} must not be empty",
            param.name
        )));
    }
    let invalid = || {
        ToolError::InvalidParams(format!("parameter {} is not valid base64", param.name))
    };
    if text.len() % 4 != 0 {
        return Err(invalid());
    }
    let bytes = text.as_bytes();
    let padding = bytes.iter().rev().take_while(|byte| **byte == b'=').count();
    if padding > 2 {
        return Err(invalid());
    }
    let body = &bytes[..bytes.len() - padding];
    if !body
        .iter()
        .all(|byte| byte.is_ascii_alphanumeric() || *byte == b'+' || *byte == b'/')
    {
        return Err(invalid());
    }
    if param.max_decoded_bytes > 0 {
        // padding <= 2 and len >= 4 here, so the subtraction cannot underflow.
        let decoded_len = (text.len() / 4) * 3 - padding;
        if decoded_len as u64 > param.max_decoded_bytes {
            return Err(ToolError::InvalidParams(format!(
                "parameter {} exceeds the {} byte decoded size ceiling",
                param.name, param.max_decoded_bytes
            )));
        }
    }
    Ok(())
}

/// Validates a calendar date in `YYYY-MM-DD` form.
fn is_valid_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let Some(year) = parse_digits(&text[0..4]) else {
        return false;
    };
    let Some(month) = parse_digits(&text[5..7]) else {
        return false;
    };
    let Some(day) = parse_digits(&text[8..10]) else {
        return false;
    };
    if !(1..=12).contains(&month) || day == 0 {
        return false;
    }
    day <= days_in_month(year, month)
}

fn parse_digits(text: &str) -> Option<u32> {
    if !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

const fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
