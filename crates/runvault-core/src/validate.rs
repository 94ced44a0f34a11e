// ABOUTME: Validation contract for state payloads, checked before anything is written.
// ABOUTME: An invalid payload is fatal to the save; no snapshot or audit row is created.

use serde_json::Value;
use thiserror::Error;

/// Result of validating a state payload.
#[derive(Debug, Clone)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

/// A rejected state payload. Surfaced directly to the save caller rather
/// than converted to a failed-save result.
#[derive(Debug, Clone, Error)]
#[error("invalid state payload: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

/// Contract for payload validators. Injected into the persistence service;
/// any `is_valid = false` aborts the save with nothing written.
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &Value) -> Validation;
}

/// Default validator: execution state is always a keyed map.
pub struct StateShapeValidator;

impl Validator for StateShapeValidator {
    fn validate(&self, payload: &Value) -> Validation {
        if payload.is_object() {
            Validation::ok()
        } else {
            Validation::fail(vec![format!(
                "state payload must be a JSON object, got {}",
                json_kind(payload)
            )])
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
