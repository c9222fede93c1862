//! JSON Schema validation for transform configuration files.
//!
//! The schema is embedded at compile time from
//! `schemas/transform-config.json` and checked with JSON Schema Draft 7
//! before a configuration is deserialized, so users get every problem at
//! once instead of serde's first error.

use once_cell::sync::Lazy;
use serde_json::Value;

static TRANSFORM_CONFIG_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/transform-config.json")).expect("Invalid embedded schema")
});

/// Validate a JSON value against a schema.
///
/// Returns every validation error as a readable message.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a transform configuration document.
pub fn validate_transform_config(data: &Value) -> Result<(), Vec<String>> {
    validate(&TRANSFORM_CONFIG_SCHEMA, data)
}

pub fn is_valid_transform_config(data: &Value) -> bool {
    is_valid(&TRANSFORM_CONFIG_SCHEMA, data)
}
