//! Pre-write validation of field maps against an entity definition.
//!
//! Pure functions: no I/O. The first failing rule is reported; rules run
//! in a fixed order (required, then per-property type and constraint
//! checks, then strict unknown-property rejection) so error messages are
//! stable across runs.

use backsaas_core::{Entity, PropertyDefinition, PropertyType};
use serde_json::{Map, Value};

use crate::store::StoreError;

/// Validates a full field map for insert: every required property must be
/// present unless it carries a schema-level default.
pub fn validate_insert(entity: &Entity, data: &Map<String, Value>) -> Result<(), StoreError> {
    for required in &entity.schema.required {
        let def = match entity.property(required) {
            Some(def) => def,
            // Unknown required names are a schema defect caught by schema
            // validation; tolerate here.
            None => continue,
        };
        if !data.contains_key(required) && !def.has_default() {
            return Err(StoreError::Validation {
                message: format!("required property '{required}' is missing"),
            });
        }
    }
    validate_present_fields(entity, data)
}

/// Validates a partial field map for update: only the supplied properties
/// are checked; required-ness is an insert-time concern.
pub fn validate_update(entity: &Entity, data: &Map<String, Value>) -> Result<(), StoreError> {
    validate_present_fields(entity, data)
}

fn validate_present_fields(entity: &Entity, data: &Map<String, Value>) -> Result<(), StoreError> {
    for (name, value) in data {
        let def = entity.property(name).ok_or_else(|| StoreError::Validation {
            message: format!("unknown property '{name}'"),
        })?;
        if value.is_null() {
            // Null is allowed for non-required properties; required nulls
            // fail the same way as absent values.
            if entity.is_required(name) && !def.has_default() {
                return Err(StoreError::Validation {
                    message: format!("required property '{name}' must not be null"),
                });
            }
            continue;
        }
        check_value(name, def, value)?;
    }
    Ok(())
}

fn check_value(name: &str, def: &PropertyDefinition, value: &Value) -> Result<(), StoreError> {
    let ty = def
        .property_type(name)
        .map_err(|e| StoreError::Validation {
            message: e.to_string(),
        })?;
    let mismatch = || StoreError::Validation {
        message: format!("property '{name}' expects {ty}, got {value}"),
    };
    match ty {
        PropertyType::String => {
            let s = value.as_str().ok_or_else(mismatch)?;
            check_string(name, def, s)?;
        }
        PropertyType::Integer => {
            // Whole-valued floats are accepted for transport tolerance.
            let whole = value.as_i64().is_some()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0);
            if !whole {
                return Err(mismatch());
            }
            check_range(name, def, value.as_f64().unwrap_or_default())?;
        }
        PropertyType::Number => {
            let n = value.as_f64().ok_or_else(mismatch)?;
            check_range(name, def, n)?;
        }
        PropertyType::Boolean => {
            if !value.is_boolean() {
                return Err(mismatch());
            }
        }
        PropertyType::Array => {
            if !value.is_array() {
                return Err(mismatch());
            }
        }
        PropertyType::Object => {
            if !value.is_object() {
                return Err(mismatch());
            }
        }
    }
    if let Some(ref allowed) = def.enum_values {
        if !allowed.contains(value) {
            return Err(StoreError::Validation {
                message: format!("property '{name}' must be one of the enum values"),
            });
        }
    }
    Ok(())
}

fn check_string(name: &str, def: &PropertyDefinition, s: &str) -> Result<(), StoreError> {
    let len = s.chars().count() as u32;
    if let Some(min) = def.min_length {
        if len < min {
            return Err(StoreError::Validation {
                message: format!("property '{name}' must be at least {min} characters"),
            });
        }
    }
    if let Some(max) = def.max_length {
        if len > max {
            return Err(StoreError::Validation {
                message: format!("property '{name}' must be at most {max} characters"),
            });
        }
    }
    if let Some(ref pattern) = def.pattern {
        let re = regex::Regex::new(pattern).map_err(|e| StoreError::Validation {
            message: format!("property '{name}' has an invalid pattern: {e}"),
        })?;
        if !re.is_match(s) {
            return Err(StoreError::Validation {
                message: format!("property '{name}' does not match the required pattern"),
            });
        }
    }
    Ok(())
}

fn check_range(name: &str, def: &PropertyDefinition, n: f64) -> Result<(), StoreError> {
    if let Some(min) = def.minimum {
        if n < min {
            return Err(StoreError::Validation {
                message: format!("property '{name}' must be >= {min}"),
            });
        }
    }
    if let Some(max) = def.maximum {
        if n > max {
            return Err(StoreError::Validation {
                message: format!("property '{name}' must be <= {max}"),
            });
        }
    }
    Ok(())
}
