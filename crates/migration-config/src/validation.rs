//! Configuration validation framework.

use crate::{ConfigError, ConfigResult};

/// Trait for validating configuration values.
pub trait Validate {
    /// # Errors
    /// Returns validation errors if the configuration is invalid.
    fn validate(&self) -> ConfigResult<()>;
}

/// Validate a value is within a closed range.
///
/// # Errors
/// Returns `ConfigError::OutOfRange` if value is outside `[min, max]`.
pub fn validate_range(value: u64, min: u64, max: u64, field_name: &str) -> ConfigResult<()> {
    if value < min || value > max {
        Err(ConfigError::OutOfRange {
            field: field_name.to_string(),
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

/// Validate a string is not empty.
///
/// # Errors
/// Returns `ConfigError::MissingField` if the string is empty or whitespace-only.
pub fn validate_non_empty(value: &str, field_name: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField {
            field: field_name.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validate that `low <= high` for a pair of ordered fields.
///
/// # Errors
/// Returns `ConfigError::InvalidValue` if `low > high`.
pub fn validate_ordered(low: u64, high: u64, low_field: &str, high_field: &str) -> ConfigResult<()> {
    if low > high {
        Err(ConfigError::InvalidValue {
            field: low_field.to_string(),
            value: low.to_string(),
            reason: format!("must be <= {high_field} ({high})"),
        })
    } else {
        Ok(())
    }
}
