//! Error types for the structured object projection.
//!
//! Covers malformed field names (which would corrupt the dot-path encoding), values
//! that cannot be projected onto a map, and typed conversion failures.

use thiserror::Error;

/// Structured error types for object projection operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Field name cannot be encoded as a flat path segment
    #[error("Invalid field name '{field}': {reason}")]
    InvalidField { field: String, reason: &'static str },

    /// Whole-structure operations require an object or array
    #[error("Expected an object or array, found {actual}")]
    NotStructured { actual: &'static str },

    /// Array position beyond what the flat encoding reads back as an array
    #[error("Array position {position} exceeds the maximum of {max}")]
    PositionOutOfRange { position: usize, max: usize },

    /// Serializing a typed value into a structure failed
    #[error("Failed to serialize value into '{object}': {reason}")]
    SerializationFailed { object: String, reason: String },

    /// Deserializing the structure into a typed value failed
    #[error("Failed to deserialize '{object}': {reason}")]
    DeserializationFailed { object: String, reason: String },
}

impl ObjectError {
    /// Check if this error was caused by a malformed field name
    pub fn is_invalid_field(&self) -> bool {
        matches!(self, ObjectError::InvalidField { .. })
    }

    /// Check if this error is related to the shape of a value
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            ObjectError::NotStructured { .. } | ObjectError::PositionOutOfRange { .. }
        )
    }

    /// Check if this error is related to serialization
    pub fn is_serialization_error(&self) -> bool {
        matches!(
            self,
            ObjectError::SerializationFailed { .. } | ObjectError::DeserializationFailed { .. }
        )
    }
}

impl From<ObjectError> for crate::Error {
    fn from(err: ObjectError) -> Self {
        crate::Error::Object(err)
    }
}
