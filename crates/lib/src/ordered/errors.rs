//! Error types for ordered collections.

use thiserror::Error;

/// Structured error types for ordered collection operations.
///
/// Programming errors (adding an existing key, inserting past the end) panic instead
/// of returning one of these.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OrderedError {
    /// The mapping strategy could not convert a value
    #[error("Mapping failed for {type_name}: {reason}")]
    MappingFailed {
        type_name: &'static str,
        reason: String,
    },

    /// A stored entry does not have the `{index, value}` record shape
    #[error("Corrupt entry '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },
}

impl OrderedError {
    /// Check if this error came from the mapping strategy
    pub fn is_mapping_error(&self) -> bool {
        matches!(self, OrderedError::MappingFailed { .. })
    }

    /// Check if this error indicates malformed stored data
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, OrderedError::CorruptEntry { .. })
    }
}

impl From<OrderedError> for crate::Error {
    fn from(err: OrderedError) -> Self {
        crate::Error::Ordered(err)
    }
}
