//! Error types for replicated map operations.
//!
//! This module defines structured error types for the replication primitive contract,
//! covering value type mismatches, misuse of map handles across backends or parents,
//! and failures while exchanging encoded updates with peers.

use thiserror::Error;

/// Structured error types for replicated map operations.
///
/// Backends return these from fallible writes and from the update exchange surface of
/// [`CrdtRoot`](crate::crdt::CrdtRoot). Reads never fail; absent keys are `None`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CRDTError {
    /// Type mismatch between the stored value and the requested one
    #[error("CRDT type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Invalid value provided for a map operation
    #[error("Invalid CRDT value: {reason}")]
    InvalidValue { reason: String },

    /// A map handle created by one backend was handed to another
    #[error("Map handle belongs to a different backend than '{backend}'")]
    ForeignMap { backend: &'static str },

    /// A nested map that is already part of the document was stored under a second parent
    #[error("Map is already attached to the document and cannot be stored at '{key}'")]
    AlreadyAttached { key: String },

    /// The owning root was dropped while a map handle was still in use
    #[error("Replicated root for this map has been dropped")]
    RootDropped,

    /// Operation not supported by this backend
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// An encoded update or state vector could not be decoded
    #[error("Failed to decode {what}: {reason}")]
    DecodeFailed { what: &'static str, reason: String },

    /// A decoded update could not be applied
    #[error("Failed to apply remote update: {reason}")]
    ApplyFailed { reason: String },
}

impl CRDTError {
    /// Check if this error is related to type mismatches
    pub fn is_type_error(&self) -> bool {
        matches!(self, CRDTError::TypeMismatch { .. })
    }

    /// Check if this error was caused by using a map handle where it does not belong
    pub fn is_handle_error(&self) -> bool {
        matches!(
            self,
            CRDTError::ForeignMap { .. } | CRDTError::AlreadyAttached { .. } | CRDTError::RootDropped
        )
    }

    /// Check if this error indicates an unsupported backend operation
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CRDTError::Unsupported { .. })
    }

    /// Check if this error is related to update exchange
    pub fn is_update_error(&self) -> bool {
        matches!(
            self,
            CRDTError::DecodeFailed { .. } | CRDTError::ApplyFailed { .. }
        )
    }
}

// Conversion from CRDTError to the main Error type
impl From<CRDTError> for crate::Error {
    fn from(err: CRDTError) -> Self {
        crate::Error::CRDT(err)
    }
}
