//!
//! collabmap: nested documents and ordered collections on flat replicated maps.
//!
//! Conflict-free replicated maps merge concurrent edits key by key. This library lays
//! richer shapes over such maps so that independent edits stay independent.
//!
//! ## Core Concepts
//!
//! * **Replication primitive (`crdt::CrdtMap`, `crdt::CrdtRoot`)**: The contract every backend satisfies: a flat string-keyed map with transactions, local and remote events, nested maps, and an encoded update exchange.
//!     * **MemoryRoot (`crdt::MemoryRoot`)**: In-process backend for single-user and offline documents.
//!     * **YrsRoot (`crdt::YrsRoot`)**: Y-CRDT backend built on the `yrs` crate (requires the "y-crdt" feature).
//! * **Structured objects (`object::CrdtObject`)**: A nested JSON-like structure projected onto one map, every leaf stored under its dot-joined path (`address.city`, `items.0`).
//! * **Ordered collections (`ordered::MappedOrderedMap`)**: Key-addressable elements kept in order by a numeric `index` stored next to each value; values are converted by a `Mapper`.
//! * **Connectors (`sync::Connector`)**: Lifecycle glue between a root and a transport, with progress reporting and a presence channel.
//! * **Documents (`document::CollabDocument`)**: A root and connector built from a `config::CollabConfig`.

pub mod clock;
pub mod config;
pub mod constants;
pub mod crdt;
pub mod document;
pub mod object;
pub mod ordered;
pub mod sync;

/// Re-export the time sources for easier access.
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use document::CollabDocument;

/// Y-CRDT types re-exported for convenience when the "y-crdt" feature is enabled.
///
/// This module re-exports the `yrs` crate so client code working with
/// [`YrsRoot::doc`](crdt::YrsRoot::doc) doesn't need to add `yrs` as a separate dependency.
#[cfg(feature = "y-crdt")]
pub mod y_crdt {
    pub use yrs::*;
}

/// Result type used throughout the collabmap library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the collabmap library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured errors of the replication primitive
    #[error(transparent)]
    CRDT(crdt::CRDTError),

    /// Structured errors from the object projection
    #[error(transparent)]
    Object(object::ObjectError),

    /// Structured errors from ordered collections
    #[error(transparent)]
    Ordered(ordered::OrderedError),

    /// Structured errors from connectors
    #[error(transparent)]
    Sync(sync::SyncError),

    /// Structured configuration errors
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::CRDT(_) => "crdt",
            Error::Object(_) => "object",
            Error::Ordered(_) => "ordered",
            Error::Sync(_) => "sync",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(io_err) => io_err.kind() == std::io::ErrorKind::NotFound,
            Error::Sync(sync_err) => matches!(sync_err, sync::SyncError::NotConnected { .. }),
            _ => false,
        }
    }

    /// Check if this error is a value type mismatch.
    pub fn is_type_error(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_type_error(),
            _ => false,
        }
    }

    /// Check if a map handle was used where it does not belong.
    pub fn is_handle_error(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_handle_error(),
            _ => false,
        }
    }

    /// Check if the backend does not support the requested operation.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_unsupported(),
            _ => false,
        }
    }

    /// Check if an encoded update could not be decoded or applied.
    pub fn is_update_error(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_update_error(),
            _ => false,
        }
    }

    /// Check if this is a CRDT-related error.
    pub fn is_crdt_error(&self) -> bool {
        matches!(self, Error::CRDT(_))
    }

    /// Check if a field name cannot be represented as a path segment.
    pub fn is_invalid_field(&self) -> bool {
        match self {
            Error::Object(object_err) => object_err.is_invalid_field(),
            _ => false,
        }
    }

    /// Check if a value did not have the expected structured shape.
    pub fn is_shape_error(&self) -> bool {
        match self {
            Error::Object(object_err) => object_err.is_shape_error(),
            _ => false,
        }
    }

    /// Check if this is a serialization or deserialization failure.
    pub fn is_serialization_error(&self) -> bool {
        match self {
            Error::Serialize(_) => true,
            Error::Object(object_err) => object_err.is_serialization_error(),
            Error::Ordered(ordered_err) => ordered_err.is_mapping_error(),
            _ => false,
        }
    }

    /// Check if this is an object projection error.
    pub fn is_object_error(&self) -> bool {
        matches!(self, Error::Object(_))
    }

    /// Check if a mapper failed to convert a value.
    pub fn is_mapping_error(&self) -> bool {
        match self {
            Error::Ordered(ordered_err) => ordered_err.is_mapping_error(),
            _ => false,
        }
    }

    /// Check if stored data violates the expected layout.
    pub fn is_integrity_error(&self) -> bool {
        match self {
            Error::Ordered(ordered_err) => ordered_err.is_integrity_error(),
            _ => false,
        }
    }

    /// Check if this is a connector error.
    pub fn is_sync_error(&self) -> bool {
        matches!(self, Error::Sync(_))
    }

    /// Check if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is an I/O error.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
