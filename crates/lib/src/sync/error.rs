//! Error types for the synchronization module.

use thiserror::Error;

/// Errors that can occur while connecting a replicated root to a transport.
///
/// Connectors never return these from `connect`/`disconnect`; they are rendered into
/// the terminal [`Progress::Error`](crate::sync::Progress::Error) state. They surface
/// as values from the parsing and session helpers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Attempted to connect a connector that already holds a session.
    #[error("Connector '{connector}' is already connected")]
    AlreadyConnected { connector: &'static str },

    /// Attempted to disconnect a connector without a session.
    #[error("Connector '{connector}' is not connected")]
    NotConnected { connector: &'static str },

    /// The connection URL could not be parsed or names no room.
    #[error("Invalid sync URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL scheme is not handled by this connector.
    #[error("URL scheme '{scheme}' not supported by connector '{connector}'")]
    UnsupportedScheme {
        scheme: String,
        connector: &'static str,
    },

    /// The transport failed while exchanging state.
    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

impl SyncError {
    /// Check if this error is caused by the connection lifecycle state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyConnected { .. } | SyncError::NotConnected { .. }
        )
    }

    /// Check if this error is caused by a malformed or unsupported address.
    pub fn is_address_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidUrl { .. } | SyncError::UnsupportedScheme { .. }
        )
    }

    /// Check if this is a transport failure.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
