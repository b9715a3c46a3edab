//! Connecting a replicated root to a transport.
//!
//! A [`Connector`] owns the lifecycle of one session between a [`CrdtRoot`] and a
//! transport: it exchanges state with peers, relays local updates, applies remote
//! ones and exposes a presence channel. Failures are never returned to the caller;
//! they are reported through the [`Progress`] callback, which always receives a
//! terminal state.
//!
//! # Connectors
//!
//! - [`NoOpConnector`] - Reports completion immediately and never touches a network
//! - [`LoopbackConnector`] - Relays between roots of one process through a [`LoopbackHub`]

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::crdt::CrdtRoot;

pub mod awareness;
pub mod error;
pub mod loopback;
pub mod noop;

pub use awareness::{
    Awareness, LocalAwareness, PresenceBroadcaster, PresenceChange, PresenceEntry,
    PresenceHandler, PresenceUpdate,
};
pub use error::SyncError;
pub use loopback::{LoopbackConnector, LoopbackHub};
pub use noop::NoOpConnector;

/// Lifecycle state reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The operation was accepted and has not started yet
    Pending,
    /// The operation is running
    InProgress { message: String },
    /// The operation finished successfully
    Complete,
    /// The operation failed
    Error { message: String },
}

impl Progress {
    /// Returns true for `Complete` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Progress::Complete | Progress::Error { .. })
    }

    pub(crate) fn failed(err: impl fmt::Display) -> Self {
        Progress::Error {
            message: err.to_string(),
        }
    }
}

/// Callback receiving lifecycle states.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Lifecycle glue between a replicated root and a transport.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Short identifier of the connector, used in errors and logs
    fn name(&self) -> &'static str;

    /// Starts a session for `root` at `url`, announcing `presence` as the local state.
    ///
    /// `progress` receives at least one terminal state. A connector holds at most one
    /// session; connecting again reports an error and leaves the session untouched.
    async fn connect(
        &mut self,
        url: &str,
        root: Arc<dyn CrdtRoot>,
        presence: Option<Json>,
        progress: ProgressCallback,
    );

    /// Ends the current session, reporting a terminal state to `progress`.
    async fn disconnect(&mut self, progress: ProgressCallback);

    /// Presence channel of the current session.
    ///
    /// Available once `connect` succeeded and kept after `disconnect`.
    fn awareness(&self) -> Option<Arc<dyn Awareness>>;

    /// Returns true while a session is open
    fn is_connected(&self) -> bool;
}
