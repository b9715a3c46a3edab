//! Connector for documents that are never shared.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::debug;

use super::{Awareness, Connector, LocalAwareness, Progress, ProgressCallback, SyncError};
use crate::crdt::CrdtRoot;

/// A connector that never contacts a network.
///
/// `connect` reports [`Progress::Complete`] immediately. Its awareness tracks only
/// the local participant and broadcasts nothing.
#[derive(Debug, Default)]
pub struct NoOpConnector {
    awareness: Option<Arc<LocalAwareness>>,
    connected: bool,
}

impl NoOpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for NoOpConnector {
    fn name(&self) -> &'static str {
        "no-op"
    }

    async fn connect(
        &mut self,
        url: &str,
        root: Arc<dyn CrdtRoot>,
        presence: Option<Json>,
        progress: ProgressCallback,
    ) {
        if self.connected {
            progress(Progress::failed(SyncError::AlreadyConnected {
                connector: self.name(),
            }));
            return;
        }
        let awareness = Arc::new(LocalAwareness::new(root.client_id()));
        awareness.set_local_state(presence);
        self.awareness = Some(awareness);
        self.connected = true;
        debug!(url = %url, client_id = root.client_id(), "no-op connector attached");
        progress(Progress::Complete);
    }

    async fn disconnect(&mut self, progress: ProgressCallback) {
        if !self.connected {
            progress(Progress::failed(SyncError::NotConnected {
                connector: self.name(),
            }));
            return;
        }
        if let Some(awareness) = &self.awareness {
            awareness.set_local_state(None);
        }
        self.connected = false;
        debug!("no-op connector detached");
        progress(Progress::Complete);
    }

    fn awareness(&self) -> Option<Arc<dyn Awareness>> {
        self.awareness
            .clone()
            .map(|awareness| awareness as Arc<dyn Awareness>)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
