//! A replicated document assembled from a [`CollabConfig`].
//!
//! [`CollabDocument`] owns the replicated root and the connector selected by the
//! configuration, and hands out structured objects and ordered collections over named
//! top-level maps of that root.
//!
//! ```
//! use collabmap::{config::CollabConfig, document::CollabDocument};
//! use serde_json::json;
//!
//! let doc = CollabDocument::new(CollabConfig::default()).unwrap();
//! let settings = doc.object("settings");
//! settings.set(&json!({"theme": "dark"})).unwrap();
//! assert_eq!(doc.object("settings").get_clone(), json!({"theme": "dark"}));
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde_json::Value as Json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::{
    Result,
    config::CollabConfig,
    crdt::{CRDTError, CrdtRoot, MapHandle},
    object::CrdtObject,
    ordered::{MappedOrderedMap, Mapper},
    sync::{Awareness, Connector, Progress, ProgressCallback, SyncError},
};

/// A replicated root together with the connector sharing it.
pub struct CollabDocument {
    config: CollabConfig,
    root: Arc<dyn CrdtRoot>,
    connector: AsyncMutex<Box<dyn Connector>>,
}

impl fmt::Debug for CollabDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollabDocument")
            .field("replication", &self.config.replication)
            .field("backend", &self.config.backend)
            .field("client_id", &self.root.client_id())
            .finish()
    }
}

impl CollabDocument {
    /// Builds the root and connector selected by `config`.
    pub fn new(config: CollabConfig) -> Result<Self> {
        let root = config.new_root()?;
        let connector = config.new_connector()?;
        debug!(
            client_id = root.client_id(),
            backend = root.backend(),
            connector = connector.name(),
            "created document"
        );
        Ok(Self {
            config,
            root,
            connector: AsyncMutex::new(connector),
        })
    }

    /// Uses an existing root and connector instead of the configured ones
    pub fn with_parts(
        config: CollabConfig,
        root: Arc<dyn CrdtRoot>,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            config,
            root,
            connector: AsyncMutex::new(connector),
        }
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<dyn CrdtRoot> {
        &self.root
    }

    /// The top-level map called `name`
    pub fn map(&self, name: &str) -> MapHandle {
        self.root.get_map(name)
    }

    /// A structured object over the top-level map called `name`
    pub fn object(&self, name: &str) -> CrdtObject {
        CrdtObject::new(self.root.get_map(name))
    }

    /// An ordered collection over the top-level map called `name`
    pub fn ordered<T, M>(&self, name: &str, mapper: M) -> MappedOrderedMap<T>
    where
        T: Clone + Send + 'static,
        M: Mapper<T> + 'static,
    {
        MappedOrderedMap::new(self.root.get_map(name), Arc::new(mapper))
    }

    /// Runs `f` in one transaction spanning every map of the document
    pub fn transact<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let mut body = Some(f);
        let mut output = None;
        self.root.transact(&mut || {
            if let Some(body) = body.take() {
                output = Some(body()?);
            }
            Ok(())
        })?;
        output.ok_or_else(|| {
            CRDTError::InvalidValue {
                reason: "transaction body was not executed".to_string(),
            }
            .into()
        })
    }

    /// Starts sharing the document at `url`, reporting through `progress`.
    pub async fn connect(&self, url: &str, presence: Option<Json>, progress: ProgressCallback) {
        let mut connector = self.connector.lock().await;
        info!(url = %url, connector = connector.name(), "connecting document");
        connector
            .connect(url, self.root.clone(), presence, progress)
            .await;
    }

    /// Connects and turns an error report into an `Err`.
    pub async fn connect_to(&self, url: &str, presence: Option<Json>) -> Result<()> {
        let (progress, outcome) = capture_terminal();
        self.connect(url, presence, progress).await;
        terminal_result(&outcome)
    }

    /// Stops sharing the document, reporting through `progress`.
    pub async fn disconnect(&self, progress: ProgressCallback) {
        let mut connector = self.connector.lock().await;
        info!(connector = connector.name(), "disconnecting document");
        connector.disconnect(progress).await;
    }

    /// Disconnects and turns an error report into an `Err`.
    pub async fn disconnect_now(&self) -> Result<()> {
        let (progress, outcome) = capture_terminal();
        self.disconnect(progress).await;
        terminal_result(&outcome)
    }

    pub async fn is_connected(&self) -> bool {
        self.connector.lock().await.is_connected()
    }

    /// Presence channel of the current or last session
    pub async fn awareness(&self) -> Option<Arc<dyn Awareness>> {
        self.connector.lock().await.awareness()
    }
}

type Outcome = Arc<Mutex<Option<Progress>>>;

fn capture_terminal() -> (ProgressCallback, Outcome) {
    let outcome: Outcome = Arc::new(Mutex::new(None));
    let sink = outcome.clone();
    let progress: ProgressCallback = Arc::new(move |state: Progress| {
        if state.is_terminal() {
            *sink.lock().unwrap() = Some(state);
        }
    });
    (progress, outcome)
}

fn terminal_result(outcome: &Outcome) -> Result<()> {
    match outcome.lock().unwrap().take() {
        Some(Progress::Complete) => Ok(()),
        Some(Progress::Error { message }) => Err(SyncError::Transport { reason: message }.into()),
        _ => Err(SyncError::Transport {
            reason: "connector reported no terminal state".to_string(),
        }
        .into()),
    }
}
