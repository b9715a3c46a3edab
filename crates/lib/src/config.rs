//! Selection of the replication backend and connector for a document.
//!
//! [`CollabConfig`] is plain serde data so it can live in a JSON file next to the
//! application. The only non-serializable part is the [`LoopbackHub`] a loopback
//! connector joins, which is injected with [`CollabConfig::with_hub`].
//!
//! ```
//! use collabmap::config::{BackendKind, CollabConfig, Replication};
//!
//! let config = CollabConfig::from_json(r#"{"replication": "memory", "backend": "no-op"}"#).unwrap();
//! assert_eq!(config.replication, Replication::Memory);
//! assert_eq!(config.backend, BackendKind::NoOp);
//! assert_eq!(config.presence_timeout_ms, 30_000);
//! ```

use std::{path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    Result,
    constants::DEFAULT_PRESENCE_TIMEOUT_MS,
    crdt::{CrdtRoot, MemoryRoot},
    sync::{Connector, LoopbackConnector, LoopbackHub, NoOpConnector},
};

/// Which replication primitive backs the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Replication {
    /// In-process maps for single-user documents. Cannot exchange updates.
    #[default]
    Memory,
    /// Y-CRDT maps from the `yrs` crate. Requires the "y-crdt" feature.
    Yrs,
}

/// Which connector carries updates to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Never leaves the process
    #[default]
    NoOp,
    /// Relays through a [`LoopbackHub`] shared by documents of one process
    Loopback,
}

/// Configuration of a [`CollabDocument`](crate::document::CollabDocument).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CollabConfig {
    pub replication: Replication,
    pub backend: BackendKind,
    /// Remote presence not refreshed for this long is evicted
    #[serde(alias = "presence_timeout_ms", alias = "presenceTimeoutMs")]
    pub presence_timeout_ms: u64,
    /// Fixed participant identifier; random when absent
    #[serde(alias = "client_id", alias = "clientId")]
    pub client_id: Option<u64>,
    #[serde(skip)]
    pub hub: Option<LoopbackHub>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            replication: Replication::default(),
            backend: BackendKind::default(),
            presence_timeout_ms: DEFAULT_PRESENCE_TIMEOUT_MS,
            client_id: None,
            hub: None,
        }
    }
}

impl CollabConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ConfigError::Parse {
                source_name: "inline JSON".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), replication = ?config.replication, backend = ?config.backend, "loaded configuration");
        Ok(config)
    }

    pub fn with_replication(mut self, replication: Replication) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the hub joined by the loopback connector
    pub fn with_hub(mut self, hub: LoopbackHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_client_id(mut self, client_id: u64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Creates the replicated root selected by `replication`.
    pub fn new_root(&self) -> Result<Arc<dyn CrdtRoot>> {
        match self.replication {
            Replication::Memory => Ok(Arc::new(match self.client_id {
                Some(id) => MemoryRoot::with_client_id(id),
                None => MemoryRoot::new(),
            })),
            #[cfg(feature = "y-crdt")]
            Replication::Yrs => {
                use crate::crdt::YrsRoot;
                Ok(Arc::new(match self.client_id {
                    Some(id) => YrsRoot::with_client_id(id),
                    None => YrsRoot::new(),
                }))
            }
            #[cfg(not(feature = "y-crdt"))]
            Replication::Yrs => Err(ConfigError::ReplicationUnavailable {
                replication: "yrs",
                feature: "y-crdt",
            }
            .into()),
        }
    }

    /// Creates the connector selected by `backend`.
    pub fn new_connector(&self) -> Result<Box<dyn Connector>> {
        match self.backend {
            BackendKind::NoOp => Ok(Box::new(NoOpConnector::new())),
            BackendKind::Loopback => {
                let hub = self.hub.clone().ok_or(ConfigError::MissingHub)?;
                Ok(Box::new(
                    LoopbackConnector::new(hub).with_presence_timeout(self.presence_timeout_ms),
                ))
            }
        }
    }
}

/// Errors raised while reading or applying a configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration text is not valid
    #[error("Failed to parse configuration from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// The selected replication backend was compiled out
    #[error("Replication backend '{replication}' requires the '{feature}' feature")]
    ReplicationUnavailable {
        replication: &'static str,
        feature: &'static str,
    },

    /// The loopback connector was selected without a hub
    #[error("Loopback backend selected but no hub was provided")]
    MissingHub,
}

impl ConfigError {
    /// Check if this error comes from malformed configuration text
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ConfigError::Parse { .. })
    }

    /// Check if the configuration selects something this build cannot provide
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ConfigError::ReplicationUnavailable { .. } | ConfigError::MissingHub
        )
    }
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err)
    }
}
