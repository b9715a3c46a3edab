//! Constants used throughout the collabmap library.
//!
//! Central definitions for well-known keys of the flat encoding, transaction origins
//! and defaults.

/// Separator between segments of a flat path key.
pub const PATH_SEPARATOR: char = '.';

/// Key holding the ordering position inside an ordered entry record.
pub const INDEX_KEY: &str = "index";

/// Key holding the mapped payload inside an ordered entry record.
pub const VALUE_KEY: &str = "value";

/// Transaction origin tagging writes made through this process.
pub const LOCAL_ORIGIN: &str = "collabmap-local";

/// Transaction origin tagging updates received from peers.
pub const REMOTE_ORIGIN: &str = "collabmap-remote";

/// Largest segment read as an array position; bigger numbers are plain field names.
pub const MAX_ARRAY_POSITION: usize = 1_000_000;

/// URL scheme understood by the loopback connector.
pub const LOOPBACK_SCHEME: &str = "loopback";

/// Presence entries not refreshed for this long are considered stale.
pub const DEFAULT_PRESENCE_TIMEOUT_MS: u64 = 30_000;

/// Capacity of each loopback room's broadcast channel.
pub const LOOPBACK_CHANNEL_CAPACITY: usize = 256;
