//! The replication primitive consumed by the mapping layers.
//!
//! This module defines the contract every replicated map backend satisfies and ships
//! two implementations of it.
//!
//! # Core Types
//!
//! - [`CrdtMap`] - A flat, string-keyed replicated map
//! - [`CrdtRoot`] - A document holding named top-level maps and exchanging updates
//! - [`Value`] - The value stored under a key: a primitive or a nested map
//! - [`MapEvent`] - Local and remote change notifications
//!
//! # Backends
//!
//! - [`memory`] - In-process primitive for single-user and offline documents
//! - `ydoc` - Y-CRDT primitive built on the `yrs` crate (requires the "y-crdt" feature)

pub mod errors;
pub mod events;
pub mod memory;
pub mod traits;
pub mod value;
#[cfg(feature = "y-crdt")]
pub mod ydoc;

pub use errors::CRDTError;
pub use events::{EventHandlers, MapEvent, MapEventHandler, MapEventKind, SubscriptionId};
pub use memory::{MemoryMap, MemoryRoot};
pub use traits::{CrdtMap, CrdtRoot, MapFactory, UpdateHandler, transact};
pub use value::{MapHandle, Value};
#[cfg(feature = "y-crdt")]
pub use ydoc::{YrsMap, YrsRoot};
