//! Contract of the replication primitive.
//!
//! The mapping layers in this crate never talk to a concrete CRDT library. They consume
//! the traits defined here:
//! - [`CrdtMap`]: a flat, string-keyed replicated map with transactions and events
//! - [`CrdtRoot`]: the document owning named top-level maps, plus the update exchange
//!   surface used by connectors
//! - [`MapFactory`]: creation of nested maps
//!
//! Two backends implement the contract: [`MemoryRoot`](crate::crdt::memory::MemoryRoot)
//! for single-user documents and, with the `y-crdt` feature,
//! [`YrsRoot`](crate::crdt::ydoc::YrsRoot).

use std::{any::Any, fmt, sync::Arc};

use super::{CRDTError, MapEventHandler, MapEventKind, MapHandle, SubscriptionId, Value};
use crate::Result;

/// Creates nested replicated maps.
pub trait MapFactory {
    /// Creates a new nested map, optionally pre-populated with `initial` entries.
    ///
    /// The map belongs to the same backend as the factory and can be stored under a
    /// key of any map of that backend.
    fn make_map(&self, initial: Vec<(String, Value)>) -> Result<MapHandle>;
}

/// A flat replicated key-value map.
///
/// Writes outside of [`transact`](CrdtMap::transact) form an implicit single-write
/// transaction. Inside `transact` all writes are delivered to peers as one unit.
/// Nested calls to `transact` join the outermost transaction.
pub trait CrdtMap: Send + Sync + fmt::Debug + Any {
    /// Gets the value stored under `key`
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key`
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Deletes `key`. Returns whether the key was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Returns true if `key` is present
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns all keys. Order is backend specific and must not be relied upon.
    fn keys(&self) -> Vec<String>;

    /// Returns all key-value pairs. Order is backend specific.
    fn entries(&self) -> Vec<(String, Value)>;

    /// Returns the number of keys
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true if the map has no keys
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every key in one transaction
    fn clear(&self) -> Result<()> {
        self.transact(&mut || {
            for key in self.keys() {
                self.delete(&key)?;
            }
            Ok(())
        })
    }

    /// Runs `f` inside one transaction.
    ///
    /// An error returned by `f` is propagated; writes performed before the error are
    /// kept, as with the underlying primitives.
    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Returns the factory creating nested maps of this backend
    fn factory(&self) -> &dyn MapFactory;

    /// Registers `handler` for events of `kind`
    fn on(&self, kind: MapEventKind, handler: MapEventHandler) -> SubscriptionId;

    /// Removes a handler registered with [`on`](CrdtMap::on)
    fn off(&self, id: SubscriptionId) -> bool;

    /// Short name of the backend, used in errors and logs
    fn backend(&self) -> &'static str;

    /// Allows downcasting to the concrete map type
    fn as_any(&self) -> &dyn Any;
}

/// Callback receiving encoded updates produced by local transactions.
pub type UpdateHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A replicated document holding named top-level maps.
pub trait CrdtRoot: Send + Sync + fmt::Debug {
    /// Returns the top-level map called `name`, creating it on first use.
    ///
    /// Repeated calls return the same handle.
    fn get_map(&self, name: &str) -> MapHandle;

    /// Returns the factory creating nested maps of this backend
    fn factory(&self) -> &dyn MapFactory;

    /// Runs `f` inside one transaction spanning every map of this root
    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Identifier of this participant
    fn client_id(&self) -> u64;

    /// Short name of the backend, used in errors and logs
    fn backend(&self) -> &'static str;

    /// Encodes what this root has seen so peers can compute a diff
    fn state_vector(&self) -> Result<Vec<u8>>;

    /// Encodes the changes missing from a peer with state vector `since`,
    /// or the full state when `since` is `None`
    fn encode_update(&self, since: Option<&[u8]>) -> Result<Vec<u8>>;

    /// Applies an update received from a peer, emitting remote events
    fn apply_update(&self, update: &[u8]) -> Result<()>;

    /// Registers a handler receiving the update produced by every local transaction
    fn on_update(&self, handler: UpdateHandler) -> SubscriptionId;

    /// Removes a handler registered with [`on_update`](CrdtRoot::on_update)
    fn off_update(&self, id: SubscriptionId) -> bool;
}

/// Runs `f` inside a transaction on `map` and returns its result.
///
/// Convenience wrapper around [`CrdtMap::transact`] for bodies that produce a value.
pub fn transact<M, R>(map: &M, f: impl FnOnce() -> Result<R>) -> Result<R>
where
    M: CrdtMap + ?Sized,
{
    let mut body = Some(f);
    let mut output = None;
    map.transact(&mut || {
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
