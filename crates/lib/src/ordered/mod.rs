//! Ordered, key-addressable collections over a replicated map.
//!
//! A [`MappedOrderedMap`] stores each element under its key as a small record
//! `{ "index": <int>, "value": <mapped value> }`. Order comes from comparing `index`,
//! never from the map's key order. Indexes may have gaps after removals.
//!
//! Elements are converted to and from their stored form by a [`Mapper`]. A local,
//! index-sorted cache serves reads; it is patched by local operations and by remote
//! events, and rebuilt after every remote transaction.
//!
//! Remote events may be delivered on another thread. Local mutations and remote
//! event handling are serialized, so a remote rebuild never lands between a local
//! write and the matching cache patch.

mod cache;
mod errors;
mod mapper;

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use tracing::{debug, trace, warn};

pub use errors::OrderedError;
pub use mapper::{FnMapper, JsonMapper, Mapper, ValueMapper};

use crate::{
    Result,
    constants::{INDEX_KEY, VALUE_KEY},
    crdt::{CrdtMap, MapEvent, MapEventKind, MapHandle, SubscriptionId, Value, transact},
};
use cache::{CacheEntry, OrderedCache};

type SharedCache<T> = Arc<Mutex<OrderedCache<T>>>;

/// Held by every local mutation and remote event handler
type OpLock = Arc<Mutex<()>>;

/// An insertion-ordered collection of `T` backed by one replicated map.
///
/// ```
/// use std::sync::Arc;
/// use collabmap::crdt::{CrdtRoot, MemoryRoot};
/// use collabmap::ordered::{JsonMapper, MappedOrderedMap};
///
/// let root = MemoryRoot::new();
/// let list = MappedOrderedMap::new(root.get_map("list"), Arc::new(JsonMapper::<String>::new()));
/// list.add("a", "first".to_string()).unwrap();
/// list.add("c", "third".to_string()).unwrap();
/// list.insert("b", "second".to_string(), 1).unwrap();
/// assert_eq!(list.keys(), vec!["a", "b", "c"]);
/// ```
pub struct MappedOrderedMap<T: Clone + Send + 'static> {
    map: MapHandle,
    mapper: Arc<dyn Mapper<T>>,
    cache: SharedCache<T>,
    ops: OpLock,
    subscriptions: Vec<SubscriptionId>,
}

impl<T: Clone + Send + 'static> MappedOrderedMap<T> {
    /// Wraps `map`, loading any entries it already holds.
    pub fn new(map: MapHandle, mapper: Arc<dyn Mapper<T>>) -> Self {
        let ops: OpLock = Arc::new(Mutex::new(()));
        let cache = Arc::new(Mutex::new(load(map.as_ref(), mapper.as_ref())));
        let subscriptions = subscribe(&map, &mapper, &cache, &ops);
        Self {
            map,
            mapper,
            cache,
            ops,
            subscriptions,
        }
    }

    /// The backing replicated map
    pub fn map(&self) -> &MapHandle {
        &self.map
    }

    /// Appends `value` under a new `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already present.
    pub fn add(&self, key: &str, value: T) -> Result<()> {
        assert!(!self.has(key), "key '{key}' already exists in ordered map");
        let _ops = self.lock_ops();
        self.append(key, value)
    }

    fn append(&self, key: &str, value: T) -> Result<()> {
        let index = self.cache.lock().unwrap().append_index();
        self.write_entry(key, index, &value)?;
        trace!(key = %key, index, "add");
        self.cache.lock().unwrap().upsert(CacheEntry {
            key: key.to_string(),
            index,
            value,
        });
        Ok(())
    }

    /// Inserts `value` under a new `key` so that it ends up at `position`.
    ///
    /// The new entry takes the index of the entry currently at `position`; that entry
    /// and every entry after it move up by one, all in one transaction. Inserting at
    /// `position == size` is the same as [`add`](MappedOrderedMap::add).
    ///
    /// # Panics
    ///
    /// Panics if `position > size` or if `key` is already present.
    pub fn insert(&self, key: &str, value: T, position: usize) -> Result<()> {
        let size = self.size();
        assert!(
            position <= size,
            "insert position {position} is beyond the end of the ordered map (size {size})"
        );
        assert!(!self.has(key), "key '{key}' already exists in ordered map");
        let _ops = self.lock_ops();
        if position == size {
            return self.append(key, value);
        }

        let (target, shifted): (i64, Vec<(String, i64)>) = {
            let cache = self.cache.lock().unwrap();
            let target = match cache.at(position) {
                Some(entry) => entry.index,
                None => cache.append_index(),
            };
            let shifted = cache
                .entries()
                .iter()
                .filter(|e| e.index >= target)
                .map(|e| (e.key.clone(), e.index + 1))
                .collect();
            (target, shifted)
        };

        transact(self.map.as_ref(), || {
            for (shifted_key, index) in &shifted {
                self.write_index(shifted_key, *index)?;
            }
            self.write_entry(key, target, &value)
        })?;
        debug!(key = %key, position, index = target, shifted = shifted.len(), "insert");

        let mut cache = self.cache.lock().unwrap();
        cache.shift_from(target);
        cache.upsert(CacheEntry {
            key: key.to_string(),
            index: target,
            value,
        });
        Ok(())
    }

    /// Rewrites the value of `key` at its current index, or appends it if new.
    pub fn update(&self, key: &str, value: T) -> Result<()> {
        let _ops = self.lock_ops();
        let current = self.cache.lock().unwrap().get(key).map(|e| e.index);
        let Some(index) = current else {
            return self.append(key, value);
        };
        self.write_entry(key, index, &value)?;
        trace!(key = %key, index, "update");
        self.cache.lock().unwrap().upsert(CacheEntry {
            key: key.to_string(),
            index,
            value,
        });
        Ok(())
    }

    /// Deletes `key`. Remaining indexes are not renumbered.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let _ops = self.lock_ops();
        let removed = self.map.delete(key)?;
        let cached = self.cache.lock().unwrap().remove(key);
        trace!(key = %key, removed, "remove");
        Ok(removed || cached)
    }

    /// Gives every listed key the index of its position in `keys`.
    ///
    /// Keys not present in the collection are skipped; entries not listed keep their
    /// index. A key listed more than once keeps its first position. Runs in one
    /// transaction.
    pub fn set_order<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let _ops = self.lock_ops();
        let assignments: Vec<(String, i64)> = {
            let cache = self.cache.lock().unwrap();
            let mut seen = HashSet::new();
            keys.iter()
                .enumerate()
                .filter(|(_, key)| cache.get(key.as_ref()).is_some())
                .map(|(position, key)| (key.as_ref().to_string(), position as i64))
                .filter(|(key, _)| seen.insert(key.clone()))
                .collect()
        };

        transact(self.map.as_ref(), || {
            for (key, index) in &assignments {
                self.write_index(key, *index)?;
            }
            Ok(())
        })?;
        debug!(assigned = assignments.len(), "set order");

        self.cache.lock().unwrap().reindex(|key| {
            assignments
                .iter()
                .find(|(assigned, _)| assigned == key)
                .map(|(_, index)| *index)
        });
        Ok(())
    }

    /// Moves `key` to index `to_index`, making room by incrementing every other entry
    /// whose index is `>= to_index`. Returns false if `key` is not present.
    pub fn set_index(&self, key: &str, to_index: i64) -> Result<bool> {
        let _ops = self.lock_ops();
        let shifted: Vec<(String, i64)> = {
            let cache = self.cache.lock().unwrap();
            if cache.get(key).is_none() {
                return Ok(false);
            }
            cache
                .entries()
                .iter()
                .filter(|e| e.key != key && e.index >= to_index)
                .map(|e| (e.key.clone(), e.index + 1))
                .collect()
        };

        transact(self.map.as_ref(), || {
            for (shifted_key, index) in &shifted {
                self.write_index(shifted_key, *index)?;
            }
            self.write_index(key, to_index)
        })?;
        debug!(key = %key, index = to_index, shifted = shifted.len(), "set index");

        self.cache.lock().unwrap().reindex(|candidate| {
            if candidate == key {
                return Some(to_index);
            }
            shifted
                .iter()
                .find(|(shifted_key, _)| shifted_key == candidate)
                .map(|(_, index)| *index)
        });
        Ok(true)
    }

    /// Deletes every entry in one transaction
    pub fn clear(&self) -> Result<()> {
        let _ops = self.lock_ops();
        self.map.clear()?;
        self.cache.lock().unwrap().clear();
        Ok(())
    }

    /// `(key, value)` pairs in order
    pub fn entries(&self) -> Vec<(String, T)> {
        self.cache
            .lock()
            .unwrap()
            .entries()
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Keys in order
    pub fn keys(&self) -> Vec<String> {
        self.cache
            .lock()
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.key.clone())
            .collect()
    }

    /// Values in order
    pub fn values(&self) -> Vec<T> {
        self.cache
            .lock()
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }

    /// Returns the value stored under `key`
    pub fn get(&self, key: &str) -> Option<T> {
        self.cache.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    /// Returns true if `key` is present
    pub fn has(&self, key: &str) -> bool {
        self.cache.lock().unwrap().get(key).is_some()
    }

    /// Number of entries
    pub fn size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Returns true if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Position of `key` in the ordered sequence
    pub fn get_index(&self, key: &str) -> Option<usize> {
        self.cache.lock().unwrap().position(key)
    }

    /// Stored order index of `key`
    pub fn order_index(&self, key: &str) -> Option<i64> {
        self.cache.lock().unwrap().get(key).map(|e| e.index)
    }

    /// Re-reads every entry from the backing map.
    pub fn rebuild(&self) {
        let _ops = self.lock_ops();
        let fresh = load(self.map.as_ref(), self.mapper.as_ref());
        *self.cache.lock().unwrap() = fresh;
    }

    fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.ops.lock().unwrap()
    }

    fn write_entry(&self, key: &str, index: i64, value: &T) -> Result<()> {
        let factory = self.map.factory();
        let payload = self.mapper.to_crdt(value, factory)?;
        let record = factory.make_map(vec![
            (INDEX_KEY.to_string(), Value::Int(index)),
            (VALUE_KEY.to_string(), payload),
        ])?;
        self.map.set(key, Value::Map(record))
    }

    fn write_index(&self, key: &str, index: i64) -> Result<()> {
        match self.map.get(key) {
            Some(Value::Map(record)) => record.set(INDEX_KEY, Value::Int(index)),
            _ => Err(OrderedError::CorruptEntry {
                key: key.to_string(),
                reason: "entry is not a record".to_string(),
            }
            .into()),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for MappedOrderedMap<T> {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.map.off(id);
        }
    }
}

impl<T: Clone + Send + fmt::Debug + 'static> fmt::Debug for MappedOrderedMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedOrderedMap")
            .field("entries", &self.entries())
            .finish()
    }
}

/// Decodes one stored `{index, value}` record.
fn decode<T>(mapper: &dyn Mapper<T>, key: &str, stored: &Value) -> Result<CacheEntry<T>> {
    let corrupt = |reason: &str| OrderedError::CorruptEntry {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let record = stored.as_map().ok_or_else(|| corrupt("entry is not a record"))?;
    let index = record
        .get(INDEX_KEY)
        .and_then(|index| index.as_int())
        .ok_or_else(|| corrupt("missing or non-integer index"))?;
    let payload = record
        .get(VALUE_KEY)
        .ok_or_else(|| corrupt("missing value"))?;
    Ok(CacheEntry {
        key: key.to_string(),
        index,
        value: mapper.from_crdt(&payload)?,
    })
}

fn load<T>(map: &dyn CrdtMap, mapper: &dyn Mapper<T>) -> OrderedCache<T> {
    let entries = map
        .entries()
        .into_iter()
        .filter_map(|(key, stored)| match decode(mapper, &key, &stored) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key = %key, error = %err, "skipping unreadable entry");
                None
            }
        })
        .collect();
    OrderedCache::from_entries(entries)
}

fn subscribe<T: Clone + Send + 'static>(
    map: &MapHandle,
    mapper: &Arc<dyn Mapper<T>>,
    cache: &SharedCache<T>,
    ops: &OpLock,
) -> Vec<SubscriptionId> {
    let upsert = {
        let mapper = Arc::clone(mapper);
        let cache = Arc::clone(cache);
        let ops = Arc::clone(ops);
        Arc::new(move |event: &MapEvent| {
            let (Some(key), Some(stored)) = (event.key(), event.value()) else {
                return;
            };
            let _ops = ops.lock().unwrap();
            match decode(mapper.as_ref(), key, stored) {
                Ok(entry) => {
                    trace!(key = %key, index = entry.index, "remote upsert");
                    cache.lock().unwrap().upsert(entry);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "ignoring unreadable remote entry");
                    cache.lock().unwrap().remove(key);
                }
            }
        })
    };

    let delete = {
        let cache = Arc::clone(cache);
        let ops = Arc::clone(ops);
        Arc::new(move |event: &MapEvent| {
            if let Some(key) = event.key() {
                let _ops = ops.lock().unwrap();
                trace!(key = %key, "remote delete");
                cache.lock().unwrap().remove(key);
            }
        })
    };

    let rebuild = {
        let weak: Weak<dyn CrdtMap> = Arc::downgrade(map);
        let mapper = Arc::clone(mapper);
        let cache = Arc::clone(cache);
        let ops = Arc::clone(ops);
        Arc::new(move |_: &MapEvent| {
            if let Some(map) = weak.upgrade() {
                let _ops = ops.lock().unwrap();
                let fresh = load(map.as_ref(), mapper.as_ref());
                *cache.lock().unwrap() = fresh;
            }
        })
    };

    vec![
        map.on(MapEventKind::RemoteInsert, upsert.clone()),
        map.on(MapEventKind::RemoteUpdate, upsert),
        map.on(MapEventKind::RemoteDelete, delete),
        map.on(MapEventKind::RemoteAfterTransaction, rebuild),
    ]
}
