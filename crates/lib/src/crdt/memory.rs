//! In-process replication primitive.
//!
//! [`MemoryRoot`] keeps every map in local memory. It honours the full local contract
//! (transactions, nested maps, `LocalAfterTransaction` notifications) but has no
//! notion of peers, so it never emits remote events and cannot exchange updates.
//! It backs single-user and offline documents and is the default replication choice.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::trace;

use super::{
    CRDTError, CrdtMap, CrdtRoot, EventHandlers, MapEvent, MapEventHandler, MapEventKind,
    MapFactory, MapHandle, SubscriptionId, UpdateHandler, Value,
};
use crate::Result;

const BACKEND: &str = "memory";

#[derive(Debug)]
struct RootInner {
    client_id: u64,
    named: Mutex<HashMap<String, Arc<MemoryMap>>>,
    /// Every map created under this root, for end-of-transaction notification
    registry: Mutex<Vec<Weak<MemoryMap>>>,
    depth: Mutex<usize>,
}

impl RootInner {
    fn new_map(self: &Arc<Self>, initial: BTreeMap<String, Value>) -> Arc<MemoryMap> {
        let map = Arc::new(MemoryMap {
            root: Arc::downgrade(self),
            entries: Mutex::new(initial),
            handlers: EventHandlers::new(),
            touched: AtomicBool::new(false),
        });
        let mut registry = self.registry.lock().unwrap();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(Arc::downgrade(&map));
        map
    }

    fn begin(&self) -> TxnGuard<'_> {
        *self.depth.lock().unwrap() += 1;
        TxnGuard(self)
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _guard = self.begin();
        f()
    }

    fn notify_touched(&self) {
        let maps: Vec<Arc<MemoryMap>> = self
            .registry
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for map in maps {
            if map.touched.swap(false, Ordering::SeqCst) {
                map.handlers.emit(&MapEvent::LocalAfterTransaction);
            }
        }
    }
}

/// Closes one transaction level; the outermost one notifies touched maps.
struct TxnGuard<'a>(&'a RootInner);

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        let outermost = {
            let mut depth = self.0.depth.lock().unwrap();
            *depth -= 1;
            *depth == 0
        };
        if outermost {
            self.0.notify_touched();
        }
    }
}

/// A replicated map living only in this process.
pub struct MemoryMap {
    root: Weak<RootInner>,
    entries: Mutex<BTreeMap<String, Value>>,
    handlers: EventHandlers,
    touched: AtomicBool,
}

impl MemoryMap {
    fn root(&self) -> Result<Arc<RootInner>> {
        self.root.upgrade().ok_or_else(|| CRDTError::RootDropped.into())
    }

    fn check_value(value: &Value) -> Result<()> {
        if let Value::Map(handle) = value
            && handle.as_any().downcast_ref::<MemoryMap>().is_none()
        {
            return Err(CRDTError::ForeignMap { backend: BACKEND }.into());
        }
        Ok(())
    }

    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> R) -> Result<R> {
        let root = self.root()?;
        let _guard = root.begin();
        let result = f(&mut self.entries.lock().unwrap());
        self.touched.store(true, Ordering::SeqCst);
        Ok(result)
    }
}

impl fmt::Debug for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMap")
            .field("keys", &self.entries.lock().unwrap().len())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl MapFactory for MemoryMap {
    fn make_map(&self, initial: Vec<(String, Value)>) -> Result<MapHandle> {
        let root = self.root()?;
        for (_, value) in &initial {
            Self::check_value(value)?;
        }
        Ok(root.new_map(initial.into_iter().collect()))
    }
}

impl CrdtMap for MemoryMap {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        Self::check_value(&value)?;
        trace!(key = %key, value = %value, "memory set");
        self.write(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        if !self.entries.lock().unwrap().contains_key(key) {
            return Ok(false);
        }
        trace!(key = %key, "memory delete");
        self.write(|entries| entries.remove(key).is_some())
    }

    fn has(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.root()?.transact(f)
    }

    fn factory(&self) -> &dyn MapFactory {
        self
    }

    fn on(&self, kind: MapEventKind, handler: MapEventHandler) -> SubscriptionId {
        self.handlers.subscribe(kind, handler)
    }

    fn off(&self, id: SubscriptionId) -> bool {
        self.handlers.unsubscribe(id)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Root of an in-process document.
///
/// ```
/// use collabmap::crdt::{CrdtMap, CrdtRoot, MemoryRoot, Value};
///
/// let root = MemoryRoot::new();
/// let people = root.get_map("people");
/// people.set("name", Value::from("Alice")).unwrap();
/// assert!(root.get_map("people").get("name").unwrap() == "Alice");
/// ```
#[derive(Debug)]
pub struct MemoryRoot {
    inner: Arc<RootInner>,
    /// Detached map serving as the root-level factory
    factory: Arc<MemoryMap>,
}

impl MemoryRoot {
    /// Create an empty root with a random client id
    pub fn new() -> Self {
        Self::with_client_id(rand::random())
    }

    /// Create an empty root with a fixed client id
    pub fn with_client_id(client_id: u64) -> Self {
        let inner = Arc::new(RootInner {
            client_id,
            named: Mutex::new(HashMap::new()),
            registry: Mutex::new(Vec::new()),
            depth: Mutex::new(0),
        });
        let factory = inner.new_map(BTreeMap::new());
        Self { inner, factory }
    }
}

impl Default for MemoryRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot for MemoryRoot {
    fn get_map(&self, name: &str) -> MapHandle {
        let mut named = self.inner.named.lock().unwrap();
        let map = named
            .entry(name.to_string())
            .or_insert_with(|| self.inner.new_map(BTreeMap::new()));
        Arc::clone(map) as MapHandle
    }

    fn factory(&self) -> &dyn MapFactory {
        self.factory.as_ref()
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.inner.transact(f)
    }

    fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn state_vector(&self) -> Result<Vec<u8>> {
        Err(CRDTError::Unsupported {
            backend: BACKEND,
            operation: "state_vector",
        }
        .into())
    }

    fn encode_update(&self, _since: Option<&[u8]>) -> Result<Vec<u8>> {
        Err(CRDTError::Unsupported {
            backend: BACKEND,
            operation: "encode_update",
        }
        .into())
    }

    fn apply_update(&self, _update: &[u8]) -> Result<()> {
        Err(CRDTError::Unsupported {
            backend: BACKEND,
            operation: "apply_update",
        }
        .into())
    }

    /// Memory roots never produce updates; the handler is accepted and never called.
    fn on_update(&self, _handler: UpdateHandler) -> SubscriptionId {
        SubscriptionId::next()
    }

    fn off_update(&self, _id: SubscriptionId) -> bool {
        false
    }
}
