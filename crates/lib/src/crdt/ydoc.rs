//! Y-CRDT replication primitive built on the `yrs` crate.
//!
//! Every [`YrsMap`] wraps a `yrs::MapRef` living in the `yrs::Doc` owned by its
//! [`YrsRoot`]. Writes are applied to the document immediately so local reads observe
//! them. Transactions are tracked as batches: when the outermost batch closes, the
//! state-vector diff accumulated since the batch started is encoded once and handed to
//! the update handlers, so a peer applies the whole batch as one remote transaction.
//!
//! Maps created through [`MapFactory::make_map`] start detached (the Y.js "prelim"
//! state). Storing one under a key of an attached map integrates its content into the
//! document; from then on the handle writes through to the document.
//!
//! Remote updates are applied under [`REMOTE_ORIGIN`]. Map observers only queue the
//! resulting per-key changes; they are delivered to handlers after the `yrs`
//! transaction has been released, followed by `RemoteAfterTransaction`.

use std::{
    any::Any as StdAny,
    collections::{BTreeMap, HashMap},
    fmt,
    mem,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use ::yrs::{
    Any, Doc, Map as _, MapPrelim, MapRef, Observable, Origin, Out, ReadTxn, StateVector,
    Subscription, Transact, Transaction, TransactionMut, Update,
    types::EntryChange,
    updates::{decoder::Decode, encoder::Encode},
};
use tracing::{debug, trace, warn};

use super::{
    CRDTError, CrdtMap, CrdtRoot, EventHandlers, MapEvent, MapEventHandler, MapEventKind,
    MapFactory, MapHandle, SubscriptionId, UpdateHandler, Value,
};
use crate::{
    Result,
    constants::{LOCAL_ORIGIN, REMOTE_ORIGIN},
};

const BACKEND: &str = "yrs";

/// Largest integer a JS number represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

type PendingEvents = Arc<Mutex<Vec<(Weak<YrsMap>, MapEvent)>>>;

#[derive(Default)]
struct Batch {
    depth: usize,
    start: Option<StateVector>,
    dirty: bool,
}

struct DocInner {
    doc: Doc,
    /// Serializes `yrs` transactions across threads
    txn_lock: Mutex<()>,
    named: Mutex<HashMap<String, Arc<YrsMap>>>,
    batch: Mutex<Batch>,
    /// Handles written to during the current batch
    touched: Mutex<Vec<Weak<YrsMap>>>,
    /// Handles with a `yrs` observer installed
    observed: Mutex<Vec<Weak<YrsMap>>>,
    pending: PendingEvents,
    update_handlers: Mutex<Vec<(SubscriptionId, UpdateHandler)>>,
}

impl DocInner {
    fn read<R>(&self, f: impl FnOnce(&Transaction<'_>) -> R) -> R {
        let _lock = self.txn_lock.lock().unwrap();
        let txn = self.doc.transact();
        f(&txn)
    }

    /// Runs `f` in a read-write transaction; observers fire before the lock is released.
    fn read_write<R>(&self, origin: &str, f: impl FnOnce(&mut TransactionMut<'_>) -> R) -> R {
        let _lock = self.txn_lock.lock().unwrap();
        let mut txn = self.doc.transact_mut_with(origin);
        f(&mut txn)
    }

    fn begin(&self) -> BatchGuard<'_> {
        let mut batch = self.batch.lock().unwrap();
        if batch.depth == 0 {
            batch.start = Some(self.read(|txn| txn.state_vector()));
            batch.dirty = false;
        }
        batch.depth += 1;
        BatchGuard(self)
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _guard = self.begin();
        f()
    }

    fn mark_written(&self, map: &YrsMap) {
        self.batch.lock().unwrap().dirty = true;
        if !map.touched.swap(true, Ordering::SeqCst) {
            self.touched.lock().unwrap().push(map.me.clone());
        }
    }

    fn finish(&self) {
        let since = {
            let mut batch = self.batch.lock().unwrap();
            batch.depth -= 1;
            if batch.depth > 0 {
                return;
            }
            let start = batch.start.take();
            if mem::take(&mut batch.dirty) { start } else { None }
        };

        if let Some(since) = since {
            let update = self.read(|txn| txn.encode_state_as_update_v1(&since));
            debug!(bytes = update.len(), "local transaction produced update");
            let handlers: Vec<UpdateHandler> = self
                .update_handlers
                .lock()
                .unwrap()
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect();
            for handler in handlers {
                handler(&update);
            }
        }

        let touched = mem::take(&mut *self.touched.lock().unwrap());
        for map in touched.iter().filter_map(Weak::upgrade) {
            map.touched.store(false, Ordering::SeqCst);
            map.handlers.emit(&MapEvent::LocalAfterTransaction);
        }
    }
}

impl fmt::Debug for DocInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocInner")
            .field("client_id", &self.doc.client_id())
            .field("maps", &self.named.lock().unwrap().len())
            .finish()
    }
}

struct BatchGuard<'a>(&'a DocInner);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

enum Slot {
    /// Integrated into the document
    Attached(MapRef),
    /// Created by the factory and not stored anywhere yet
    Detached(BTreeMap<String, Value>),
}

/// A replicated map backed by a `yrs::MapRef`.
pub struct YrsMap {
    root: Weak<DocInner>,
    me: Weak<YrsMap>,
    slot: Mutex<Slot>,
    handlers: EventHandlers,
    observer: Mutex<Option<Subscription>>,
    touched: AtomicBool,
}

impl YrsMap {
    fn new(root: Weak<DocInner>, slot: Slot) -> Arc<Self> {
        Arc::new_cyclic(|me| YrsMap {
            root,
            me: me.clone(),
            slot: Mutex::new(slot),
            handlers: EventHandlers::new(),
            observer: Mutex::new(None),
            touched: AtomicBool::new(false),
        })
    }

    /// Returns true once the map is part of the document
    pub fn is_attached(&self) -> bool {
        matches!(*self.slot.lock().unwrap(), Slot::Attached(_))
    }

    fn root(&self) -> Result<Arc<DocInner>> {
        self.root.upgrade().ok_or_else(|| CRDTError::RootDropped.into())
    }

    fn attached_ref(&self) -> Option<MapRef> {
        match &*self.slot.lock().unwrap() {
            Slot::Attached(map) => Some(map.clone()),
            Slot::Detached(_) => None,
        }
    }

    fn downcast(handle: &MapHandle) -> Result<&YrsMap> {
        handle
            .as_any()
            .downcast_ref::<YrsMap>()
            .ok_or_else(|| CRDTError::ForeignMap { backend: BACKEND }.into())
    }

    fn out_to_value(&self, out: &Out) -> Value {
        match out {
            Out::Any(any) => any_to_value(any),
            Out::YMap(map) => {
                Value::Map(YrsMap::new(self.root.clone(), Slot::Attached(map.clone())))
            }
            other => {
                warn!(?other, "unsupported shared type in replicated map");
                Value::Undefined
            }
        }
    }

    /// Applies a write to the document inside its own `yrs` transaction.
    fn write<R>(
        &self,
        map: &MapRef,
        f: impl FnOnce(&mut TransactionMut, &MapRef) -> Result<R>,
    ) -> Result<R> {
        let root = self.root()?;
        let _guard = root.begin();
        let result = root.read_write(LOCAL_ORIGIN, |txn| f(txn, map));
        root.mark_written(self);
        result
    }

    /// A detached handle that gained handlers before attaching observes once attached.
    fn ensure_pending_observer(&self) {
        if self.handlers.has_handlers() {
            self.ensure_observer();
        }
    }

    /// Installs the `yrs` observer feeding remote per-key events, once.
    fn ensure_observer(&self) {
        let Some(map) = self.attached_ref() else {
            return;
        };
        let Some(root) = self.root.upgrade() else {
            return;
        };
        let mut observer = self.observer.lock().unwrap();
        if observer.is_some() {
            return;
        }

        let me = self.me.clone();
        let pending = Arc::clone(&root.pending);
        let remote = Origin::from(REMOTE_ORIGIN);
        let subscription = map.observe(move |txn, event| {
            if txn.origin() != Some(&remote) {
                return;
            }
            let Some(this) = me.upgrade() else {
                return;
            };
            let mut queue = pending.lock().unwrap();
            for (key, change) in event.keys(txn) {
                let key = key.to_string();
                let event = match change {
                    EntryChange::Inserted(value) => MapEvent::RemoteInsert {
                        key,
                        value: this.out_to_value(value),
                    },
                    EntryChange::Updated(_, value) => MapEvent::RemoteUpdate {
                        key,
                        value: this.out_to_value(value),
                    },
                    EntryChange::Removed(_) => MapEvent::RemoteDelete { key },
                };
                queue.push((me.clone(), event));
            }
        });
        *observer = Some(subscription);
        root.observed.lock().unwrap().push(self.me.clone());
    }
}

/// Writes `value` under `key` of `target`, integrating detached maps recursively.
fn integrate(txn: &mut TransactionMut, target: &MapRef, key: &str, value: Value) -> Result<()> {
    match value {
        Value::Map(handle) => {
            let child = YrsMap::downcast(&handle)?;
            let entries = {
                let mut slot = child.slot.lock().unwrap();
                match &mut *slot {
                    Slot::Attached(_) => {
                        return Err(CRDTError::AlreadyAttached {
                            key: key.to_string(),
                        }
                        .into());
                    }
                    Slot::Detached(entries) => mem::take(entries),
                }
            };
            let child_ref = target.insert(txn, key, MapPrelim::default());
            for (child_key, child_value) in entries {
                integrate(txn, &child_ref, &child_key, child_value)?;
            }
            *child.slot.lock().unwrap() = Slot::Attached(child_ref);
            child.ensure_pending_observer();
        }
        primitive => {
            trace!(key = %key, value = %primitive, "yrs set");
            target.insert(txn, key, value_to_any(&primitive));
        }
    }
    Ok(())
}

fn value_to_any(value: &Value) -> Any {
    match value {
        Value::Undefined => Any::Undefined,
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Int(i) => Any::Number(*i as f64),
        Value::Float(f) => Any::Number(*f),
        Value::Text(s) => Any::String(Arc::from(s.as_str())),
        // Maps are routed through `integrate`
        Value::Map(_) => Any::Undefined,
    }
}

fn any_to_value(any: &Any) -> Value {
    match any {
        Any::Undefined => Value::Undefined,
        Any::Null => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Value::Int(*n as i64),
        Any::Number(n) => Value::Float(*n),
        Any::BigInt(i) => Value::Int(*i),
        Any::String(s) => Value::Text(s.to_string()),
        other => {
            warn!(?other, "unsupported yrs value in replicated map");
            Value::Undefined
        }
    }
}

impl fmt::Debug for YrsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YrsMap")
            .field("attached", &self.is_attached())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl MapFactory for YrsMap {
    fn make_map(&self, initial: Vec<(String, Value)>) -> Result<MapHandle> {
        let map = YrsMap::new(self.root.clone(), Slot::Detached(BTreeMap::new()));
        for (key, value) in initial {
            map.set(&key, value)?;
        }
        Ok(map)
    }
}

impl CrdtMap for YrsMap {
    fn get(&self, key: &str) -> Option<Value> {
        let map = match &*self.slot.lock().unwrap() {
            Slot::Attached(map) => map.clone(),
            Slot::Detached(entries) => return entries.get(key).cloned(),
        };
        let root = self.root.upgrade()?;
        let out = root.read(|txn| map.get(txn, key))?;
        Some(self.out_to_value(&out))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        if let Value::Map(handle) = &value
            && YrsMap::downcast(handle)?.is_attached()
        {
            return Err(CRDTError::AlreadyAttached {
                key: key.to_string(),
            }
            .into());
        }
        let map = {
            let mut slot = self.slot.lock().unwrap();
            match &mut *slot {
                Slot::Attached(map) => map.clone(),
                Slot::Detached(entries) => {
                    entries.insert(key.to_string(), value);
                    return Ok(());
                }
            }
        };
        self.write(&map, |txn, map| integrate(txn, map, key, value))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let map = {
            let mut slot = self.slot.lock().unwrap();
            match &mut *slot {
                Slot::Attached(map) => map.clone(),
                Slot::Detached(entries) => return Ok(entries.remove(key).is_some()),
            }
        };
        if !self.has(key) {
            return Ok(false);
        }
        trace!(key = %key, "yrs delete");
        self.write(&map, |txn, map| Ok(map.remove(txn, key).is_some()))
    }

    fn has(&self, key: &str) -> bool {
        let map = match &*self.slot.lock().unwrap() {
            Slot::Attached(map) => map.clone(),
            Slot::Detached(entries) => return entries.contains_key(key),
        };
        self.root
            .upgrade()
            .is_some_and(|root| root.read(|txn| map.contains_key(txn, key)))
    }

    fn keys(&self) -> Vec<String> {
        let map = match &*self.slot.lock().unwrap() {
            Slot::Attached(map) => map.clone(),
            Slot::Detached(entries) => return entries.keys().cloned().collect(),
        };
        let Some(root) = self.root.upgrade() else {
            return Vec::new();
        };
        root.read(|txn| map.keys(txn).map(str::to_string).collect())
    }

    fn entries(&self) -> Vec<(String, Value)> {
        let map = match &*self.slot.lock().unwrap() {
            Slot::Attached(map) => map.clone(),
            Slot::Detached(entries) => {
                return entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
            }
        };
        let Some(root) = self.root.upgrade() else {
            return Vec::new();
        };
        let raw: Vec<(String, Out)> =
            root.read(|txn| map.iter(txn).map(|(key, out)| (key.to_string(), out)).collect());
        raw.into_iter()
            .map(|(key, out)| {
                let value = self.out_to_value(&out);
                (key, value)
            })
            .collect()
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        if self.is_attached() {
            self.root()?.transact(f)
        } else {
            f()
        }
    }

    fn factory(&self) -> &dyn MapFactory {
        self
    }

    fn on(&self, kind: MapEventKind, handler: MapEventHandler) -> SubscriptionId {
        let id = self.handlers.subscribe(kind, handler);
        self.ensure_observer();
        id
    }

    fn off(&self, id: SubscriptionId) -> bool {
        self.handlers.unsubscribe(id)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn as_any(&self) -> &dyn StdAny {
        self
    }
}

/// Root of a Y-CRDT document.
///
/// ```
/// use collabmap::crdt::{CrdtMap, CrdtRoot, Value, YrsRoot};
///
/// let alice = YrsRoot::new();
/// let bob = YrsRoot::new();
/// alice.get_map("todo").set("title", Value::from("milk")).unwrap();
///
/// let update = alice.encode_update(None).unwrap();
/// bob.apply_update(&update).unwrap();
/// assert!(bob.get_map("todo").get("title").unwrap() == "milk");
/// ```
#[derive(Debug)]
pub struct YrsRoot {
    inner: Arc<DocInner>,
    factory: Arc<YrsMap>,
}

impl YrsRoot {
    /// Create an empty document with a random client id
    pub fn new() -> Self {
        Self::with_client_id(rand::random::<u32>() as u64)
    }

    /// Create an empty document with a fixed client id
    pub fn with_client_id(client_id: u64) -> Self {
        let inner = Arc::new(DocInner {
            doc: Doc::with_client_id(client_id),
            txn_lock: Mutex::new(()),
            named: Mutex::new(HashMap::new()),
            batch: Mutex::new(Batch::default()),
            touched: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
            update_handlers: Mutex::new(Vec::new()),
        });
        let factory = YrsMap::new(Arc::downgrade(&inner), Slot::Detached(BTreeMap::new()));
        Self { inner, factory }
    }

    /// Access the underlying `yrs` document
    pub fn doc(&self) -> &Doc {
        &self.inner.doc
    }

    fn dispatch_remote(&self) {
        let events = mem::take(&mut *self.inner.pending.lock().unwrap());
        for (map, event) in &events {
            if let Some(map) = map.upgrade() {
                map.handlers.emit(event);
            }
        }

        let observed: Vec<Arc<YrsMap>> = {
            let mut observed = self.inner.observed.lock().unwrap();
            observed.retain(|weak| weak.strong_count() > 0);
            observed.iter().filter_map(Weak::upgrade).collect()
        };
        for map in observed {
            map.handlers.emit(&MapEvent::RemoteAfterTransaction);
        }
    }
}

impl Default for YrsRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot for YrsRoot {
    fn get_map(&self, name: &str) -> MapHandle {
        let mut named = self.inner.named.lock().unwrap();
        let map = named.entry(name.to_string()).or_insert_with(|| {
            let map_ref = {
                let _lock = self.inner.txn_lock.lock().unwrap();
                self.inner.doc.get_or_insert_map(name)
            };
            YrsMap::new(Arc::downgrade(&self.inner), Slot::Attached(map_ref))
        });
        Arc::clone(map) as MapHandle
    }

    fn factory(&self) -> &dyn MapFactory {
        self.factory.as_ref()
    }

    fn transact(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.inner.transact(f)
    }

    fn client_id(&self) -> u64 {
        self.inner.doc.client_id()
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn state_vector(&self) -> Result<Vec<u8>> {
        Ok(self.inner.read(|txn| txn.state_vector().encode_v1()))
    }

    fn encode_update(&self, since: Option<&[u8]>) -> Result<Vec<u8>> {
        let since = match since {
            Some(bytes) => {
                StateVector::decode_v1(bytes).map_err(|e| CRDTError::DecodeFailed {
                    what: "state vector",
                    reason: e.to_string(),
                })?
            }
            None => StateVector::default(),
        };
        Ok(self.inner.read(|txn| txn.encode_state_as_update_v1(&since)))
    }

    fn apply_update(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| CRDTError::DecodeFailed {
            what: "update",
            reason: e.to_string(),
        })?;
        self.inner
            .read_write(REMOTE_ORIGIN, |txn| txn.apply_update(update))
            .map_err(|e| CRDTError::ApplyFailed {
                reason: e.to_string(),
            })?;
        debug!(client_id = self.client_id(), "applied remote update");
        self.dispatch_remote();
        Ok(())
    }

    fn on_update(&self, handler: UpdateHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner
            .update_handlers
            .lock()
            .unwrap()
            .push((id, handler));
        id
    }

    fn off_update(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.update_handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }
}
