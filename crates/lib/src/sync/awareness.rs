//! Presence (awareness) bookkeeping for connected participants.
//!
//! Every participant owns one local presence state, an arbitrary JSON value such as a
//! cursor position or a user name. Each change of it bumps a per-participant clock so
//! receivers can discard out-of-order updates. Remote entries remember when they were
//! last refreshed and can be evicted once they go stale.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::{
    Clock, SystemClock,
    crdt::SubscriptionId,
};

/// Presence known about one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    /// The participant's published state
    pub state: Json,
    /// Participant-local counter of the update that produced `state`
    pub clock: u64,
    /// When this entry was last refreshed, in milliseconds since Unix epoch
    pub last_updated: u64,
}

/// One presence announcement as it travels between participants.
///
/// A `state` of `None` announces that the participant left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub client_id: u64,
    pub clock: u64,
    pub state: Option<Json>,
}

/// Participants whose presence changed in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Callback invoked after presence changed
pub type PresenceHandler = Arc<dyn Fn(&PresenceChange) + Send + Sync>;

/// Callback publishing local presence announcements to peers
pub type PresenceBroadcaster = Arc<dyn Fn(&PresenceUpdate) + Send + Sync>;

/// Presence channel exposed by a connector.
pub trait Awareness: Send + Sync + fmt::Debug {
    /// Identifier of the local participant
    fn client_id(&self) -> u64;

    /// The local participant's current state
    fn local_state(&self) -> Option<Json>;

    /// Publishes a new local state. `None` withdraws it.
    fn set_local_state(&self, state: Option<Json>);

    /// States of every known participant, including the local one
    fn states(&self) -> BTreeMap<u64, Json>;

    /// Registers a handler called after presence changed
    fn on_change(&self, handler: PresenceHandler) -> SubscriptionId;

    /// Removes a handler registered with [`on_change`](Awareness::on_change)
    fn off_change(&self, id: SubscriptionId) -> bool;
}

#[derive(Default)]
struct PresenceTable {
    entries: BTreeMap<u64, PresenceEntry>,
    local_clock: u64,
}

/// Awareness held in process.
///
/// Without a broadcaster it only tracks the local participant, which is what a
/// connector without a network needs. A connector that relays presence installs a
/// broadcaster and feeds peer announcements into [`apply_remote`](LocalAwareness::apply_remote).
pub struct LocalAwareness {
    client_id: u64,
    clock: Arc<dyn Clock>,
    table: Mutex<PresenceTable>,
    broadcaster: Mutex<Option<PresenceBroadcaster>>,
    handlers: Mutex<Vec<(SubscriptionId, PresenceHandler)>>,
}

impl fmt::Debug for LocalAwareness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAwareness")
            .field("client_id", &self.client_id)
            .field("participants", &self.table.lock().unwrap().entries.len())
            .finish()
    }
}

impl LocalAwareness {
    /// Creates an awareness for `client_id` using the system clock.
    pub fn new(client_id: u64) -> Self {
        Self::with_clock(client_id, Arc::new(SystemClock))
    }

    /// Creates an awareness reading time from `clock`.
    pub fn with_clock(client_id: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            client_id,
            clock,
            table: Mutex::new(PresenceTable::default()),
            broadcaster: Mutex::new(None),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Installs or removes the broadcaster receiving local announcements
    pub fn set_broadcaster(&self, broadcaster: Option<PresenceBroadcaster>) {
        *self.broadcaster.lock().unwrap() = broadcaster;
    }

    /// Returns the entry recorded for `client_id`
    pub fn entry(&self, client_id: u64) -> Option<PresenceEntry> {
        self.table.lock().unwrap().entries.get(&client_id).cloned()
    }

    /// The announcement describing the current local state, if one is set.
    ///
    /// Used to re-announce presence to participants that joined later.
    pub fn local_update(&self) -> Option<PresenceUpdate> {
        let table = self.table.lock().unwrap();
        table.entries.get(&self.client_id).map(|entry| PresenceUpdate {
            client_id: self.client_id,
            clock: table.local_clock,
            state: Some(entry.state.clone()),
        })
    }

    /// Merges an announcement received from a peer.
    ///
    /// Announcements about the local participant and announcements older than the
    /// recorded one are ignored. Returns whether the table changed.
    pub fn apply_remote(&self, update: PresenceUpdate) -> bool {
        if update.client_id == self.client_id {
            return false;
        }
        let change = {
            let mut table = self.table.lock().unwrap();
            let now = self.clock.now_millis();
            let existing = table.entries.get(&update.client_id);
            if existing.is_some_and(|entry| update.clock < entry.clock) {
                trace!(client_id = update.client_id, clock = update.clock, "ignoring outdated presence");
                return false;
            }
            let mut change = PresenceChange::default();
            match update.state {
                Some(state) => {
                    let previous = table.entries.insert(
                        update.client_id,
                        PresenceEntry {
                            state: state.clone(),
                            clock: update.clock,
                            last_updated: now,
                        },
                    );
                    match previous {
                        None => change.added.push(update.client_id),
                        Some(previous) if previous.state != state => {
                            change.updated.push(update.client_id)
                        }
                        // refresh only
                        Some(_) => {}
                    }
                }
                None => {
                    if table.entries.remove(&update.client_id).is_some() {
                        change.removed.push(update.client_id);
                    }
                }
            }
            change
        };
        if change.is_empty() {
            return false;
        }
        self.notify(&change);
        true
    }

    /// Drops every remote participant not refreshed within `timeout_ms`.
    ///
    /// The local participant is never evicted. Returns the removed client ids.
    pub fn remove_stale(&self, timeout_ms: u64) -> Vec<u64> {
        let removed: Vec<u64> = {
            let mut table = self.table.lock().unwrap();
            let stale: Vec<u64> = table
                .entries
                .iter()
                .filter(|(id, entry)| {
                    **id != self.client_id && self.clock.elapsed_since(entry.last_updated) >= timeout_ms
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &stale {
                table.entries.remove(id);
            }
            stale
        };
        if !removed.is_empty() {
            debug!(count = removed.len(), "evicted stale presence");
            self.notify(&PresenceChange {
                removed: removed.clone(),
                ..Default::default()
            });
        }
        removed
    }

    /// Forgets every remote participant, keeping the local state.
    pub fn clear_remote(&self) {
        let removed: Vec<u64> = {
            let mut table = self.table.lock().unwrap();
            let remote: Vec<u64> = table
                .entries
                .keys()
                .copied()
                .filter(|id| *id != self.client_id)
                .collect();
            for id in &remote {
                table.entries.remove(id);
            }
            remote
        };
        if !removed.is_empty() {
            self.notify(&PresenceChange {
                removed,
                ..Default::default()
            });
        }
    }

    fn notify(&self, change: &PresenceChange) {
        let handlers: Vec<PresenceHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(change);
        }
    }
}

impl Awareness for LocalAwareness {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn local_state(&self) -> Option<Json> {
        self.table
            .lock()
            .unwrap()
            .entries
            .get(&self.client_id)
            .map(|entry| entry.state.clone())
    }

    fn set_local_state(&self, state: Option<Json>) {
        let (update, change) = {
            let mut table = self.table.lock().unwrap();
            table.local_clock += 1;
            let clock = table.local_clock;
            let mut change = PresenceChange::default();
            match &state {
                Some(state) => {
                    let previous = table.entries.insert(
                        self.client_id,
                        PresenceEntry {
                            state: state.clone(),
                            clock,
                            last_updated: self.clock.now_millis(),
                        },
                    );
                    match previous {
                        None => change.added.push(self.client_id),
                        Some(_) => change.updated.push(self.client_id),
                    }
                }
                None => {
                    if table.entries.remove(&self.client_id).is_some() {
                        change.removed.push(self.client_id);
                    }
                }
            }
            (
                PresenceUpdate {
                    client_id: self.client_id,
                    clock,
                    state,
                },
                change,
            )
        };

        let broadcaster = self.broadcaster.lock().unwrap().clone();
        if let Some(broadcaster) = broadcaster {
            broadcaster(&update);
        }
        if !change.is_empty() {
            self.notify(&change);
        }
    }

    fn states(&self) -> BTreeMap<u64, Json> {
        self.table
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.state.clone()))
            .collect()
    }

    fn on_change(&self, handler: PresenceHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.lock().unwrap().push((id, handler));
        id
    }

    fn off_change(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }
}
