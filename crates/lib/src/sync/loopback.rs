//! In-process transport relaying updates between roots of one process.
//!
//! A [`LoopbackHub`] holds rooms. Each room has a bounded tokio broadcast relay and an
//! unbounded inbox per member. Connecting to `loopback://<room>` joins the room: the
//! connector sends its state vector to every member's inbox so they answer with what
//! it is missing, publishes its full state on the relay, and from then on relays every
//! local update and presence change. A receiver that falls behind the relay drains
//! what is left and then asks every member once, through their inboxes, for a fresh
//! diff. Catch-up traffic never goes through the relay, so it cannot push anyone else
//! behind.
//!
//! Every half presence timeout a session re-announces its own presence and evicts
//! peers that have not been heard from for a whole timeout.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    Awareness, Connector, LocalAwareness, Progress, ProgressCallback, PresenceUpdate, SyncError,
};
use crate::{
    Clock, Result, SystemClock,
    constants::{DEFAULT_PRESENCE_TIMEOUT_MS, LOOPBACK_CHANNEL_CAPACITY, LOOPBACK_SCHEME},
    crdt::{CrdtRoot, SubscriptionId},
};

#[derive(Debug, Clone)]
enum Frame {
    /// Asks the receiver for everything missing from `state_vector`
    Hello { from: u64, state_vector: Vec<u8> },
    /// An encoded update
    Update { from: u64, update: Vec<u8> },
    Presence(PresenceUpdate),
}

/// One room: a bounded relay every member reads, plus an unbounded inbox per member
/// for catch-up traffic that must not be dropped.
struct Room {
    relay: broadcast::Sender<Frame>,
    inboxes: HashMap<u64, mpsc::UnboundedSender<Frame>>,
}

struct Membership {
    relay: broadcast::Sender<Frame>,
    receiver: broadcast::Receiver<Frame>,
    inbox: mpsc::UnboundedReceiver<Frame>,
}

/// Rooms shared by loopback connectors of one process.
///
/// Cloning the hub yields another handle to the same rooms.
#[derive(Clone)]
pub struct LoopbackHub {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
    capacity: usize,
}

impl fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackHub")
            .field("rooms", &self.rooms())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::with_capacity(LOOPBACK_CHANNEL_CAPACITY)
    }

    /// Creates a hub whose relays buffer at most `capacity` frames per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Names of the rooms created so far, sorted
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().unwrap().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Number of connectors currently in `room`
    pub fn members(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .map_or(0, |room| room.inboxes.len())
    }

    /// Joins `room` as `member`, replacing an earlier membership under the same id.
    fn join(&self, room: &str, member: u64) -> Membership {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.entry(room.to_string()).or_insert_with(|| Room {
            relay: broadcast::channel(self.capacity).0,
            inboxes: HashMap::new(),
        });
        let (inbox_sender, inbox) = mpsc::unbounded_channel();
        room.inboxes.insert(member, inbox_sender);
        Membership {
            relay: room.relay.clone(),
            receiver: room.relay.subscribe(),
            inbox,
        }
    }

    fn leave(&self, room: &str, member: u64) {
        if let Some(room) = self.rooms.lock().unwrap().get_mut(room) {
            room.inboxes.remove(&member);
        }
    }

    /// Delivers `frame` to the inbox of `member` only.
    fn send_to(&self, room: &str, member: u64, frame: Frame) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .and_then(|room| room.inboxes.get(&member))
            .is_some_and(|inbox| inbox.send(frame).is_ok())
    }

    /// Sends a hello from `from` to every other member. Returns how many were asked.
    fn request_sync(&self, room: &str, from: u64, state_vector: &[u8]) -> usize {
        let rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get(room) else {
            return 0;
        };
        room.inboxes
            .iter()
            .filter(|(member, _)| **member != from)
            .filter(|(_, inbox)| {
                inbox
                    .send(Frame::Hello {
                        from,
                        state_vector: state_vector.to_vec(),
                    })
                    .is_ok()
            })
            .count()
    }
}

/// A member's view of its room, used by the receive loop
struct Link {
    hub: LoopbackHub,
    room: String,
    me: u64,
    relay: broadcast::Sender<Frame>,
}

impl Link {
    fn reply(&self, to: u64, frame: Frame) {
        if !self.hub.send_to(&self.room, to, frame) {
            trace!(client_id = self.me, peer = to, "peer left before reply");
        }
    }

    fn request_sync(&self, root: &dyn CrdtRoot) {
        match root.state_vector() {
            Ok(state_vector) => {
                let asked = self.hub.request_sync(&self.room, self.me, &state_vector);
                debug!(client_id = self.me, room = %self.room, asked, "requested sync");
            }
            Err(err) => warn!(error = %err, "cannot encode state vector for sync"),
        }
    }
}

/// Extracts the room name from a `loopback://<room>` URL.
pub fn parse_room(url: &str) -> std::result::Result<String, SyncError> {
    let parsed = Url::parse(url).map_err(|e| SyncError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != LOOPBACK_SCHEME {
        return Err(SyncError::UnsupportedScheme {
            scheme: parsed.scheme().to_string(),
            connector: "loopback",
        });
    }
    let host = parsed.host_str().unwrap_or_default();
    let path = parsed.path().trim_matches('/');
    let room = match (host.is_empty(), path.is_empty()) {
        (false, true) => host.to_string(),
        (false, false) => format!("{host}/{path}"),
        (true, false) => path.to_string(),
        (true, true) => {
            return Err(SyncError::InvalidUrl {
                url: url.to_string(),
                reason: "missing room name".to_string(),
            });
        }
    };
    Ok(room)
}

struct Session {
    room: String,
    me: u64,
    root: Arc<dyn CrdtRoot>,
    update_subscription: SubscriptionId,
    task: JoinHandle<()>,
}

/// Connector relaying through a [`LoopbackHub`].
///
/// Requires a root supporting update exchange; the memory backend reports an error.
pub struct LoopbackConnector {
    hub: LoopbackHub,
    clock: Arc<dyn Clock>,
    presence_timeout_ms: u64,
    awareness: Option<Arc<LocalAwareness>>,
    session: Option<Session>,
}

impl fmt::Debug for LoopbackConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackConnector")
            .field("room", &self.session.as_ref().map(|s| s.room.as_str()))
            .field("awareness", &self.awareness)
            .finish()
    }
}

impl LoopbackConnector {
    pub fn new(hub: LoopbackHub) -> Self {
        Self::with_clock(hub, Arc::new(SystemClock))
    }

    /// Creates a connector whose presence entries are timestamped by `clock`.
    pub fn with_clock(hub: LoopbackHub, clock: Arc<dyn Clock>) -> Self {
        Self {
            hub,
            clock,
            presence_timeout_ms: DEFAULT_PRESENCE_TIMEOUT_MS,
            awareness: None,
            session: None,
        }
    }

    /// Sets how long a silent peer keeps its presence entry.
    pub fn with_presence_timeout(mut self, timeout_ms: u64) -> Self {
        self.presence_timeout_ms = timeout_ms.max(2);
        self
    }

    /// Room of the open session
    pub fn room(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.room.as_str())
    }

    fn open(
        &mut self,
        url: &str,
        root: Arc<dyn CrdtRoot>,
        presence: Option<Json>,
        progress: &ProgressCallback,
    ) -> Result<Session> {
        let room = parse_room(url)?;
        let me = root.client_id();
        let state_vector = root.state_vector()?;
        let snapshot = root.encode_update(None)?;

        progress(Progress::InProgress {
            message: format!("joining room '{room}'"),
        });
        let Membership {
            relay,
            receiver,
            inbox,
        } = self.hub.join(&room, me);
        self.hub.request_sync(&room, me, &state_vector);
        if let Err(err) = relay.send(Frame::Update {
            from: me,
            update: snapshot,
        }) {
            self.hub.leave(&room, me);
            return Err(SyncError::Transport {
                reason: err.to_string(),
            }
            .into());
        }

        let awareness = Arc::new(LocalAwareness::with_clock(me, self.clock.clone()));
        let presence_relay = relay.clone();
        awareness.set_broadcaster(Some(Arc::new(move |update: &PresenceUpdate| {
            let _ = presence_relay.send(Frame::Presence(update.clone()));
        })));

        let update_relay = relay.clone();
        let update_subscription = root.on_update(Arc::new(move |update: &[u8]| {
            trace!(client_id = me, bytes = update.len(), "relaying local update");
            let _ = update_relay.send(Frame::Update {
                from: me,
                update: update.to_vec(),
            });
        }));

        let link = Link {
            hub: self.hub.clone(),
            room: room.clone(),
            me,
            relay,
        };
        let task = tokio::spawn(receive_loop(
            receiver,
            inbox,
            link,
            root.clone(),
            awareness.clone(),
            self.presence_timeout_ms,
        ));
        awareness.set_local_state(presence);
        self.awareness = Some(awareness);

        Ok(Session {
            room,
            me,
            root,
            update_subscription,
            task,
        })
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn connect(
        &mut self,
        url: &str,
        root: Arc<dyn CrdtRoot>,
        presence: Option<Json>,
        progress: ProgressCallback,
    ) {
        if self.session.is_some() {
            progress(Progress::failed(SyncError::AlreadyConnected {
                connector: self.name(),
            }));
            return;
        }
        progress(Progress::Pending);
        match self.open(url, root, presence, &progress) {
            Ok(session) => {
                debug!(room = %session.room, "loopback session opened");
                self.session = Some(session);
                progress(Progress::Complete);
            }
            Err(err) => {
                warn!(url = %url, error = %err, "loopback connect failed");
                progress(Progress::failed(err));
            }
        }
    }

    async fn disconnect(&mut self, progress: ProgressCallback) {
        let Some(session) = self.session.take() else {
            progress(Progress::failed(SyncError::NotConnected {
                connector: self.name(),
            }));
            return;
        };
        progress(Progress::InProgress {
            message: format!("leaving room '{}'", session.room),
        });

        session.root.off_update(session.update_subscription);
        self.hub.leave(&session.room, session.me);
        session.task.abort();
        // Cancellation is the expected outcome
        let _ = session.task.await;

        if let Some(awareness) = &self.awareness {
            awareness.set_local_state(None);
            awareness.set_broadcaster(None);
            awareness.clear_remote();
        }
        debug!(room = %session.room, "loopback session closed");
        progress(Progress::Complete);
    }

    fn awareness(&self) -> Option<Arc<dyn Awareness>> {
        self.awareness
            .clone()
            .map(|awareness| awareness as Arc<dyn Awareness>)
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for LoopbackConnector {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.root.off_update(session.update_subscription);
            self.hub.leave(&session.room, session.me);
            session.task.abort();
        }
    }
}

async fn receive_loop(
    mut receiver: broadcast::Receiver<Frame>,
    mut inbox: mpsc::UnboundedReceiver<Frame>,
    link: Link,
    root: Arc<dyn CrdtRoot>,
    awareness: Arc<LocalAwareness>,
    presence_timeout_ms: u64,
) {
    let me = link.me;
    let period = Duration::from_millis(presence_timeout_ms / 2);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resync = false;

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(frame) => handle_frame(frame, &link, root.as_ref(), &awareness),
                Err(RecvError::Lagged(skipped)) => {
                    if !resync {
                        warn!(client_id = me, skipped, "loopback receiver lagged, will resync");
                    }
                    resync = true;
                }
                Err(RecvError::Closed) => break,
            },
            Some(frame) = inbox.recv() => handle_frame(frame, &link, root.as_ref(), &awareness),
            _ = heartbeat.tick() => {
                let evicted = awareness.remove_stale(presence_timeout_ms);
                if !evicted.is_empty() {
                    debug!(client_id = me, ?evicted, "evicted stale presence");
                }
                if let Some(presence) = awareness.local_update() {
                    let _ = link.relay.send(Frame::Presence(presence));
                }
            }
        }

        // One request once the backlog is drained, however often the relay overran
        if resync && receiver.is_empty() {
            resync = false;
            link.request_sync(root.as_ref());
        }
    }
}

fn handle_frame(frame: Frame, link: &Link, root: &dyn CrdtRoot, awareness: &LocalAwareness) {
    let me = link.me;
    match frame {
        Frame::Hello { from, .. } | Frame::Update { from, .. } if from == me => {}
        Frame::Hello {
            from,
            state_vector,
        } => {
            trace!(client_id = me, peer = from, "answering hello");
            match root.encode_update(Some(&state_vector)) {
                Ok(update) => link.reply(from, Frame::Update { from: me, update }),
                Err(err) => warn!(peer = from, error = %err, "cannot encode diff for peer"),
            }
            if let Some(presence) = awareness.local_update() {
                link.reply(from, Frame::Presence(presence));
            }
        }
        Frame::Update { from, update } => {
            if let Err(err) = root.apply_update(&update) {
                warn!(peer = from, error = %err, "dropping undecodable update");
            }
        }
        Frame::Presence(update) => {
            awareness.apply_remote(update);
        }
    }
}
