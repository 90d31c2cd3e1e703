//! # Connection state (section 4.3)
//!
//! Per-channel state: its identity, its last heartbeat, the schemas it
//! has declared, and the three subscription sets that are the mirror
//! image of the router's fan-out maps (section 3 invariant: "each
//! channel's `subscribedIds`, `subscribedIndexKeys`, `subscribedTypes`
//! are exactly the reverse of the fan-out maps"). Unlike the teacher's
//! `Connection`, which wraps its mutable fields in per-field
//! `RwLock`/`parking_lot::RwLock` because many connections mutate
//! concurrently, every field here is accessed only while the server's
//! single global lock (section 5) is held, so no interior mutability is
//! needed.
use crate::{error::Error, message::ServerMessage, message::SchemaDefinition};
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

pub mod registry;

/// Identifies a connected channel for the lifetime of the connection.
/// Distinct from the channel's [`Connection::identity`]: this is a
/// server-local handle used by the fan-out maps, the identity is the
/// opaque, client-visible object identity minted for the connection.
pub type ChannelId = u128;

/// Per-channel state tracked by the [`registry::Registry`].
#[derive(Debug)]
pub struct Connection {
    id: ChannelId,
    identity: String,
    sender: mpsc::UnboundedSender<ServerMessage>,
    last_heartbeat: Instant,
    /// Schema name -> the type definitions this channel declared for it.
    pub schemas: HashMap<String, SchemaDefinition>,
    /// `(schema, type)` pairs this channel is whole-type subscribed to.
    pub subscribed_types: HashSet<(String, String)>,
    /// Identities this channel tracks individually, whether from an
    /// index-slice subscription, an implicit write-time expansion, or
    /// an index subscription's broadened set.
    pub subscribed_ids: HashSet<String>,
    /// Full index keys this channel is subscribed to.
    pub subscribed_index_keys: HashSet<Bytes>,
}

impl Connection {
    pub(crate) fn new(id: ChannelId, identity: String, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            identity,
            sender,
            last_heartbeat: Instant::now(),
            schemas: HashMap::new(),
            subscribed_types: HashSet::new(),
            subscribed_ids: HashSet::new(),
            subscribed_index_keys: HashSet::new(),
        }
    }

    /// The server-local channel handle.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The opaque, client-visible connection object identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Refreshes the liveness timestamp; called when a `Heartbeat`
    /// message arrives.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    /// `true` once this channel has gone silent for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() > timeout
    }

    /// Enqueues a message for delivery to this channel. Sending while
    /// the global lock is held is what gives channels their per-channel
    /// ordering guarantee (section 5). A failure here means the channel
    /// is dead; it is non-fatal and the connection is reaped on the next
    /// heartbeat pass (section 7).
    pub fn send(&self, message: ServerMessage) -> Result<(), Error> {
        self.sender.send(message).map_err(|_| Error::ChannelClosed)
    }
}
