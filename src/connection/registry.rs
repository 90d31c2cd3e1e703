//! # Connection registry (section 4.3)
//!
//! The table of every currently connected channel, plus the monotonic
//! counter used to allocate fresh [`ChannelId`]s. Mirrors the teacher's
//! `connection::connections::Connections`, minus the `Arc`/`RwLock`
//! wrapping: this registry lives inside the server's single global lock
//! (section 5), not behind its own.
use super::{ChannelId, Connection};
use crate::message::ServerMessage;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// All currently connected channels.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ChannelId, Connection>,
    next_id: ChannelId,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh channel id and registers a new [`Connection`]
    /// for it, wired to `sender` for outbound delivery.
    pub fn insert(&mut self, identity: String, sender: mpsc::UnboundedSender<ServerMessage>) -> ChannelId {
        self.next_id += 1;
        let id = self.next_id;
        self.connections.insert(id, Connection::new(id, identity, sender));
        id
    }

    /// Looks up a channel's state.
    pub fn get(&self, id: ChannelId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Looks up a channel's state mutably.
    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Removes a channel, returning its final state so the caller can
    /// scrub the router's fan-out maps from it.
    pub fn remove(&mut self, id: ChannelId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Iterates over every connected channel.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelId, &Connection)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_allocates_increasing_ids_and_is_retrievable() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.insert("id-a".to_owned(), tx.clone());
        let b = registry.insert("id-b".to_owned(), tx);
        assert!(b > a);
        assert_eq!(registry.get(a).unwrap().identity(), "id-a");
        assert_eq!(registry.get(b).unwrap().identity(), "id-b");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.insert("id-a".to_owned(), tx);
        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
    }
}
