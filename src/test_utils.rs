//! # In-process test harness
//!
//! Mirrors the teacher's own `cmd::test::{create_connection, run_command}`
//! helpers: a minimal wired-up [`Server`] plus a way to register a
//! channel and read back what it was sent, without any real transport.
//! Used by this crate's own unit tests and by `tests/scenarios.rs`. Not
//! `cfg(test)`-gated because integration tests under `tests/` compile
//! against the library as an ordinary dependency and would not see a
//! test-only module; the teacher instead nests its equivalent helpers
//! inside a `#[cfg(test)] mod test` local to each module, which only
//! integration tests outside the crate cannot reach.
use crate::{config::Config, connection::ChannelId, message::ServerMessage, server::Server, store::memory::MemoryStore};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Builds a fresh [`Server`] over an empty [`MemoryStore`] with default
/// [`Config`], registers one channel, and returns it plus a receiver for
/// everything sent to it (starting with the `Initialize` message every
/// connection gets immediately, section 4.3).
pub fn test_server() -> (Server, ChannelId, UnboundedReceiver<ServerMessage>) {
    let store = Arc::new(MemoryStore::new());
    let server = Server::new(store, Config::default()).expect("startup sweep never fails on an empty store");
    let (tx, rx) = mpsc::unbounded_channel();
    let channel_id = server.add_connection(tx).expect("add_connection never conflicts");
    (server, channel_id, rx)
}

/// Registers an additional channel on an already-running server.
pub fn add_channel(server: &Server) -> (ChannelId, UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel_id = server.add_connection(tx).expect("add_connection never conflicts");
    (channel_id, rx)
}

/// Drains every message currently queued for a channel without blocking.
pub fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}
