//! # Heartbeat / Liveness Monitor (section 4.6)
//!
//! A periodic task, running outside the server's global lock except for
//! the brief moments it reacquires it per stale channel, that culls any
//! channel silent for more than `heartbeat_timeout_multiplier x
//! heartbeat_interval`. Grounded in the teacher's own purge loop
//! (`server.rs::serve`'s `db_for_purging.purge()` interval task) --
//! same shape, `tokio::time::sleep` in a loop, just walking connections
//! instead of expiring keys.
use crate::server::Server;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Runs forever, waking up every `interval` to cull channels that have
/// gone silent for too long (section 4.6). Intended to be spawned as its
/// own task alongside the channel listener(s).
pub async fn run(server: Arc<Server>, interval: Duration) {
    loop {
        sleep(interval).await;
        server.cull_dead_connections();
    }
}
