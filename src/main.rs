mod config;
mod connection;
mod dispatcher;
mod engine;
mod error;
mod heartbeat;
mod identity;
mod keys;
mod message;
mod router;
mod server;
mod snapshot;
mod store;

use futures::future;
use message::ClientMessage;
use std::{env, sync::Arc};
use store::memory::MemoryStore;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Thin entry point, same shape as the teacher's own `main.rs`: read an
/// optional config path from argv, start logging, construct the store
/// and server (running the startup sweep), then hand control to
/// `Server::serve` alongside the heartbeat monitor.
///
/// Wire-framing is out of scope (section 1), so this demonstrates the
/// wiring over a single stdin/stdout connection carrying
/// newline-delimited `serde_json`-encoded messages -- not a bespoke
/// binary protocol, just the `serde_json` dependency already pulled in
/// for schema definitions and config loading. A real deployment swaps
/// this loop for a TCP/WebSocket listener that decodes frames into
/// `ClientMessage` and multiplexes every channel's traffic into the same
/// `(ChannelId, ClientMessage)` queue `Server::serve` consumes.
#[tokio::main]
async fn main() {
    flexi_logger::Logger::try_with_str("info")
        .expect("invalid log spec")
        .start()
        .expect("failed to start logger");

    let config = match env::args().nth(1) {
        Some(path) => config::Config::from_file(&path).await.unwrap_or_else(|err| {
            log::warn!("failed to load config from {}: {}; falling back to defaults", path, err);
            config::Config::default()
        }),
        None => config::Config::default(),
    };

    let store = Arc::new(MemoryStore::new());
    let server = Arc::new(server::Server::new(store, config.clone()).expect("startup sweep failed"));

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let channel_id = server.add_connection(outbound_tx).expect("add_connection never conflicts against a fresh server");

    let (incoming_tx, incoming_rx) = tokio::sync::mpsc::unbounded_channel();

    let stdout_writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{}", line),
                Err(err) => log::warn!("failed to encode outbound message: {}", err),
            }
        }
    });

    let stdin_reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<ClientMessage>(&line) {
                Ok(message) => {
                    if incoming_tx.send((channel_id, message)).is_err() {
                        break;
                    }
                }
                Err(err) => log::warn!("malformed client message: {}", err),
            }
        }
    });

    let heartbeat_server = server.clone();
    let heartbeat_interval = config.heartbeat_interval();
    let heartbeat_task = tokio::spawn(async move {
        heartbeat::run(heartbeat_server, heartbeat_interval).await;
    });

    let serve_task = tokio::spawn(async move {
        server.serve(incoming_rx).await;
    });

    let _ = future::join_all([stdout_writer, stdin_reader, heartbeat_task, serve_task]).await;
}
