//! # Server
//!
//! Ties every other module together behind one lock (section 5): the
//! transaction counter, the version table, the subscription router and
//! the connection registry. Connection lifecycle (section 4.3) and the
//! commit/subscribe entry points live here; the algorithms themselves
//! are in [`crate::engine`] and [`crate::snapshot`] so this module stays
//! about *wiring*, the way the teacher's own `server.rs` is wiring
//! around `Connections`/`Db` rather than command logic itself.
use crate::{
    connection::{registry::Registry, ChannelId},
    dispatcher::{self, Outcome},
    engine,
    error::Error,
    keys,
    keys::ValueHash,
    config::Config,
    message::ClientMessage,
    message::ServerMessage,
    router::Router,
    snapshot,
    store::KvStore,
};
use bytes::Bytes;
use log::{info, warn};
use parking_lot::Mutex;
use std::{collections::HashMap, collections::HashSet, sync::Arc};
use tokio::sync::mpsc;

/// The schema name the server itself uses for connection lifecycle
/// bookkeeping (section 3's "connection object").
pub const CONNECTION_SCHEMA: &str = "core";
/// The type name the server itself uses for connection lifecycle
/// bookkeeping.
pub const CONNECTION_TYPE: &str = "Connection";

/// Everything protected by the server's single global mutex: the
/// transaction counter, the version table, the fan-out router and the
/// connection registry (section 5).
#[derive(Debug, Default)]
pub(crate) struct Core {
    pub counter: u64,
    pub version_numbers: HashMap<Bytes, u64>,
    pub router: Router,
    pub registry: Registry,
}

/// The object database core: a pluggable [`KvStore`] plus everything in
/// [`Core`].
#[derive(Debug)]
pub struct Server {
    store: Arc<dyn KvStore>,
    config: Config,
    core: Mutex<Core>,
}

impl Server {
    /// Builds a new server over `store`, performing the startup sweep
    /// (section 3: "reclaims any connection identities left behind by a
    /// prior crash") before accepting any client. The sweep is applied
    /// directly to the store rather than routed through
    /// [`engine::commit`], since there is no transaction counter or
    /// version table yet for it to conflict against.
    pub fn new(store: Arc<dyn KvStore>, config: Config) -> Result<Self, Error> {
        let exists_index = keys::index_key(CONNECTION_SCHEMA, CONNECTION_TYPE, keys::EXISTS_FIELD, &ValueHash::Bool(true));
        let stale = store.get_set_members(&exists_index)?;

        if !stale.is_empty() {
            info!("reclaiming {} stale connection identities from a prior run", stale.len());
            let mut kvs = HashMap::new();
            for identity in &stale {
                kvs.insert(keys::data_key(CONNECTION_SCHEMA, CONNECTION_TYPE, identity, keys::EXISTS_FIELD), None);
            }
            let mut removes = HashMap::new();
            removes.insert(exists_index, stale);
            store.set_several(&kvs, &HashMap::new(), &removes)?;
        }

        Ok(Self {
            store,
            config,
            core: Mutex::new(Core::default()),
        })
    }

    /// The server's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a new channel: commits the synthetic "connection
    /// exists" transaction, then sends `Initialize` directly to the
    /// freshly registered channel (section 4.3).
    pub fn add_connection(&self, sender: mpsc::UnboundedSender<ServerMessage>) -> Result<ChannelId, Error> {
        let identity = crate::identity::generate();
        let exists_key = keys::data_key(CONNECTION_SCHEMA, CONNECTION_TYPE, &identity, keys::EXISTS_FIELD);
        let exists_index = keys::index_key(CONNECTION_SCHEMA, CONNECTION_TYPE, keys::EXISTS_FIELD, &ValueHash::Bool(true));

        let mut core = self.core.lock();
        let as_of_version = core.counter;

        let mut writes = HashMap::new();
        writes.insert(exists_key, Some(Bytes::from_static(b"true")));
        let mut adds = HashMap::new();
        adds.insert(exists_index, HashSet::from([identity.clone()]));

        let transaction_num = engine::commit(
            &mut core,
            self.store.as_ref(),
            &self.config,
            None,
            writes,
            adds,
            HashMap::new(),
            &[],
            &[],
            as_of_version,
        )?;

        let channel_id = core.registry.insert(identity.clone(), sender);
        if let Some(conn) = core.registry.get(channel_id) {
            let _ = conn.send(ServerMessage::Initialize {
                transaction_num,
                conn_identity: identity,
            });
        }

        Ok(channel_id)
    }

    /// Tears down a channel: scrubs it from the router, commits the
    /// synthetic "connection no longer exists" transaction, and removes
    /// it from the registry. Idempotent on an unknown channel (section
    /// 4.3: "warn and return").
    pub fn drop_connection(&self, channel_id: ChannelId) {
        let mut core = self.core.lock();
        let connection = match core.registry.get(channel_id) {
            Some(c) => c,
            None => {
                warn!("tried to drop a nonexistent channel {}", channel_id);
                return;
            }
        };
        let identity = connection.identity().to_owned();
        core.router.remove_channel(channel_id, connection);
        core.registry.remove(channel_id);

        let exists_key = keys::data_key(CONNECTION_SCHEMA, CONNECTION_TYPE, &identity, keys::EXISTS_FIELD);
        let exists_index = keys::index_key(CONNECTION_SCHEMA, CONNECTION_TYPE, keys::EXISTS_FIELD, &ValueHash::Bool(true));
        let as_of_version = core.counter;

        let mut writes = HashMap::new();
        writes.insert(exists_key, None);
        let mut removes = HashMap::new();
        removes.insert(exists_index, HashSet::from([identity.clone()]));

        match engine::commit(&mut core, self.store.as_ref(), &self.config, None, writes, HashMap::new(), removes, &[], &[], as_of_version) {
            Ok(_) => info!("dropped connection {}", identity),
            Err(err) => {
                // Synthetic transactions never conflict; any failure here
                // is a bug, not a client-triggerable condition (section 7).
                panic!("synthetic connection-removal transaction failed: {:?}", err);
            }
        }
    }

    /// Refreshes a channel's liveness timestamp.
    pub fn heartbeat(&self, channel_id: ChannelId) {
        let mut core = self.core.lock();
        if let Some(conn) = core.registry.get_mut(channel_id) {
            conn.touch_heartbeat();
        }
    }

    /// Answers a `Flush` request. Because this acquires the same lock
    /// every commit holds while broadcasting, it is guaranteed to run
    /// after every transaction that committed before it was handled
    /// (section 5: `FlushResponse` ordering guarantee).
    pub fn flush(&self, channel_id: ChannelId, guid: String) {
        let core = self.core.lock();
        if let Some(conn) = core.registry.get(channel_id) {
            let _ = conn.send(ServerMessage::FlushResponse { guid });
        }
    }

    /// Records a channel's schema definition.
    pub fn define_schema(&self, channel_id: ChannelId, name: String, definition: crate::message::SchemaDefinition) {
        let mut core = self.core.lock();
        if let Some(conn) = core.registry.get_mut(channel_id) {
            conn.schemas.insert(name, definition);
        }
    }

    /// Builds and delivers an initial subscription snapshot (section 4.4).
    pub fn subscribe(
        &self,
        channel_id: ChannelId,
        schema: String,
        typename: Option<String>,
        fieldname_and_value: Option<(String, ValueHash)>,
    ) -> Result<(), Error> {
        let mut core = self.core.lock();
        snapshot::build(&mut core, self.store.as_ref(), &self.config, channel_id, schema, typename, fieldname_and_value)
    }

    /// Commits a client-submitted transaction and reports the outcome.
    /// A conflict or store failure is reported as `success: false` and
    /// does not close the channel (section 7); an internal invariant
    /// violation aborts the process.
    pub fn new_transaction(
        &self,
        channel_id: ChannelId,
        transaction_guid: String,
        writes: HashMap<Bytes, Option<Bytes>>,
        set_adds: HashMap<Bytes, HashSet<String>>,
        set_removes: HashMap<Bytes, HashSet<String>>,
        key_versions: Vec<Bytes>,
        index_versions: Vec<Bytes>,
        as_of_version: u64,
    ) {
        let mut core = self.core.lock();
        let result = engine::commit(
            &mut core,
            self.store.as_ref(),
            &self.config,
            Some(channel_id),
            writes,
            set_adds,
            set_removes,
            &key_versions,
            &index_versions,
            as_of_version,
        );

        let success = match result {
            Ok(_) => true,
            Err(Error::Conflict) => false,
            Err(Error::Store(ref msg)) => {
                warn!("transaction {} failed: store error: {}", transaction_guid, msg);
                false
            }
            Err(Error::Invariant(msg)) => panic!("internal invariant violated during commit: {}", msg),
            Err(other) => {
                warn!("transaction {} failed: {:?}", transaction_guid, other);
                false
            }
        };

        if let Some(conn) = core.registry.get(channel_id) {
            let _ = conn.send(ServerMessage::TransactionResult { transaction_guid, success });
        }
    }

    /// Closes every channel that has gone silent for longer than
    /// `config().heartbeat_timeout()` (section 4.6).
    pub fn cull_dead_connections(&self) {
        let timeout = self.config.heartbeat_interval() * self.config.heartbeat_timeout_multiplier;
        let mut core = self.core.lock();
        let stale: Vec<ChannelId> = core
            .registry
            .iter()
            .filter(|(_, conn)| conn.is_stale(timeout))
            .map(|(id, conn)| {
                info!("connection {} has not heartbeat in a long time, killing it", conn.identity());
                *id
            })
            .collect();
        drop(core);

        for channel_id in stale {
            self.drop_connection(channel_id);
        }
    }

    /// Consumes already-decoded `(channel, message)` pairs from `incoming`
    /// until the stream ends, dispatching each one and closing any
    /// channel the dispatcher flags as having committed a protocol
    /// violation (section 7). Wire-framing and message (de)serialization
    /// happen upstream of this call -- a transport adapter decodes bytes
    /// into `ClientMessage`s and multiplexes every connected channel's
    /// traffic into a single `incoming` queue; this crate only cares
    /// about the decoded message and which channel it came from.
    pub async fn serve(self: Arc<Self>, mut incoming: mpsc::UnboundedReceiver<(ChannelId, ClientMessage)>) {
        while let Some((channel_id, message)) = incoming.recv().await {
            if dispatcher::dispatch(&self, channel_id, message) == Outcome::CloseChannel {
                self.drop_connection(channel_id);
            }
        }
    }
}
