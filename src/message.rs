//! # External interfaces (section 6)
//!
//! The two tagged unions that cross the wire, plus the schema
//! definition shape `DefineSchema` carries. Wire-framing and
//! serialization of these are out of scope (section 1) -- a caller
//! decodes bytes into a [`ClientMessage`] before this crate ever sees
//! it -- but `Serialize`/`Deserialize` are still derived here, mirroring
//! the teacher's own `Config` derives, so that an embedding transport
//! can use `serde_json` (or any other `serde` format) for that decoding
//! without this crate needing to know which one.
use crate::keys::ValueHash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single client-declared type: its plain scalar fields and the
/// subset of those fields that support index lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Plain scalar field names.
    pub fields: Vec<String>,
    /// Field names over which index lookup is supported. Must be a
    /// subset of `fields` in practice, though this crate does not
    /// enforce that -- a channel may declare an index over a field it
    /// never mentions in `fields` and the engine will still maintain it.
    pub indices: Vec<String>,
}

/// A schema: the set of type definitions a channel declared via
/// `DefineSchema`, keyed by type name.
pub type SchemaDefinition = HashMap<String, TypeDefinition>;

/// Messages a connected channel sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Refreshes the channel's liveness timestamp.
    Heartbeat,
    /// Requests a `FlushResponse` once every transaction committed
    /// before this message was handled has been delivered.
    Flush {
        /// Opaque token echoed back in the response.
        guid: String,
    },
    /// Declares (or replaces) a schema's type definitions for this
    /// channel. Schema definitions are per-channel (section 3).
    DefineSchema {
        /// The schema's name.
        name: String,
        /// Type name -> type definition.
        definition: SchemaDefinition,
    },
    /// Subscribes to a schema, a whole type, or a single index slice
    /// (section 4.4).
    Subscribe {
        /// The schema to subscribe within.
        schema: String,
        /// The type to subscribe to; `None` means "every type in the
        /// schema".
        typename: Option<String>,
        /// An index-slice selector; `None` means "the whole extension
        /// of the type" (or of every type, if `typename` is also
        /// `None`).
        fieldname_and_value: Option<(String, ValueHash)>,
    },
    /// Submits a transaction for commit (section 4.5).
    NewTransaction {
        /// Opaque token echoed back in the `TransactionResult`.
        transaction_guid: String,
        /// Data cell writes; `None` deletes the cell.
        writes: HashMap<Bytes, Option<Bytes>>,
        /// Index key -> identities to add.
        set_adds: HashMap<Bytes, HashSet<String>>,
        /// Index key -> identities to remove.
        set_removes: HashMap<Bytes, HashSet<String>>,
        /// Data keys whose version must not exceed `as_of_version`.
        key_versions: Vec<Bytes>,
        /// Index keys whose version must not exceed `as_of_version`.
        index_versions: Vec<Bytes>,
        /// The transaction id this writer last observed.
        as_of_version: u64,
    },
}

/// Messages the server sends to a connected channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once, immediately after a channel connects.
    Initialize {
        /// The transaction id the connection's own "exists" snapshot is
        /// consistent as of.
        transaction_num: u64,
        /// The newly minted connection identity.
        conn_identity: String,
    },
    /// Reports whether a submitted transaction committed.
    TransactionResult {
        /// Echoes `NewTransaction::transaction_guid`.
        transaction_guid: String,
        /// `true` if the transaction committed.
        success: bool,
    },
    /// Answers a `Flush` request.
    FlushResponse {
        /// Echoes `Flush::guid`.
        guid: String,
    },
    /// The initial snapshot delivered in response to `Subscribe`.
    Subscription {
        /// Echoes `Subscribe::schema`.
        schema: String,
        /// Echoes `Subscribe::typename`.
        typename: Option<String>,
        /// Echoes `Subscribe::fieldname_and_value`.
        fieldname_and_value: Option<(String, ValueHash)>,
        /// Data cells matching the subscription, as of `tid`.
        values: HashMap<Bytes, Option<Bytes>>,
        /// Index sets matching the subscription, as of `tid`.
        sets: HashMap<Bytes, HashSet<String>>,
        /// The transaction id this snapshot is consistent as of.
        tid: u64,
        /// The initial identity set, present only for slice subscriptions.
        identities: Option<HashSet<String>>,
    },
    /// A server-initiated expansion of a channel's tracked identity set,
    /// always immediately followed by the `Transaction` that caused it.
    SubscriptionIncrease {
        /// The schema the newly qualifying identities belong to.
        schema: String,
        /// The type the newly qualifying identities belong to.
        typename: String,
        /// The index slice (or, for the writer's own implicit
        /// expansion, the `" exists"` field) that newly qualified them.
        fieldname_and_value: (String, ValueHash),
        /// The newly qualifying identities.
        identities: Vec<String>,
    },
    /// A committed transaction's effects, delivered to every channel
    /// whose subscription it intersects.
    Transaction {
        /// Data cell writes; `None` means the cell was deleted.
        writes: HashMap<Bytes, Option<Bytes>>,
        /// Index key -> identities added.
        set_adds: HashMap<Bytes, HashSet<String>>,
        /// Index key -> identities removed.
        set_removes: HashMap<Bytes, HashSet<String>>,
        /// The transaction id assigned by the commit.
        transaction_id: u64,
    },
}
