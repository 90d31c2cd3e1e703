//! Integration tests for the six scenarios enumerated in the
//! specification's "Testable properties" section.
use objectdb::{
    config::Config,
    keys::{self, ValueHash},
    message::{ServerMessage, TypeDefinition},
    server::{Server, CONNECTION_SCHEMA, CONNECTION_TYPE},
    store::{memory::MemoryStore, KvStore},
    test_utils::{add_channel, drain, test_server},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

fn type_def(fields: &[&str], indices: &[&str]) -> TypeDefinition {
    TypeDefinition {
        fields: fields.iter().map(|s| s.to_string()).collect(),
        indices: indices.iter().map(|s| s.to_string()).collect(),
    }
}

/// Scenario 1: connect and initialize.
#[test]
fn connect_and_initialize() {
    let store = Arc::new(MemoryStore::new());
    let server = Server::new(store.clone(), Config::default()).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let channel_id = server.add_connection(tx).unwrap();

    let messages = drain(&mut rx);
    let identity = match &messages[..] {
        [ServerMessage::Initialize { transaction_num, conn_identity }] => {
            assert_eq!(*transaction_num, 1);
            conn_identity.clone()
        }
        other => panic!("expected a single Initialize, got {:?}", other),
    };

    let exists_index = keys::index_key(CONNECTION_SCHEMA, CONNECTION_TYPE, keys::EXISTS_FIELD, &ValueHash::Bool(true));
    let members = store.get_set_members(&exists_index).unwrap();
    assert!(members.contains(&identity));

    // Channel id allocation succeeded and is usable for follow-up calls.
    server.heartbeat(channel_id);
}

/// Scenario 2: simple write-broadcast. Two whole-type subscribers both
/// see one `Transaction` at id 1, and the writer also gets its own
/// `TransactionResult`.
#[test]
fn simple_write_broadcast() {
    let (server, a, mut a_rx) = test_server();
    drain(&mut a_rx);
    let (b, mut b_rx) = add_channel(&server);
    drain(&mut b_rx);

    let mut schema = HashMap::new();
    schema.insert("T".to_owned(), type_def(&["name"], &[]));
    server.define_schema(a, "S".to_owned(), schema.clone());
    server.define_schema(b, "S".to_owned(), schema);

    server.subscribe(a, "S".to_owned(), Some("T".to_owned()), None).unwrap();
    server.subscribe(b, "S".to_owned(), Some("T".to_owned()), None).unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    let mut writes = HashMap::new();
    writes.insert(keys::data_key("S", "T", "id1", "name"), Some(bytes::Bytes::from_static(b"alice")));
    let mut adds = HashMap::new();
    adds.insert(
        keys::index_key("S", "T", keys::EXISTS_FIELD, &ValueHash::Bool(true)),
        HashSet::from(["id1".to_owned()]),
    );

    server.new_transaction(a, "txn-1".to_owned(), writes, adds, HashMap::new(), vec![], vec![], 0);

    let a_messages = drain(&mut a_rx);
    assert!(a_messages.iter().any(|m| matches!(m, ServerMessage::TransactionResult { success: true, .. })));
    assert_eq!(
        a_messages.iter().filter(|m| matches!(m, ServerMessage::Transaction { transaction_id: 1, .. })).count(),
        1
    );

    let b_messages = drain(&mut b_rx);
    assert_eq!(
        b_messages.iter().filter(|m| matches!(m, ServerMessage::Transaction { transaction_id: 1, .. })).count(),
        1
    );
}

/// Scenario 3: conflict. A second writer whose precondition key was
/// mutated after the version it read from gets `success: false` and no
/// broadcast is sent on its behalf.
#[test]
fn conflicting_transaction_is_rejected() {
    let (server, a, mut a_rx) = test_server();
    drain(&mut a_rx);
    let (b, mut b_rx) = add_channel(&server);
    drain(&mut b_rx);

    let key = keys::data_key("S", "T", "id1", "name");
    let mut writes = HashMap::new();
    writes.insert(key.clone(), Some(bytes::Bytes::from_static(b"alice")));
    server.new_transaction(a, "txn-a".to_owned(), writes, HashMap::new(), HashMap::new(), vec![], vec![], 0);
    drain(&mut a_rx);

    let mut writes2 = HashMap::new();
    writes2.insert(key.clone(), Some(bytes::Bytes::from_static(b"bob")));
    server.new_transaction(b, "txn-b".to_owned(), writes2, HashMap::new(), HashMap::new(), vec![key], vec![], 0);

    let b_messages = drain(&mut b_rx);
    assert!(b_messages.iter().any(|m| matches!(m, ServerMessage::TransactionResult { success: false, .. })));
    assert!(!b_messages.iter().any(|m| matches!(m, ServerMessage::Transaction { .. })));
}

/// Scenario 4: index-slice expansion. A channel subscribed to a specific
/// index slice gets a `SubscriptionIncrease` followed by a `Transaction`
/// carrying every declared field when a writer adds a matching object.
#[test]
fn index_slice_expansion_delivers_subscription_increase_then_full_snapshot() {
    let (server, writer, mut writer_rx) = test_server();
    drain(&mut writer_rx);
    let (c, mut c_rx) = add_channel(&server);
    drain(&mut c_rx);

    let mut schema = HashMap::new();
    schema.insert("T".to_owned(), type_def(&["name", "color"], &["color"]));
    server.define_schema(c, "S".to_owned(), schema);

    server
        .subscribe(c, "S".to_owned(), Some("T".to_owned()), Some(("color".to_owned(), ValueHash::Str("red".into()))))
        .unwrap();
    let initial = drain(&mut c_rx);
    match &initial[..] {
        [ServerMessage::Subscription { values, sets, .. }] => {
            assert!(values.is_empty());
            assert!(sets.is_empty());
        }
        other => panic!("expected one empty Subscription snapshot, got {:?}", other),
    }

    let mut writes = HashMap::new();
    writes.insert(keys::data_key("S", "T", "id2", "name"), Some(bytes::Bytes::from_static(b"bob")));
    writes.insert(keys::data_key("S", "T", "id2", "color"), Some(bytes::Bytes::from_static(b"red")));
    let mut adds = HashMap::new();
    adds.insert(
        keys::index_key("S", "T", "color", &ValueHash::Str("red".into())),
        HashSet::from(["id2".to_owned()]),
    );
    adds.insert(
        keys::index_key("S", "T", keys::EXISTS_FIELD, &ValueHash::Bool(true)),
        HashSet::from(["id2".to_owned()]),
    );
    server.new_transaction(writer, "txn".to_owned(), writes, adds, HashMap::new(), vec![], vec![], 0);

    let messages = drain(&mut c_rx);
    let increase_pos = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::SubscriptionIncrease { identities, .. } if identities == &vec!["id2".to_owned()]))
        .expect("expected a SubscriptionIncrease for id2");
    let transaction_pos = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::Transaction { .. }))
        .expect("expected a Transaction to follow");
    assert!(increase_pos < transaction_pos, "SubscriptionIncrease must precede the Transaction it caused");

    match &messages[transaction_pos] {
        ServerMessage::Transaction { writes, .. } => {
            assert_eq!(writes.get(&keys::data_key("S", "T", "id2", "name")), Some(&Some(bytes::Bytes::from_static(b"bob"))));
            assert_eq!(writes.get(&keys::data_key("S", "T", "id2", "color")), Some(&Some(bytes::Bytes::from_static(b"red"))));
        }
        _ => unreachable!(),
    }
}

/// Scenario 5: implicit self-subscription. A writer not subscribed to
/// (S, T) still observes the object it just created, and any later
/// mutation of that object by another channel.
#[test]
fn writer_implicitly_self_subscribes_to_objects_it_creates() {
    let (server, d, mut d_rx) = test_server();
    drain(&mut d_rx);
    let (other, _other_rx) = add_channel(&server);

    let mut adds = HashMap::new();
    adds.insert(
        keys::index_key("S", "T", keys::EXISTS_FIELD, &ValueHash::Bool(true)),
        HashSet::from(["id3".to_owned()]),
    );
    server.new_transaction(d, "txn-create".to_owned(), HashMap::new(), adds, HashMap::new(), vec![], vec![], 0);

    let messages = drain(&mut d_rx);
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::SubscriptionIncrease { identities, .. } if identities == &vec!["id3".to_owned()])));
    assert!(messages.iter().any(|m| matches!(m, ServerMessage::Transaction { .. })));

    let mut writes = HashMap::new();
    writes.insert(keys::data_key("S", "T", "id3", "name"), Some(bytes::Bytes::from_static(b"carol")));
    server.new_transaction(other, "txn-mutate".to_owned(), writes, HashMap::new(), HashMap::new(), vec![], vec![], 0);

    let later = drain(&mut d_rx);
    assert!(later.iter().any(|m| matches!(m, ServerMessage::Transaction { .. })), "D must keep observing id3");
}

/// Scenario 6: heartbeat death. A channel silent past the configured
/// timeout is closed by the next monitor pass, and its connection
/// identity is scrubbed from the `core.Connection " exists"` index.
#[tokio::test]
async fn heartbeat_timeout_culls_the_connection() {
    let store = Arc::new(MemoryStore::new());
    let config = Config { heartbeat_interval_secs: 0, heartbeat_timeout_multiplier: 1, ..Config::default() };
    let server = Server::new(store.clone(), config).unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    server.add_connection(tx).unwrap();
    let identity = match drain(&mut rx).as_slice() {
        [ServerMessage::Initialize { conn_identity, .. }] => conn_identity.clone(),
        other => panic!("expected Initialize, got {:?}", other),
    };

    tokio::time::sleep(Duration::from_millis(5)).await;
    server.cull_dead_connections();

    let exists_index = keys::index_key(CONNECTION_SCHEMA, CONNECTION_TYPE, keys::EXISTS_FIELD, &ValueHash::Bool(true));
    let members = store.get_set_members(&exists_index).unwrap();
    assert!(!members.contains(&identity));
}
