//! # Transaction Engine (section 4.5)
//!
//! The single-writer commit algorithm: optimistic conflict detection,
//! write application, version bookkeeping, reverse-index maintenance,
//! group-listing maintenance, and downstream broadcast construction
//! (including the implicit subscription expansions that make a commit
//! and a subscription change inseparable -- section 1). Ported from
//! `server.py::_handleNewTransaction` line-by-line, cross-checked
//! against the teacher's `cmd/transaction.rs` optimistic-concurrency
//! shape (`WATCH`/`EXEC`: read a version, compare it at commit time).
use crate::{
    connection::ChannelId,
    error::Error,
    keys::{self, ValueHash},
    config::Config,
    message::{ServerMessage, TypeDefinition},
    server::Core,
    store::KvStore,
};
use bytes::Bytes;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Commits a transaction under the server's single global lock
/// (`core`). `writer` is `None` for the synthetic connection-lifecycle
/// transactions; `as_of_version` is the transaction id the writer last
/// observed. Returns the assigned transaction id on success.
#[allow(clippy::too_many_arguments)]
pub(crate) fn commit(
    core: &mut Core,
    store: &dyn KvStore,
    config: &Config,
    writer: Option<ChannelId>,
    key_value: HashMap<Bytes, Option<Bytes>>,
    mut set_adds: HashMap<Bytes, HashSet<String>>,
    mut set_removes: HashMap<Bytes, HashSet<String>>,
    keys_to_check_versions: &[Bytes],
    indices_to_check_versions: &[Bytes],
    as_of_version: u64,
) -> Result<u64, Error> {
    let t_start = Instant::now();

    // Step 1: assign a transaction id. The counter advances even for an
    // attempt that later conflicts (section 3: "the counter is the
    // single source of global order" -- it is never rolled back).
    core.counter += 1;
    let t = core.counter;
    if t <= as_of_version {
        return Err(Error::MalformedMessage("as_of_version is not less than the assigned transaction id"));
    }

    // Step 2: drop empty add/remove entries.
    set_adds.retain(|_, ids| !ids.is_empty());
    set_removes.retain(|_, ids| !ids.is_empty());

    // Step 3: implicit subscription expansion for the writer.
    if let Some(writer_id) = writer {
        for (index_key, added) in &set_adds {
            let (schema, typename, field, _) = keys::parse_index_key(index_key)?;
            if field != keys::EXISTS_FIELD {
                continue;
            }
            let already_subscribed = core
                .registry
                .get(writer_id)
                .map(|c| c.subscribed_types.contains(&(schema.clone(), typename.clone())))
                .unwrap_or(true);
            if already_subscribed {
                continue;
            }

            if let Some(conn) = core.registry.get_mut(writer_id) {
                conn.subscribed_ids.extend(added.iter().cloned());
            }
            for identity in added {
                core.router.add_identity_subscriber(identity.clone(), writer_id);
            }
            if let Some(conn) = core.registry.get(writer_id) {
                let _ = conn.send(ServerMessage::SubscriptionIncrease {
                    schema,
                    typename,
                    fieldname_and_value: (keys::EXISTS_FIELD.to_owned(), ValueHash::Bool(true)),
                    identities: added.iter().cloned().collect(),
                });
            }
        }
    }

    // Step 4: collect effects.
    let mut keys_writing_to: HashSet<Bytes> = HashSet::new();
    let mut sets_writing_to: HashSet<Bytes> = HashSet::new();
    let mut schema_type_pairs_writing: HashSet<(String, String)> = HashSet::new();
    let mut identities_mentioned: HashSet<String> = HashSet::new();

    for key in key_value.keys() {
        keys_writing_to.insert(key.clone());
        let (schema, typename, identity, _field) = keys::parse_data_key(key)?;
        schema_type_pairs_writing.insert((schema, typename));
        identities_mentioned.insert(identity);
    }

    for (index_key, ids) in set_adds.iter().chain(set_removes.iter()) {
        let (schema, typename) = keys::parse_index_key_schema_type(index_key)?;
        schema_type_pairs_writing.insert((schema, typename));
        sets_writing_to.insert(index_key.clone());
        identities_mentioned.extend(ids.iter().cloned());
    }

    // Step 5: conflict check. No mutation has happened yet.
    for key in keys_to_check_versions.iter().chain(indices_to_check_versions.iter()) {
        if let Some(&last_tid) = core.version_numbers.get(key) {
            if last_tid > as_of_version {
                return Err(Error::Conflict);
            }
        }
    }

    // Step 6: version stamping.
    for key in keys_writing_to.iter().chain(sets_writing_to.iter()) {
        core.version_numbers.insert(key.clone(), t);
    }

    let t_after_check = Instant::now();

    // Step 7: reverse-index maintenance, merged into the data-write batch.
    let mut key_value = key_value;
    for (index_key, removed) in &set_removes {
        let (_, _, field, _) = keys::parse_index_key(index_key)?;
        for identity in removed {
            key_value.insert(keys::reverse_index_key(identity, &field), None);
        }
    }
    for (index_key, added) in &set_adds {
        let (_, _, field, value) = keys::parse_index_key(index_key)?;
        for identity in added {
            key_value.insert(keys::reverse_index_key(identity, &field), Some(value.to_bytes()));
        }
    }

    // Step 8: apply to the store in one atomic call.
    let (newly_non_empty, newly_empty) = store
        .set_several(&key_value, &set_adds, &set_removes)
        .map_err(|e| Error::Store(e.to_string()))?;

    // Step 9: group-listing maintenance, as a second atomic call.
    let mut group_adds: HashMap<Bytes, HashSet<String>> = HashMap::new();
    for index_key in &newly_non_empty {
        let (schema, typename, field, value) = keys::parse_index_key(index_key)?;
        group_adds
            .entry(keys::index_group(&schema, &typename, &field))
            .or_insert_with(HashSet::new)
            .insert(value.to_canonical_string());
    }
    let mut group_removes: HashMap<Bytes, HashSet<String>> = HashMap::new();
    for index_key in &newly_empty {
        let (schema, typename, field, value) = keys::parse_index_key(index_key)?;
        group_removes
            .entry(keys::index_group(&schema, &typename, &field))
            .or_insert_with(HashSet::new)
            .insert(value.to_canonical_string());
    }
    if !group_adds.is_empty() || !group_removes.is_empty() {
        store
            .set_several(&HashMap::new(), &group_adds, &group_removes)
            .map_err(|e| Error::Store(e.to_string()))?;
    }

    let t_after_apply = Instant::now();

    // Step 10: recipient expansion via index subscriptions.
    for (index_key, added) in set_adds.clone().iter() {
        let subscribers: Vec<ChannelId> = match core.router.index_subscribers(index_key) {
            Some(set) => set.iter().copied().collect(),
            None => continue,
        };

        let mut ids_to_add_to_transaction: HashSet<String> = HashSet::new();
        let mut triggered_channels: Vec<ChannelId> = Vec::new();

        for channel_id in subscribers {
            let new_ids: HashSet<String> = {
                let conn = match core.registry.get(channel_id) {
                    Some(c) => c,
                    None => continue,
                };
                added.difference(&conn.subscribed_ids).cloned().collect()
            };
            if new_ids.is_empty() {
                continue;
            }

            if let Some(conn) = core.registry.get_mut(channel_id) {
                conn.subscribed_ids.extend(new_ids.iter().cloned());
            }
            for identity in &new_ids {
                core.router.add_identity_subscriber(identity.clone(), channel_id);
            }

            let (schema, typename, field, value) = keys::parse_index_key(index_key)?;
            if let Some(conn) = core.registry.get(channel_id) {
                let _ = conn.send(ServerMessage::SubscriptionIncrease {
                    schema,
                    typename,
                    fieldname_and_value: (field, value),
                    identities: new_ids.iter().cloned().collect(),
                });
            }

            ids_to_add_to_transaction.extend(new_ids);
            triggered_channels.push(channel_id);
        }

        if ids_to_add_to_transaction.is_empty() {
            continue;
        }

        // Open question (section 9): resolved as the *union* of declared
        // fields/indices across every triggered channel's definition for
        // this (schema, type), not just the last one iterated.
        let (schema, typename, _field, _value) = keys::parse_index_key(index_key)?;
        let mut union_fields: HashSet<String> = HashSet::new();
        let mut union_indices: HashSet<String> = HashSet::new();
        for &channel_id in &triggered_channels {
            if let Some(conn) = core.registry.get(channel_id) {
                if let Some(TypeDefinition { fields, indices }) = conn.schemas.get(&schema).and_then(|s| s.get(&typename)) {
                    union_fields.extend(fields.iter().cloned());
                    union_indices.extend(indices.iter().cloned());
                }
            }
        }

        let new_ids: Vec<String> = ids_to_add_to_transaction.iter().cloned().collect();

        let mut field_keys = Vec::new();
        for field in &union_fields {
            for identity in &new_ids {
                field_keys.push(keys::data_key(&schema, &typename, identity, field));
            }
        }
        if !field_keys.is_empty() {
            let values = store.get_several(&field_keys).map_err(|e| Error::Store(e.to_string()))?;
            for (k, v) in field_keys.into_iter().zip(values.into_iter()) {
                key_value.insert(k, v);
            }
        }

        let mut reverse_keys = Vec::new();
        for index_name in &union_indices {
            for identity in &new_ids {
                reverse_keys.push(keys::reverse_index_key(identity, index_name));
            }
        }
        if !reverse_keys.is_empty() {
            let reverse_vals = store.get_several(&reverse_keys).map_err(|e| Error::Store(e.to_string()))?;
            let mut reverse_map: HashMap<Bytes, Option<Bytes>> = HashMap::new();
            for (k, v) in reverse_keys.into_iter().zip(reverse_vals.into_iter()) {
                reverse_map.insert(k, v);
            }
            for index_name in &union_indices {
                for identity in &new_ids {
                    if let Some(Some(bytes)) = reverse_map.get(&keys::reverse_index_key(identity, index_name)) {
                        let value = ValueHash::from_bytes(bytes)?;
                        let ik = keys::index_key(&schema, &typename, index_name, &value);
                        set_adds.entry(ik).or_insert_with(HashSet::new).insert(identity.clone());
                    }
                }
            }
        }
    }

    // Step 11 & 12: recipient set and broadcast.
    let recipients = core.router.recipients(&schema_type_pairs_writing, &identities_mentioned);
    if !recipients.is_empty() {
        let message = ServerMessage::Transaction {
            writes: key_value.clone(),
            set_adds: set_adds.clone(),
            set_removes: set_removes.clone(),
            transaction_id: t,
        };
        for channel_id in recipients {
            if let Some(conn) = core.registry.get(channel_id) {
                if conn.send(message.clone()).is_err() {
                    warn!("channel {} closed mid-broadcast; will be reaped on next heartbeat pass", channel_id);
                }
            }
        }
    }

    let t_end = Instant::now();
    let elapsed = t_end.duration_since(t_start);
    if config.verbose || elapsed > config.long_transaction_threshold() {
        info!(
            "transaction {} [{:?}/{:?}/{:?}] with {} writes, {} set ops",
            t,
            t_after_check.duration_since(t_start),
            t_after_apply.duration_since(t_after_check),
            t_end.duration_since(t_after_apply),
            key_value.len(),
            set_adds.len() + set_removes.len(),
        );
    }

    // Step 13.
    Ok(t)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn new_core() -> Core {
        Core::default()
    }

    #[test]
    fn commit_stamps_versions_and_rejects_stale_preconditions() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut core = new_core();

        let key = keys::data_key("S", "T", "id1", "name");
        let mut writes = HashMap::new();
        writes.insert(key.clone(), Some(Bytes::from_static(b"alice")));

        let t1 = commit(&mut core, &store, &config, None, writes, HashMap::new(), HashMap::new(), &[], &[], 0).unwrap();
        assert_eq!(t1, 1);
        assert_eq!(core.version_numbers.get(&key), Some(&1));

        // A second writer reading an older version of the same key conflicts.
        let mut writes2 = HashMap::new();
        writes2.insert(key.clone(), Some(Bytes::from_static(b"bob")));
        let result = commit(&mut core, &store, &config, None, writes2, HashMap::new(), HashMap::new(), &[key], &[], 0);
        assert!(matches!(result, Err(Error::Conflict)));

        // The version table is unaffected by a rejected commit.
        assert_eq!(core.version_numbers.get(&key), Some(&1));
    }

    #[test]
    fn commit_maintains_group_listing_on_first_and_last_member() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut core = new_core();

        let index_key = keys::index_key("S", "T", "color", &ValueHash::Str("red".into()));
        let group = keys::index_group("S", "T", "color");

        let mut adds = HashMap::new();
        adds.insert(index_key.clone(), HashSet::from(["id1".to_owned()]));
        commit(&mut core, &store, &config, None, HashMap::new(), adds, HashMap::new(), &[], &[], 0).unwrap();
        assert_eq!(store.get_set_members(&group).unwrap(), HashSet::from(["s:red".to_owned()]));

        let mut removes = HashMap::new();
        removes.insert(index_key, HashSet::from(["id1".to_owned()]));
        commit(&mut core, &store, &config, None, HashMap::new(), HashMap::new(), removes, &[], &[], 1).unwrap();
        assert!(store.get_set_members(&group).unwrap().is_empty());
    }
}
