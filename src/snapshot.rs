//! # Initial Subscription Snapshotter (section 4.4, steps 1-3 and 5)
//!
//! Builds and delivers the snapshot a channel receives immediately after
//! `Subscribe`: the matching data cells and index sets, gathered
//! atomically under the server's global lock so they are consistent
//! with a single transaction id. Ported from
//! `server.py::_handleSubscription`.
use crate::{
    connection::ChannelId,
    error::Error,
    keys::{self, ValueHash},
    config::Config,
    message::ServerMessage,
    server::Core,
    store::KvStore,
};
use bytes::Bytes;
use log::info;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Builds and sends a `Subscription` message for the shape described by
/// `(schema, typename, fieldname_and_value)` (section 4.4's three
/// subscription shapes), enrolling `channel_id` in the relevant fan-out
/// maps along the way.
pub(crate) fn build(
    core: &mut Core,
    store: &dyn KvStore,
    config: &Config,
    channel_id: ChannelId,
    schema: String,
    typename: Option<String>,
    fieldname_and_value: Option<(String, ValueHash)>,
) -> Result<(), Error> {
    let t_start = Instant::now();

    let definition = core
        .registry
        .get(channel_id)
        .and_then(|c| c.schemas.get(&schema).cloned())
        .ok_or_else(|| Error::UnknownSchema(schema.clone()))?;

    if typename.is_none() && fieldname_and_value.is_some() {
        return Err(Error::MalformedMessage("fieldname_and_value given without a typename"));
    }

    let types_to_subscribe: Vec<String> = match &typename {
        Some(t) => vec![t.clone()],
        None => definition.keys().cloned().collect(),
    };

    let mut values: HashMap<Bytes, Option<Bytes>> = HashMap::new();
    let mut sets: HashMap<Bytes, HashSet<String>> = HashMap::new();
    let mut identities_for_slice: Option<HashSet<String>> = None;

    for t in &types_to_subscribe {
        let typedef = definition
            .get(t)
            .ok_or_else(|| Error::UnknownType(schema.clone(), t.clone()))?;

        let (field, value) = match &fieldname_and_value {
            Some((f, v)) => (f.clone(), v.clone()),
            None => (keys::EXISTS_FIELD.to_owned(), ValueHash::Bool(true)),
        };

        if fieldname_and_value.is_some() && field != keys::IDENTITY_FIELD && !typedef.indices.iter().any(|i| i == &field) {
            return Err(Error::UnknownIndex(schema.clone(), t.clone(), field));
        }

        let identities: HashSet<String> = if field == keys::IDENTITY_FIELD {
            match &value {
                ValueHash::Str(identity) => HashSet::from([identity.clone()]),
                _ => return Err(Error::MalformedMessage("_identity subscription value must be a string")),
            }
        } else {
            store.get_set_members(&keys::index_key(&schema, t, &field, &value))?
        };

        for fieldname in &typedef.fields {
            let field_keys: Vec<Bytes> = identities.iter().map(|id| keys::data_key(&schema, t, id, fieldname)).collect();
            let field_values = store.get_several(&field_keys)?;
            for (k, v) in field_keys.into_iter().zip(field_values.into_iter()) {
                values.insert(k, v);
            }
        }

        for index_name in &typedef.indices {
            let group = keys::index_group(&schema, t, index_name);
            for hash_str in store.get_set_members(&group)? {
                let value_hash = ValueHash::from_canonical_string(&hash_str);
                let index_key = keys::index_key(&schema, t, index_name, &value_hash);
                let members = store.get_set_members(&index_key)?;
                let intersection: HashSet<String> = members.intersection(&identities).cloned().collect();
                if !intersection.is_empty() {
                    sets.insert(index_key, intersection);
                }
            }
        }

        if let Some((f, v)) = &fieldname_and_value {
            for identity in &identities {
                core.router.add_identity_subscriber(identity.clone(), channel_id);
            }
            if let Some(conn) = core.registry.get_mut(channel_id) {
                conn.subscribed_ids.extend(identities.iter().cloned());
            }

            if f != keys::IDENTITY_FIELD {
                let index_key = keys::index_key(&schema, t, f, v);
                core.router.add_index_subscriber(index_key.clone(), channel_id);
                if let Some(conn) = core.registry.get_mut(channel_id) {
                    conn.subscribed_index_keys.insert(index_key);
                }
            }
            identities_for_slice.get_or_insert_with(HashSet::new).extend(identities);
        } else {
            core.router.add_type_subscriber((schema.clone(), t.clone()), channel_id);
            if let Some(conn) = core.registry.get_mut(channel_id) {
                conn.subscribed_types.insert((schema.clone(), t.clone()));
            }
        }
    }

    let tid = core.counter;
    if let Some(conn) = core.registry.get(channel_id) {
        let values_len = values.len();
        let sets_len = sets.len();
        let _ = conn.send(ServerMessage::Subscription {
            schema: schema.clone(),
            typename: typename.clone(),
            fieldname_and_value: fieldname_and_value.clone(),
            values,
            sets,
            tid,
            identities: identities_for_slice,
        });

        if t_start.elapsed() > config.long_transaction_threshold() {
            info!(
                "subscription for {}/{:?}/{:?} took {:?} and produced {} values and {} sets",
                schema,
                typename,
                fieldname_and_value,
                t_start.elapsed(),
                values_len,
                sets_len,
            );
        }
    }

    Ok(())
}
