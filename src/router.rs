//! # Subscription Router (section 4.4)
//!
//! The three fan-out indices -- `type -> channels`, `index_key ->
//! channels`, `identity -> channels` -- that answer "which channels
//! observe this mutation?" and that mutate themselves as subscriptions
//! change. Closest 1:1 match to the teacher's own
//! `connection::pubsub_server::Pubsub`: same "no empty value sets"
//! invariant (section 3), same shape of subscribe/unsubscribe. The
//! router, like the registry, lives inside the server's single global
//! lock rather than behind its own -- there is exactly one writer ever,
//! so the extra lock the teacher takes here would be pure overhead.
use crate::connection::{ChannelId, Connection};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// Fan-out indices used to compute which channels must see a given
/// mutation or subscription snapshot.
#[derive(Debug, Default)]
pub struct Router {
    type_to_channels: HashMap<(String, String), HashSet<ChannelId>>,
    index_to_channels: HashMap<Bytes, HashSet<ChannelId>>,
    identity_to_channels: HashMap<String, HashSet<ChannelId>>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrolls `channel` as a whole-type subscriber of `(schema, type)`.
    pub fn add_type_subscriber(&mut self, pair: (String, String), channel: ChannelId) {
        self.type_to_channels.entry(pair).or_insert_with(HashSet::new).insert(channel);
    }

    /// Enrolls `channel` as a subscriber of the full index key.
    pub fn add_index_subscriber(&mut self, index_key: Bytes, channel: ChannelId) {
        self.index_to_channels.entry(index_key).or_insert_with(HashSet::new).insert(channel);
    }

    /// Enrolls `channel` as a tracker of a single identity.
    pub fn add_identity_subscriber(&mut self, identity: String, channel: ChannelId) {
        self.identity_to_channels.entry(identity).or_insert_with(HashSet::new).insert(channel);
    }

    /// Channels currently subscribed to the full index key, if any.
    pub fn index_subscribers(&self, index_key: &Bytes) -> Option<&HashSet<ChannelId>> {
        self.index_to_channels.get(index_key)
    }

    /// Scrubs every fan-out entry for `channel`, using its own
    /// subscription sets to know where to look -- the reverse-of-router
    /// invariant (section 3) means this never has to scan the whole
    /// router. Deletes any bucket left empty.
    pub fn remove_channel(&mut self, channel: ChannelId, connection: &Connection) {
        for pair in &connection.subscribed_types {
            if let Some(set) = self.type_to_channels.get_mut(pair) {
                set.remove(&channel);
                if set.is_empty() {
                    self.type_to_channels.remove(pair);
                }
            }
        }
        for key in &connection.subscribed_index_keys {
            if let Some(set) = self.index_to_channels.get_mut(key) {
                set.remove(&channel);
                if set.is_empty() {
                    self.index_to_channels.remove(key);
                }
            }
        }
        for identity in &connection.subscribed_ids {
            if let Some(set) = self.identity_to_channels.get_mut(identity) {
                set.remove(&channel);
                if set.is_empty() {
                    self.identity_to_channels.remove(identity);
                }
            }
        }
    }

    /// The union of channels that must receive a `Transaction` touching
    /// `schema_type_pairs` and `identities` (section 4.5 step 11).
    pub fn recipients(
        &self,
        schema_type_pairs: &HashSet<(String, String)>,
        identities: &HashSet<String>,
    ) -> HashSet<ChannelId> {
        let mut out = HashSet::new();
        for pair in schema_type_pairs {
            if let Some(set) = self.type_to_channels.get(pair) {
                out.extend(set.iter().copied());
            }
        }
        for identity in identities {
            if let Some(set) = self.identity_to_channels.get(identity) {
                out.extend(set.iter().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::ServerMessage;
    use tokio::sync::mpsc;

    fn test_connection(id: ChannelId) -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel::<ServerMessage>();
        Connection::new(id, format!("id-{}", id), tx)
    }

    #[test]
    fn empty_buckets_are_deleted_on_removal() {
        let mut router = Router::new();
        let mut conn = test_connection(1);
        let pair = ("S".to_owned(), "T".to_owned());
        router.add_type_subscriber(pair.clone(), 1);
        conn.subscribed_types.insert(pair.clone());

        let recipients = router.recipients(&HashSet::from([pair.clone()]), &HashSet::new());
        assert_eq!(recipients, HashSet::from([1]));

        router.remove_channel(1, &conn);
        let recipients = router.recipients(&HashSet::from([pair]), &HashSet::new());
        assert!(recipients.is_empty());
    }

    #[test]
    fn recipients_union_type_and_identity_subscribers() {
        let mut router = Router::new();
        let pair = ("S".to_owned(), "T".to_owned());
        router.add_type_subscriber(pair.clone(), 1);
        router.add_identity_subscriber("obj1".to_owned(), 2);

        let recipients = router.recipients(&HashSet::from([pair]), &HashSet::from(["obj1".to_owned()]));
        assert_eq!(recipients, HashSet::from([1, 2]));
    }
}
