//! # KV Store Adapter (section 4.2)
//!
//! The contract the transaction engine consumes from the underlying
//! key-value store. The store itself -- its durability model, its own
//! concurrency, whether it is transactional -- is out of scope (section
//! 1); this crate only assumes that [`KvStore::set_several`] is atomic
//! and that it reports, for every mutated set, whether the mutation
//! flipped it between empty and non-empty. A non-transactional store is
//! acceptable as long as the engine is the sole writer and already holds
//! the server's single global lock while calling it (section 5).
use crate::error::Error;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

pub mod memory;

/// Contract the transaction engine consumes from the underlying store.
pub trait KvStore: std::fmt::Debug + Send + Sync {
    /// Reads several keys at once. Missing keys come back as `None`
    /// (the "absent" sentinel of section 3).
    fn get_several(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, Error>;

    /// Enumerates the identities (or, for a group listing, value-hash
    /// strings) currently populating a set-valued key. Empty if unset.
    fn get_set_members(&self, key: &Bytes) -> Result<HashSet<String>, Error>;

    /// Atomically applies a batch of scalar writes and set deltas.
    /// `kvs` maps a data/reverse-index key to its new value, or `None`
    /// to delete it. Returns the keys whose set transitioned
    /// empty -> non-empty, and non-empty -> empty respectively; the
    /// engine uses these to maintain group listings (section 4.5 step 9).
    fn set_several(
        &self,
        kvs: &HashMap<Bytes, Option<Bytes>>,
        set_adds: &HashMap<Bytes, HashSet<String>>,
        set_removes: &HashMap<Bytes, HashSet<String>>,
    ) -> Result<(Vec<Bytes>, Vec<Bytes>), Error>;
}
