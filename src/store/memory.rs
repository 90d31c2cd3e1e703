//! # In-memory reference `KvStore`
//!
//! A minimal adapter satisfying the contract in [`super::KvStore`]. Real
//! deployments plug in whatever store they already operate (this crate
//! never assumes more than the trait); this implementation exists so the
//! engine, router and snapshotter can be exercised without one, and
//! mirrors the teacher's own `Db` in spirit -- a single lock-protected
//! map, without the slot-sharding scheme, which this crate has no
//! multi-threaded-hot-path need for since the whole server sits behind
//! one global lock anyway.
use super::KvStore;
use crate::error::Error;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// In-memory reference implementation of [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<Bytes, Bytes>>,
    sets: RwLock<HashMap<Bytes, HashSet<String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_several(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, Error> {
        let data = self.data.read();
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    }

    fn get_set_members(&self, key: &Bytes) -> Result<HashSet<String>, Error> {
        Ok(self.sets.read().get(key).cloned().unwrap_or_default())
    }

    fn set_several(
        &self,
        kvs: &HashMap<Bytes, Option<Bytes>>,
        set_adds: &HashMap<Bytes, HashSet<String>>,
        set_removes: &HashMap<Bytes, HashSet<String>>,
    ) -> Result<(Vec<Bytes>, Vec<Bytes>), Error> {
        let mut data = self.data.write();
        let mut sets = self.sets.write();

        for (key, value) in kvs {
            match value {
                Some(bytes) => {
                    data.insert(key.clone(), bytes.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }

        let mut newly_empty = vec![];
        for (key, removed) in set_removes {
            if let Some(members) = sets.get_mut(key) {
                let was_empty = members.is_empty();
                for id in removed {
                    members.remove(id);
                }
                if !was_empty && members.is_empty() {
                    newly_empty.push(key.clone());
                }
                if members.is_empty() {
                    sets.remove(key);
                }
            }
        }

        let mut newly_non_empty = vec![];
        for (key, added) in set_adds {
            let members = sets.entry(key.clone()).or_default();
            let was_empty = members.is_empty();
            for id in added {
                members.insert(id.clone());
            }
            if was_empty && !members.is_empty() {
                newly_non_empty.push(key.clone());
            }
        }

        Ok((newly_non_empty, newly_empty))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_several_reports_empty_non_empty_transitions() {
        let store = MemoryStore::new();
        let key = Bytes::from_static(b"idx");

        let mut adds = HashMap::new();
        adds.insert(key.clone(), HashSet::from(["a".to_owned()]));
        let (non_empty, empty) = store.set_several(&HashMap::new(), &adds, &HashMap::new()).unwrap();
        assert_eq!(non_empty, vec![key.clone()]);
        assert!(empty.is_empty());

        // Adding again to an already non-empty set must not re-report it.
        let mut more_adds = HashMap::new();
        more_adds.insert(key.clone(), HashSet::from(["b".to_owned()]));
        let (non_empty, empty) = store.set_several(&HashMap::new(), &more_adds, &HashMap::new()).unwrap();
        assert!(non_empty.is_empty());
        assert!(empty.is_empty());

        let mut removes = HashMap::new();
        removes.insert(key.clone(), HashSet::from(["a".to_owned(), "b".to_owned()]));
        let (non_empty, empty) = store.set_several(&HashMap::new(), &HashMap::new(), &removes).unwrap();
        assert!(non_empty.is_empty());
        assert_eq!(empty, vec![key.clone()]);

        assert!(store.get_set_members(&key).unwrap().is_empty());
    }

    #[test]
    fn data_cells_round_trip_and_delete() {
        let store = MemoryStore::new();
        let key = Bytes::from_static(b"cell");
        let mut kvs = HashMap::new();
        kvs.insert(key.clone(), Some(Bytes::from_static(b"value")));
        store.set_several(&kvs, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(store.get_several(&[key.clone()]).unwrap(), vec![Some(Bytes::from_static(b"value"))]);

        let mut delete = HashMap::new();
        delete.insert(key.clone(), None);
        store.set_several(&delete, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(store.get_several(&[key]).unwrap(), vec![None]);
    }
}
