//! In-memory store backend.

use crate::backend::{StoreBackend, Transaction, TxnOp};
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Collections = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// An in-memory store backend.
///
/// Suitable for unit tests, integration tests, and ephemeral sessions that
/// do not need to survive the process.
///
/// # Thread Safety
///
/// All state lives behind a single `RwLock`, so commits are atomic with
/// respect to readers in other threads.
///
/// # Example
///
/// ```rust
/// use offsign_store::{MemoryStore, StoreBackend, Transaction};
///
/// let store = MemoryStore::new();
/// let mut txn = Transaction::new();
/// txn.put("sessions", "s1", vec![0x42]);
/// store.commit(txn).unwrap();
/// assert_eq!(store.get("sessions", "s1").unwrap(), Some(vec![0x42]));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records across all collections.
    ///
    /// Useful for tests and debugging.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.collections.read().values().map(BTreeMap::len).sum()
    }

    /// Removes every record from every collection.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

impl StoreBackend for MemoryStore {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    fn get_all(&self, collection: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn commit(&self, txn: Transaction) -> StoreResult<()> {
        let mut collections = self.collections.write();
        for op in txn.ops() {
            match op {
                TxnOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                TxnOp::Delete { collection, key } => {
                    if let Some(c) = collections.get_mut(collection) {
                        c.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.get("sessions", "s1").unwrap(), None);
        assert!(store.get_all("sessions").unwrap().is_empty());
    }

    #[test]
    fn put_then_get() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![1, 2, 3]);
        store.commit(txn).unwrap();

        assert_eq!(store.get("sessions", "s1").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn put_replaces_existing() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![1]);
        store.commit(txn).unwrap();

        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![2]);
        store.commit(txn).unwrap();

        assert_eq!(store.get("sessions", "s1").unwrap(), Some(vec![2]));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn delete_removes_record() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![1]);
        store.commit(txn).unwrap();

        let mut txn = Transaction::new();
        txn.delete("sessions", "s1");
        store.commit(txn).unwrap();

        assert_eq!(store.get("sessions", "s1").unwrap(), None);
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.delete("sessions", "nope");
        assert!(store.commit(txn).is_ok());
    }

    #[test]
    fn get_all_returns_key_order() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("queue", "b", vec![2]);
        txn.put("queue", "a", vec![1]);
        txn.put("queue", "c", vec![3]);
        store.commit(txn).unwrap();

        let all = store.get_all("queue").unwrap();
        let keys: Vec<&str> = all.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn collections_are_independent() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "k", vec![1]);
        txn.put("queue", "k", vec![2]);
        store.commit(txn).unwrap();

        assert_eq!(store.get("sessions", "k").unwrap(), Some(vec![1]));
        assert_eq!(store.get("queue", "k").unwrap(), Some(vec![2]));
    }

    #[test]
    fn later_op_wins_within_transaction() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![1]);
        txn.put("sessions", "s1", vec![2]);
        store.commit(txn).unwrap();

        assert_eq!(store.get("sessions", "s1").unwrap(), Some(vec![2]));
    }

    #[test]
    fn clear_removes_everything() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("sessions", "s1", vec![1]);
        store.commit(txn).unwrap();

        store.clear();
        assert_eq!(store.record_count(), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Put(String, Vec<u8>),
            Delete(String),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            let key = proptest::sample::select(vec!["a", "b", "c", "d"]);
            prop_oneof![
                (key.clone(), proptest::collection::vec(any::<u8>(), 0..16))
                    .prop_map(|(k, v)| Op::Put(k.to_owned(), v)),
                key.prop_map(|k| Op::Delete(k.to_owned())),
            ]
        }

        proptest! {
            // Committing batches of ops leaves the store matching a plain
            // map that saw the same ops in the same order.
            #[test]
            fn commits_match_model(batches in proptest::collection::vec(
                proptest::collection::vec(op_strategy(), 1..8),
                1..8,
            )) {
                let store = MemoryStore::new();
                let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();

                for batch in &batches {
                    let mut txn = Transaction::new();
                    for op in batch {
                        match op {
                            Op::Put(key, value) => {
                                txn.put("records", key.clone(), value.clone());
                                model.insert(key.clone(), value.clone());
                            }
                            Op::Delete(key) => {
                                txn.delete("records", key.clone());
                                model.remove(key);
                            }
                        }
                    }
                    store.commit(txn).unwrap();
                }

                let all: BTreeMap<String, Vec<u8>> =
                    store.get_all("records").unwrap().into_iter().collect();
                prop_assert_eq!(all, model);
            }
        }
    }
}
