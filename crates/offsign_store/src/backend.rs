//! Store backend trait and transaction type.

use crate::error::StoreResult;

/// A single operation within a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Writes a value at `(collection, key)`, replacing any existing value.
    Put {
        /// Collection name.
        collection: String,
        /// Record key within the collection.
        key: String,
        /// Encoded record bytes.
        value: Vec<u8>,
    },
    /// Removes the value at `(collection, key)`. Deleting a missing key is
    /// not an error.
    Delete {
        /// Collection name.
        collection: String,
        /// Record key within the collection.
        key: String,
    },
}

/// An ordered batch of operations applied atomically.
///
/// A transaction either commits in full or leaves the store unchanged.
/// Operations are applied in insertion order, so a later `Put` on the same
/// key wins over an earlier one within the same transaction.
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    ops: Vec<TxnOp>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a put operation.
    pub fn put(
        &mut self,
        collection: impl Into<String>,
        key: impl Into<String>,
        value: Vec<u8>,
    ) -> &mut Self {
        self.ops.push(TxnOp::Put {
            collection: collection.into(),
            key: key.into(),
            value,
        });
        self
    }

    /// Adds a delete operation.
    pub fn delete(&mut self, collection: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.ops.push(TxnOp::Delete {
            collection: collection.into(),
            key: key.into(),
        });
        self
    }

    /// Returns the operations in commit order.
    #[must_use]
    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    /// Returns true if the transaction contains no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// A transactional local key-value store organized by named collections.
///
/// Backends are **opaque record stores**: they hold encoded bytes keyed by
/// `(collection, key)` and do not interpret record contents. All format
/// interpretation lives above this trait.
///
/// # Invariants
///
/// - `commit` applies all operations of a transaction or none of them
/// - `get` returns exactly the bytes last committed for that key
/// - `get_all` enumerates a collection in key order; callers must not treat
///   that as a delivery-order guarantee
/// - Backends must be `Send + Sync`; concurrent committers race on a
///   last-write-wins basis with no cross-transaction isolation
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - in-memory, for tests and ephemeral use
/// - [`crate::FileStore`] - CBOR snapshot on disk with a single-writer lock
pub trait StoreBackend: Send + Sync {
    /// Reads the value at `(collection, key)`, if present.
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns all `(key, value)` pairs in a collection, in key order.
    ///
    /// An unknown collection yields an empty list.
    fn get_all(&self, collection: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Atomically applies a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the store is left unchanged.
    fn commit(&self, txn: Transaction) -> StoreResult<()>;
}
