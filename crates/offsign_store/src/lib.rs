//! # OffSign Store
//!
//! Transactional local key-value store for OffSign.
//!
//! This crate provides the lowest-level storage abstraction for the offline
//! signing engine. Stores are **opaque record stores** organized by named
//! collections - they do not interpret the records they hold.
//!
//! ## Design Principles
//!
//! - Each commit is atomic: a transaction applies in full or not at all
//! - No cross-transaction isolation - concurrent writers race
//!   last-write-wins
//! - Must be `Send + Sync` for shared access between direct callers and the
//!   background synchronizer
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - for testing and ephemeral sessions
//! - [`FileStore`] - CBOR snapshot on disk with a single-writer lock
//!
//! ## Example
//!
//! ```rust
//! use offsign_store::{MemoryStore, StoreBackend, Transaction};
//!
//! let store = MemoryStore::new();
//! let mut txn = Transaction::new();
//! txn.put("sessions", "s1", b"payload".to_vec());
//! store.commit(txn).unwrap();
//! assert_eq!(store.get("sessions", "s1").unwrap(), Some(b"payload".to_vec()));
//! ```

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{StoreBackend, Transaction, TxnOp};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
