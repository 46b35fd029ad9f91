//! File-backed store with a single-writer lock.

use crate::backend::{StoreBackend, Transaction, TxnOp};
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

type Collections = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

const DATA_FILE: &str = "offsign.store";
const LOCK_FILE: &str = "offsign.lock";

/// A file-backed store that persists all collections as a single CBOR
/// snapshot.
///
/// # Durability model
///
/// Every commit rewrites the snapshot to a temporary file and atomically
/// renames it over the data file, so a crash mid-commit leaves the previous
/// snapshot intact. An `fs2` exclusive lock on a sidecar lock file keeps a
/// second process from opening the same directory for writing.
///
/// # Example
///
/// ```rust,ignore
/// use offsign_store::{FileStore, StoreBackend, Transaction};
///
/// let store = FileStore::open("/var/lib/offsign")?;
/// let mut txn = Transaction::new();
/// txn.put("sessions", "s1", payload);
/// store.commit(txn)?;
/// ```
pub struct FileStore {
    dir: PathBuf,
    collections: RwLock<Collections>,
    /// Held for the lifetime of the store; dropping it releases the lock.
    _lock: File,
}

impl FileStore {
    /// Opens (or creates) a store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the store
    /// lock, or [`StoreError::Corrupt`] if the existing snapshot cannot be
    /// decoded.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        let data_path = dir.join(DATA_FILE);
        let collections = if data_path.exists() {
            let bytes = fs::read(&data_path)?;
            ciborium::from_reader(bytes.as_slice())
                .map_err(|e| StoreError::corrupt(format!("snapshot decode failed: {e}")))?
        } else {
            Collections::new()
        };

        Ok(Self {
            dir,
            collections: RwLock::new(collections),
            _lock: lock,
        })
    }

    /// Returns the directory this store lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serializes the snapshot to a temp file and renames it into place.
    fn persist(&self, collections: &Collections) -> StoreResult<()> {
        let mut buf = Vec::new();
        ciborium::into_writer(collections, &mut buf)
            .map_err(|e| StoreError::commit_failed(format!("snapshot encode failed: {e}")))?;

        let tmp_path = self.dir.join(format!("{DATA_FILE}.tmp"));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.dir.join(DATA_FILE))?;
        Ok(())
    }
}

impl StoreBackend for FileStore {
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

        // Stage on a copy so a failed persist leaves memory and disk at the
        // previous snapshot.
        let mut staged = collections.clone();
        for op in txn.ops() {
            match op {
                TxnOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    staged
                        .entry(collection.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                TxnOp::Delete { collection, key } => {
                    if let Some(c) = staged.get_mut(collection) {
                        c.remove(key);
                    }
                }
            }
        }

        self.persist(&staged)?;
        *collections = staged;
        Ok(())
    }
}
