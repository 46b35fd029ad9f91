//! The on-device source of truth for signing sessions.

use crate::crypto::{EncryptedEnvelope, EncryptedStore, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    decode, encode, now_millis, submission_key, CachedDocument, DocumentInfo, QueuedSubmission,
    Session, SessionStatus, SignatureField, SignatureMap, SyncErrorRecord,
};
use offsign_store::{StoreBackend, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Collection names in the backing store.
const SESSIONS: &str = "sessions";
const PDF_CACHE: &str = "pdf_cache";
const SYNC_QUEUE: &str = "sync_queue";
const SYNC_ERRORS: &str = "sync_errors";
const META: &str = "meta";

const OFFLINE_MODE_KEY: &str = "offline_mode";

/// Input to [`LocalSessionManager::cache_pdf_data`], normalized to raw
/// bytes before storage.
#[derive(Debug, Clone)]
pub enum PdfInput {
    /// Raw document bytes.
    Bytes(Vec<u8>),
    /// Text form (base64 data URL or similar), stored as its UTF-8 bytes.
    Text(String),
}

impl PdfInput {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            PdfInput::Bytes(bytes) => bytes,
            PdfInput::Text(text) => text.into_bytes(),
        }
    }
}

impl From<Vec<u8>> for PdfInput {
    fn from(bytes: Vec<u8>) -> Self {
        PdfInput::Bytes(bytes)
    }
}

impl From<String> for PdfInput {
    fn from(text: String) -> Self {
        PdfInput::Text(text)
    }
}

impl From<&str> for PdfInput {
    fn from(text: &str) -> Self {
        PdfInput::Text(text.to_owned())
    }
}

/// Persisted form of a session. Signature payloads live in an opaque blob
/// so they can be sealed as one envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    session_id: String,
    recipient_id: String,
    document: DocumentInfo,
    fields: Vec<SignatureField>,
    status: SessionStatus,
    created_at: u64,
    expires_at: Option<u64>,
    signatures: Vec<u8>,
    signatures_encrypted: bool,
}

/// Durable CRUD over sessions, cached document bytes, and the offline
/// submission queue.
///
/// This is an explicitly constructed context object - callers hold it (or
/// an `Arc` of it) and pass it where needed; there is no process-wide
/// instance. It is consulted before any network access.
///
/// # Transactions
///
/// Every method is exactly one transaction against the backing store. No
/// call spans multiple transactions, and there is no cross-call isolation:
/// concurrent writers race on a last-write-wins basis.
///
/// # Degradation policy
///
/// - Encryption failure on write never blocks the write; the record is
///   stored plaintext with `is_encrypted = false` and the fallback is
///   logged.
/// - Storage, codec, or decryption failures on read degrade to "not found"
///   (or an empty signature map) and are logged - never surfaced as errors.
pub struct LocalSessionManager {
    store: Arc<dyn StoreBackend>,
    crypto: Option<EncryptedStore>,
}

impl LocalSessionManager {
    /// Creates a manager over the given store, optionally with encryption.
    #[must_use]
    pub fn new(store: Arc<dyn StoreBackend>, crypto: Option<EncryptedStore>) -> Self {
        Self { store, crypto }
    }

    /// Creates a manager whose encryption uses the persisted device key,
    /// generating the key on first use.
    pub fn with_device_key(store: Arc<dyn StoreBackend>) -> CoreResult<Self> {
        let key = EncryptionKey::load_or_generate(store.as_ref())?;
        Ok(Self::new(store, Some(EncryptedStore::new(key))))
    }

    /// Returns true if payloads written from here on will be encrypted.
    #[must_use]
    pub fn encryption_available(&self) -> bool {
        self.crypto.as_ref().is_some_and(EncryptedStore::is_available)
    }

    // ---- sessions ----------------------------------------------------

    /// Returns the session, or `None` if it does not exist or cannot be
    /// read.
    ///
    /// Expiry is evaluated lazily: if `expires_at` has passed, the returned
    /// value carries status [`SessionStatus::Expired`]. The stored record is
    /// not rewritten and nothing is purged in the background.
    pub fn get_session(&self, session_id: &str) -> CoreResult<Option<Session>> {
        let Some(record) = self.read_record::<SessionRecord>(SESSIONS, session_id) else {
            return Ok(None);
        };

        let mut session = self.open_session(record);
        if session.is_expired_at(now_millis()) {
            session.status = SessionStatus::Expired;
        }
        Ok(Some(session))
    }

    /// Saves a session, replacing any existing record wholesale.
    ///
    /// This is a full upsert, not a merge - read-modify-write for partial
    /// updates.
    pub fn save_session(&self, session: &Session) -> CoreResult<()> {
        let record = self.seal_session(session);
        let mut txn = Transaction::new();
        txn.put(SESSIONS, &session.session_id, encode(&record)?);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Deletes a session and everything hanging off it: the cached
    /// document, queued submissions, and error records. Explicit user
    /// action only - nothing else ever hard-deletes a session.
    pub fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        let mut txn = Transaction::new();
        txn.delete(SESSIONS, session_id);
        txn.delete(PDF_CACHE, session_id);

        let prefix = format!("{session_id}/");
        for (key, _) in self.store.get_all(SYNC_QUEUE)? {
            if key.starts_with(&prefix) {
                txn.delete(SYNC_QUEUE, &key);
            }
        }
        for (key, _) in self.store.get_all(SYNC_ERRORS)? {
            if key.starts_with(&prefix) {
                txn.delete(SYNC_ERRORS, &key);
            }
        }

        self.store.commit(txn)?;
        Ok(())
    }

    /// Merges new signature entries into the session's map (new entries win
    /// on key collision), re-encrypts the merged result, and moves the
    /// session to [`SessionStatus::InProgress`].
    pub fn save_signatures(&self, session_id: &str, signatures: &SignatureMap) -> CoreResult<()> {
        let record = self
            .read_record::<SessionRecord>(SESSIONS, session_id)
            .ok_or_else(|| CoreError::session_not_found(session_id))?;

        let mut session = self.open_session(record);
        for (field_id, payload) in signatures {
            session.signatures.insert(field_id.clone(), payload.clone());
        }
        session.status = SessionStatus::InProgress;

        self.save_session(&session)
    }

    // ---- cached document bytes ---------------------------------------

    /// Caches the session's document bytes, encrypting when possible.
    ///
    /// On encryption failure the bytes are stored plaintext and the record
    /// is flagged `is_encrypted = false`, so a later read never attempts to
    /// decrypt plaintext. The write itself never fails for crypto reasons.
    pub fn cache_pdf_data(&self, session_id: &str, input: impl Into<PdfInput>) -> CoreResult<()> {
        let bytes = input.into().into_bytes();
        let (payload, is_encrypted) = self.seal_bytes(bytes);

        let record = CachedDocument {
            session_id: session_id.to_owned(),
            payload,
            is_encrypted,
            cached_at: now_millis(),
        };

        let mut txn = Transaction::new();
        txn.put(PDF_CACHE, session_id, encode(&record)?);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Returns the cached document bytes, or `None` when nothing is cached
    /// or the cached envelope cannot be decrypted.
    ///
    /// A failed decryption means the local cache is unrecoverable; the
    /// caller refetches or prompts for resubmission.
    pub fn get_cached_pdf_data(&self, session_id: &str) -> CoreResult<Option<Vec<u8>>> {
        let Some(record) = self.read_record::<CachedDocument>(PDF_CACHE, session_id) else {
            return Ok(None);
        };

        if !record.is_encrypted {
            // Legacy plaintext record, returned as-is.
            return Ok(Some(record.payload));
        }

        match self.open_bytes(&record.payload) {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                warn!(session_id, "cached document is undecryptable, treating as missing");
                Ok(None)
            }
        }
    }

    // ---- offline queue ------------------------------------------------

    /// Queues a submission for delivery.
    ///
    /// Keyed by `(session_id, recipient_id)`: queuing again before delivery
    /// replaces the earlier entry (last write wins).
    pub fn queue_for_sync(&self, submission: &QueuedSubmission) -> CoreResult<()> {
        let mut txn = Transaction::new();
        txn.put(SYNC_QUEUE, submission.queue_key(), encode(submission)?);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Returns all queued submissions in the store's enumeration order.
    pub fn queued_submissions(&self) -> CoreResult<Vec<QueuedSubmission>> {
        let mut submissions = Vec::new();
        for (key, bytes) in self.store.get_all(SYNC_QUEUE)? {
            match decode::<QueuedSubmission>(&bytes) {
                Ok(submission) => submissions.push(submission),
                Err(e) => warn!(key, error = %e, "skipping undecodable queue entry"),
            }
        }
        Ok(submissions)
    }

    /// Removes a queued submission, if present.
    pub fn remove_from_queue(&self, session_id: &str, recipient_id: &str) -> CoreResult<()> {
        let mut txn = Transaction::new();
        txn.delete(SYNC_QUEUE, submission_key(session_id, recipient_id));
        self.store.commit(txn)?;
        Ok(())
    }

    /// Records a failed delivery attempt: bumps the queue entry's
    /// `retry_count` and upserts the error record, in one transaction.
    ///
    /// The count is derived from the queue entry, so the two stay in
    /// agreement and re-queuing a fresh submission (which overwrites the
    /// entry with `retry_count = 0`) restores the full retry budget.
    ///
    /// Returns the new attempt count.
    pub fn record_delivery_failure(
        &self,
        session_id: &str,
        recipient_id: &str,
        error: &str,
    ) -> CoreResult<u32> {
        let key = submission_key(session_id, recipient_id);
        let submission = self.read_record::<QueuedSubmission>(SYNC_QUEUE, &key);
        let attempt_count = submission
            .as_ref()
            .map(|s| s.retry_count)
            .or_else(|| {
                // No queue entry left; continue from the error record.
                self.read_record::<SyncErrorRecord>(SYNC_ERRORS, &key)
                    .map(|r| r.attempt_count)
            })
            .unwrap_or(0)
            + 1;

        let mut txn = Transaction::new();

        if let Some(mut submission) = submission {
            submission.retry_count = attempt_count;
            txn.put(SYNC_QUEUE, &key, encode(&submission)?);
        }

        let record = SyncErrorRecord {
            session_id: session_id.to_owned(),
            recipient_id: recipient_id.to_owned(),
            error: error.to_owned(),
            attempt_count,
            last_attempt: now_millis(),
        };
        txn.put(SYNC_ERRORS, &key, encode(&record)?);

        self.store.commit(txn)?;
        Ok(attempt_count)
    }

    /// Finalizes a successful delivery: sets the session to
    /// [`SessionStatus::Completed`] and removes the queue entry and error
    /// record, all in one transaction - no partial success state is ever
    /// visible.
    pub fn mark_delivered(&self, session_id: &str, recipient_id: &str) -> CoreResult<()> {
        let key = submission_key(session_id, recipient_id);
        let mut txn = Transaction::new();

        match self.read_record::<SessionRecord>(SESSIONS, session_id) {
            Some(mut record) => {
                record.status = SessionStatus::Completed;
                txn.put(SESSIONS, session_id, encode(&record)?);
            }
            None => warn!(session_id, "delivered submission has no local session"),
        }

        txn.delete(SYNC_QUEUE, &key);
        txn.delete(SYNC_ERRORS, &key);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Discards a submission whose conflict was resolved in the remote's
    /// favor: removes the queue entry and error record together, leaving
    /// the session untouched.
    pub fn discard_submission(&self, session_id: &str, recipient_id: &str) -> CoreResult<()> {
        let key = submission_key(session_id, recipient_id);
        let mut txn = Transaction::new();
        txn.delete(SYNC_QUEUE, &key);
        txn.delete(SYNC_ERRORS, &key);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Returns all delivery failure records.
    pub fn sync_errors(&self) -> CoreResult<Vec<SyncErrorRecord>> {
        let mut records = Vec::new();
        for (key, bytes) in self.store.get_all(SYNC_ERRORS)? {
            match decode::<SyncErrorRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key, error = %e, "skipping undecodable error record"),
            }
        }
        Ok(records)
    }

    /// Clears the error record for a submission, if present.
    pub fn clear_sync_error(&self, session_id: &str, recipient_id: &str) -> CoreResult<()> {
        let mut txn = Transaction::new();
        txn.delete(SYNC_ERRORS, submission_key(session_id, recipient_id));
        self.store.commit(txn)?;
        Ok(())
    }

    // ---- explicit offline mode ---------------------------------------

    /// Persists the user-set explicit offline flag.
    pub fn set_offline_mode(&self, offline: bool) -> CoreResult<()> {
        let mut txn = Transaction::new();
        txn.put(META, OFFLINE_MODE_KEY, vec![u8::from(offline)]);
        self.store.commit(txn)?;
        Ok(())
    }

    /// Returns the persisted explicit offline flag (false by default).
    pub fn offline_mode(&self) -> CoreResult<bool> {
        Ok(self
            .store
            .get(META, OFFLINE_MODE_KEY)?
            .is_some_and(|bytes| bytes.first() == Some(&1)))
    }

    // ---- internal helpers --------------------------------------------

    /// Reads and decodes a record, degrading any failure to `None` with a
    /// warning.
    fn read_record<T: serde::de::DeserializeOwned>(&self, collection: &str, key: &str) -> Option<T> {
        let bytes = match self.store.get(collection, key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(collection, key, error = %e, "store read failed, treating as missing");
                return None;
            }
        };

        match decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(collection, key, error = %e, "record decode failed, treating as missing");
                None
            }
        }
    }

    /// Encrypts bytes when possible; falls back to plaintext and says so.
    fn seal_bytes(&self, bytes: Vec<u8>) -> (Vec<u8>, bool) {
        let Some(crypto) = self.crypto.as_ref().filter(|c| c.is_available()) else {
            return (bytes, false);
        };

        match crypto.encrypt_bytes(&bytes) {
            Ok(envelope) => (envelope.into_bytes(), true),
            Err(e) => {
                warn!(error = %e, "encryption failed, storing plaintext");
                (bytes, false)
            }
        }
    }

    /// Decrypts envelope bytes; `None` means the payload is unrecoverable.
    fn open_bytes(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let crypto = self.crypto.as_ref()?;
        let envelope = EncryptedEnvelope::from_bytes(payload.to_vec()).ok()?;
        crypto.decrypt_bytes(&envelope).ok()
    }

    fn seal_session(&self, session: &Session) -> SessionRecord {
        let map_bytes = encode(&session.signatures).unwrap_or_default();
        let (signatures, signatures_encrypted) = self.seal_bytes(map_bytes);

        SessionRecord {
            session_id: session.session_id.clone(),
            recipient_id: session.recipient_id.clone(),
            document: session.document.clone(),
            fields: session.fields.clone(),
            status: session.status,
            created_at: session.created_at,
            expires_at: session.expires_at,
            signatures,
            signatures_encrypted,
        }
    }

    fn open_session(&self, record: SessionRecord) -> Session {
        let signatures = if record.signatures_encrypted {
            match self
                .open_bytes(&record.signatures)
                .and_then(|bytes| decode::<SignatureMap>(&bytes).ok())
            {
                Some(map) => map,
                None => {
                    warn!(
                        session_id = record.session_id,
                        "session signatures are undecryptable, returning empty map"
                    );
                    SignatureMap::new()
                }
            }
        } else {
            decode::<SignatureMap>(&record.signatures).unwrap_or_default()
        };

        Session {
            session_id: record.session_id,
            recipient_id: record.recipient_id,
            document: record.document,
            fields: record.fields,
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            signatures,
            signatures_encrypted: record.signatures_encrypted,
        }
    }
}

impl std::fmt::Debug for LocalSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSessionManager")
            .field("encryption_available", &self.encryption_available())
            .finish()
    }
}
