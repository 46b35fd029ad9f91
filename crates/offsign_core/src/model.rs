//! Record types for signing sessions and the offline queue.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A map of field id to signature payload.
pub type SignatureMap = BTreeMap<String, String>;

/// Returns the current time as unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Encodes a record to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a record from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Lifecycle status of a signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created locally, not yet opened for signing.
    Pending,
    /// At least one signature has been written.
    InProgress,
    /// All signatures delivered to the remote endpoint.
    Completed,
    /// The recipient declined to sign.
    Declined,
    /// `expires_at` has passed (evaluated lazily on read).
    Expired,
}

/// Metadata about the document being signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Display title of the document.
    pub title: String,
    /// Number of pages.
    pub page_count: u32,
}

/// A signable field placed on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureField {
    /// Unique field id within the session.
    pub field_id: String,
    /// 1-based page the field sits on.
    pub page: u32,
    /// Human-readable label.
    pub label: String,
    /// Whether the field must be signed before completion.
    pub required: bool,
}

/// A signing session as seen by callers.
///
/// Signature payloads are plaintext here; the session manager encrypts them
/// at rest and records that fact in `signatures_encrypted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub session_id: String,
    /// The recipient this session belongs to.
    pub recipient_id: String,
    /// Document metadata.
    pub document: DocumentInfo,
    /// Ordered list of signable fields.
    pub fields: Vec<SignatureField>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Expiry time, unix milliseconds. `None` means the session never
    /// expires.
    pub expires_at: Option<u64>,
    /// Field id to signature payload.
    pub signatures: SignatureMap,
    /// Whether the stored copy of `signatures` is encrypted at rest.
    pub signatures_encrypted: bool,
}

impl Session {
    /// Creates a new pending session with a generated id.
    #[must_use]
    pub fn new(recipient_id: impl Into<String>, document: DocumentInfo) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient_id.into(),
            document,
            fields: Vec::new(),
            status: SessionStatus::Pending,
            created_at: now_millis(),
            expires_at: None,
            signatures: SignatureMap::new(),
            signatures_encrypted: false,
        }
    }

    /// Adds a signable field.
    #[must_use]
    pub fn with_field(mut self, field: SignatureField) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the expiry time.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the session is expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns true if every required field has a signature.
    #[must_use]
    pub fn all_required_signed(&self) -> bool {
        self.fields
            .iter()
            .filter(|f| f.required)
            .all(|f| self.signatures.contains_key(&f.field_id))
    }
}

/// A cached copy of the session's document bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDocument {
    /// The session this document belongs to (1:1).
    pub session_id: String,
    /// Document bytes: an encrypted envelope when `is_encrypted`, raw
    /// plaintext otherwise.
    pub payload: Vec<u8>,
    /// Whether `payload` is an encrypted envelope.
    pub is_encrypted: bool,
    /// When the document was cached, unix milliseconds.
    pub cached_at: u64,
}

/// A submission awaiting delivery to the remote endpoint.
///
/// At most one live entry exists per `(session_id, recipient_id)`; queuing
/// again before delivery overwrites the earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    /// Session being submitted.
    pub session_id: String,
    /// Recipient who signed.
    pub recipient_id: String,
    /// Signatures to deliver.
    pub signatures: SignatureMap,
    /// Signing credential presented to the endpoint.
    pub signing_key: String,
    /// Client-side completion time, unix milliseconds.
    pub client_timestamp: u64,
    /// Delivery attempts that have failed so far.
    pub retry_count: u32,
}

impl QueuedSubmission {
    /// Creates a submission with a fresh client timestamp.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        recipient_id: impl Into<String>,
        signatures: SignatureMap,
        signing_key: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            recipient_id: recipient_id.into(),
            signatures,
            signing_key: signing_key.into(),
            client_timestamp: now_millis(),
            retry_count: 0,
        }
    }

    /// Returns the store key for this submission.
    #[must_use]
    pub fn queue_key(&self) -> String {
        submission_key(&self.session_id, &self.recipient_id)
    }
}

/// A per-submission delivery failure record.
///
/// Created or updated on each failed delivery; cleared on success or a
/// resolved conflict. Never silently dropped - visible to callers until
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    /// Session of the failed submission.
    pub session_id: String,
    /// Recipient of the failed submission.
    pub recipient_id: String,
    /// Text of the most recent error.
    pub error: String,
    /// Number of failed attempts so far.
    pub attempt_count: u32,
    /// Time of the most recent attempt, unix milliseconds.
    pub last_attempt: u64,
}

/// Builds the store key shared by queue entries and error records.
#[must_use]
pub fn submission_key(session_id: &str, recipient_id: &str) -> String {
    format!("{session_id}/{recipient_id}")
}
