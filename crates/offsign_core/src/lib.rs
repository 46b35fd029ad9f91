//! # OffSign Core
//!
//! Session model, encrypted-at-rest storage, and event bus for OffSign -
//! the local-first engine that lets a user keep working on a
//! document-signing session while disconnected, without losing or
//! duplicating work once connectivity returns.
//!
//! This crate provides:
//! - The record model: sessions, cached document bytes, the offline
//!   submission queue, and delivery error records
//! - [`EncryptedStore`]: AES-256-GCM envelopes under a device-local key,
//!   with a structural predicate for legacy-plaintext migration
//! - [`LocalSessionManager`]: the single on-device source of truth,
//!   consulted before any network access
//! - [`EventBus`]: typed in-process pub/sub for sync lifecycle events
//!
//! ## Key Invariants
//!
//! - One session per `session_id`; one queued submission per
//!   `(session_id, recipient_id)`
//! - A successful delivery sets the session `Completed` and removes the
//!   queue entry and error record in one transaction
//! - Encryption failures never block writes; reads of damaged payloads
//!   degrade to "not found", never to garbage

mod crypto;
mod error;
mod events;
mod manager;
mod model;

pub use crypto::{
    EncryptedEnvelope, EncryptedStore, EncryptionKey, ENVELOPE_HEADER_SIZE, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use events::{EventBus, SyncEvent};
pub use manager::{LocalSessionManager, PdfInput};
pub use model::{
    decode, encode, now_millis, submission_key, CachedDocument, DocumentInfo, QueuedSubmission,
    Session, SessionStatus, SignatureField, SignatureMap, SyncErrorRecord,
};
