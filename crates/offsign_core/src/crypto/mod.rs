//! Encryption of sensitive payloads at rest.
//!
//! Payloads are sealed into self-describing envelopes with AES-256-GCM
//! under a device-local key that never leaves the device. Envelopes are
//! structurally distinguishable from legacy plaintext, so records written
//! before encryption was available keep decoding after migration.
//!
//! Key lifecycle: the device key is generated once and persisted alongside
//! application data; it is never regenerated automatically. Losing the key
//! makes all prior envelopes permanently unrecoverable - an accepted risk,
//! not solved here.

mod encrypted;

pub use encrypted::{
    EncryptedEnvelope, EncryptedStore, EncryptionKey, ENVELOPE_HEADER_SIZE, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
