//! AES-256-GCM envelope encryption.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use offsign_store::{StoreBackend, Transaction};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Envelope magic: distinguishes sealed payloads from legacy plaintext.
const ENVELOPE_MAGIC: [u8; 4] = *b"OSE1";
/// Envelope format version.
const ENVELOPE_VERSION: u8 = 1;
/// Bytes before the ciphertext begins: magic || version || nonce.
pub const ENVELOPE_HEADER_SIZE: usize = ENVELOPE_MAGIC.len() + 1 + NONCE_SIZE;

/// Store collection and key holding the persisted device key.
const META_COLLECTION: &str = "meta";
const DEVICE_KEY: &str = "device_key";

/// Device-local encryption key for AES-256-GCM.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// The salt should be random, unique per device, and stored alongside
    /// the data. HKDF assumes the input already has reasonable entropy; it
    /// is not a password hash.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"offsign-device-key-v1", &mut bytes)
            .map_err(|_| CoreError::key_derivation("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Loads the persisted device key, generating and persisting one on
    /// first use. The key is never regenerated after that.
    pub fn load_or_generate(store: &dyn StoreBackend) -> CoreResult<Self> {
        if let Some(bytes) = store.get(META_COLLECTION, DEVICE_KEY)? {
            return Self::from_bytes(&bytes);
        }

        let key = Self::generate();
        let mut txn = Transaction::new();
        txn.put(META_COLLECTION, DEVICE_KEY, key.bytes.to_vec());
        store.commit(txn)?;
        Ok(key)
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Never log or serialize the result outside the meta collection.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An opaque encrypted container, structurally distinguishable from
/// plaintext.
///
/// Layout: `magic "OSE1" || version (1 byte) || nonce (12 bytes) ||
/// ciphertext+tag`. Only [`EncryptedStore`] produces envelopes; an envelope
/// is only ever opened by the same class of key that sealed it. A corrupted
/// or foreign envelope fails decryption rather than returning garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    bytes: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Wraps raw bytes previously produced by [`EncryptedStore`].
    ///
    /// # Errors
    ///
    /// Returns a decryption error if the bytes are not a well-formed
    /// envelope.
    pub fn from_bytes(bytes: Vec<u8>) -> CoreResult<Self> {
        if !Self::is_envelope(&bytes) {
            return Err(CoreError::decryption("not an encrypted envelope"));
        }
        Ok(Self { bytes })
    }

    /// Structural predicate: does this byte string look like an envelope?
    ///
    /// Used to tell sealed payloads apart from legacy plaintext records
    /// written before encryption was available.
    #[must_use]
    pub fn is_envelope(bytes: &[u8]) -> bool {
        bytes.len() >= ENVELOPE_HEADER_SIZE + TAG_SIZE
            && bytes[..ENVELOPE_MAGIC.len()] == ENVELOPE_MAGIC
            && bytes[ENVELOPE_MAGIC.len()] == ENVELOPE_VERSION
    }

    /// Returns the envelope as raw bytes for persistence.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the envelope, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn nonce(&self) -> &[u8] {
        &self.bytes[ENVELOPE_MAGIC.len() + 1..ENVELOPE_HEADER_SIZE]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.bytes[ENVELOPE_HEADER_SIZE..]
    }
}

/// Seals and opens envelopes with the device key.
///
/// # Availability
///
/// Construction runs a one-shot encrypt/decrypt self-test; callers must
/// check [`EncryptedStore::is_available`] before assuming a write was
/// encrypted. When the probe fails, callers degrade to plaintext and record
/// that via the `is_encrypted = false` flag on the stored record.
pub struct EncryptedStore {
    cipher: Aes256Gcm,
    available: bool,
}

impl EncryptedStore {
    /// Creates a store with the given key and runs the availability probe.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        let cipher = Aes256Gcm::new(key_array);
        let mut store = Self {
            cipher,
            available: false,
        };
        store.available = store.self_test();
        store
    }

    /// One-shot round-trip against the cipher to confirm the platform
    /// primitives actually work.
    fn self_test(&self) -> bool {
        let probe = b"offsign-probe";
        match self.seal(probe) {
            Ok(envelope) => self
                .open(&envelope)
                .map(|plain| plain == probe)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Returns true if encryption is usable on this device.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available
    }

    fn seal(&self, plaintext: &[u8]) -> CoreResult<EncryptedEnvelope> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CoreError::encryption("AEAD encryption error"))?;

        let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_SIZE + ciphertext.len());
        bytes.extend_from_slice(&ENVELOPE_MAGIC);
        bytes.push(ENVELOPE_VERSION);
        bytes.extend_from_slice(&nonce_bytes);
        bytes.extend(ciphertext);

        Ok(EncryptedEnvelope { bytes })
    }

    fn open(&self, envelope: &EncryptedEnvelope) -> CoreResult<Vec<u8>> {
        let nonce = Nonce::from_slice(envelope.nonce());
        self.cipher
            .decrypt(nonce, envelope.ciphertext())
            .map_err(|_| CoreError::decryption("authentication failed"))
    }

    /// Encrypts bytes into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption is unavailable or the AEAD operation
    /// fails.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> CoreResult<EncryptedEnvelope> {
        if !self.available {
            return Err(CoreError::encryption("encryption unavailable"));
        }
        self.seal(plaintext)
    }

    /// Decrypts an envelope back into bytes.
    ///
    /// # Errors
    ///
    /// Fails when the key is wrong, the authentication tag does not verify,
    /// or the envelope is malformed.
    pub fn decrypt_bytes(&self, envelope: &EncryptedEnvelope) -> CoreResult<Vec<u8>> {
        if !self.available {
            return Err(CoreError::decryption("encryption unavailable"));
        }
        self.open(envelope)
    }

    /// Encrypts a string. Convenience wrapper over [`Self::encrypt_bytes`].
    pub fn encrypt_string(&self, plaintext: &str) -> CoreResult<EncryptedEnvelope> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    /// Decrypts an envelope into a string.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::decrypt_bytes`], or if the plaintext is not valid
    /// UTF-8.
    pub fn decrypt_string(&self, envelope: &EncryptedEnvelope) -> CoreResult<String> {
        let bytes = self.decrypt_bytes(envelope)?;
        String::from_utf8(bytes).map_err(|_| CoreError::decryption("plaintext is not UTF-8"))
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("cipher", &"Aes256Gcm")
            .field("available", &self.available)
            .finish()
    }
}
