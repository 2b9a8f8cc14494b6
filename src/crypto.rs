//! Payload and header sealing.
//!
//! Sealed layout: `[nonce 12 bytes][ciphertext||tag]`.

use crate::error::{PakError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::Sha256;

/// PBKDF2 rounds for passphrase-derived keys
pub const KEY_DERIVATION_ROUNDS: u32 = 10_000;

/// Size of the salt stored in the archive header
pub const SALT_SIZE: usize = 16;

/// Bytes added to a payload by sealing (nonce + tag)
pub const SEAL_OVERHEAD: usize = 12 + 16;

/// Derive a 256-bit key from a passphrase and the archive salt
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_SIZE]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KEY_DERIVATION_ROUNDS, &mut key);
    key
}

/// Generate a fresh archive salt
pub fn random_salt() -> [u8; SALT_SIZE] {
    rand::random()
}

/// Encrypt `data` under `key` with a random nonce
pub fn seal(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let nonce_bytes: [u8; 12] = rand::random();
    #[allow(deprecated)]
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let ciphertext_with_tag = cipher
        .encrypt(nonce, data)
        .map_err(|_| PakError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(SEAL_OVERHEAD + data.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext_with_tag);
    Ok(sealed)
}

/// Decrypt a payload produced by [`seal`]
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(PakError::DecryptionFailed);
    }
    #[allow(deprecated)]
    let nonce = Nonce::from_slice(&sealed[0..12]);
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(nonce, &sealed[12..])
        .map_err(|_| PakError::DecryptionFailed)
}

/// Keys a container may hold for its encrypted entries
#[derive(Clone, Default)]
pub struct KeySet {
    pub data: Option<[u8; 32]>,
    pub editor: Option<[u8; 32]>,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("data", &self.data.is_some())
            .field("editor", &self.editor.is_some())
            .finish()
    }
}

impl KeySet {
    /// Derive keys from passphrases against an archive salt
    pub fn derive(
        passphrase: Option<&str>,
        editor_passphrase: Option<&str>,
        salt: &[u8; SALT_SIZE],
    ) -> Self {
        Self {
            data: passphrase.map(|p| derive_key(p, salt)),
            editor: editor_passphrase.map(|p| derive_key(p, salt)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.editor.is_none()
    }

    pub fn data_key(&self, what: &str) -> Result<&[u8; 32]> {
        self.data
            .as_ref()
            .ok_or_else(|| PakError::MissingKey(what.to_string()))
    }

    pub fn editor_key(&self, what: &str) -> Result<&[u8; 32]> {
        self.editor
            .as_ref()
            .ok_or_else(|| PakError::MissingKey(what.to_string()))
    }
}
