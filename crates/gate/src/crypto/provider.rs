//! Cipher lifecycle: prepare a cipher bound to a named key, then finalise it
//! once authentication has succeeded.
//!
//! This is the only place key-store and AEAD failures are translated into
//! [`GateError`]. Nothing is retried here; every failure ends the operation.

use std::sync::Arc;

use common::{GateError, Mode};
use tracing::{debug, info, warn};

use super::cipher::{self, CipherError, NONCE_LEN};
use crate::challenge::ChallengeId;
use crate::keystore::{KeyHandle, KeyStore, KeyStoreError};

/// A cipher initialised for one direction under one key.
///
/// Holds a key reference and the IV, never key material. Finalisation is
/// refused until the owning challenge has been authorised.
pub struct PreparedCipher {
    id: ChallengeId,
    mode: Mode,
    key: KeyHandle,
    iv: [u8; NONCE_LEN],
    authenticated: bool,
}

impl PreparedCipher {
    pub fn id(&self) -> ChallengeId {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn key_name(&self) -> &str {
        &self.key.name
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }
}

impl std::fmt::Debug for PreparedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCipher")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("key", &self.key.name)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

/// Bytes produced by [`CipherLifecycleProvider::finalize_operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherOutput {
    /// Ciphertext after encryption, plaintext after decryption.
    pub data: Vec<u8>,
    /// The IV the ciphertext was sealed with; present only for encryption.
    pub iv: Option<Vec<u8>>,
}

/// Creates ciphers bound to keys in a [`KeyStore`] and runs their finalisation.
#[derive(Clone)]
pub struct CipherLifecycleProvider {
    store: Arc<dyn KeyStore>,
}

impl CipherLifecycleProvider {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Prepare an encryption cipher, generating the key if it does not exist.
    ///
    /// A fresh random IV is chosen here and returned by finalisation.
    ///
    /// # Errors
    ///
    /// [`GateError::KeyUnavailable`] if the store cannot produce a key,
    /// [`GateError::KeyPermanentlyInvalidated`] if the existing key was revoked
    /// (the key is deleted so the next attempt generates a new one).
    pub fn prepare_for_encryption(
        &self,
        key_name: &str,
        invalidated_by_enrollment: bool,
    ) -> Result<PreparedCipher, GateError> {
        let key = self
            .store
            .get_or_create_key(key_name, invalidated_by_enrollment)
            .map_err(|e| self.map_prepare_error(e, None))?;
        self.check_usable(&key)?;

        let cipher = PreparedCipher {
            id: ChallengeId::new(),
            mode: Mode::Encrypt,
            key,
            iv: cipher::generate_nonce(),
            authenticated: false,
        };
        debug!(challenge = %cipher.id, key = key_name, "cipher prepared for encryption");
        Ok(cipher)
    }

    /// Prepare a decryption cipher for an existing key and a caller-supplied IV.
    ///
    /// # Errors
    ///
    /// [`GateError::InvalidIv`] if `iv` is not exactly [`NONCE_LEN`] bytes (checked
    /// before the key store is consulted), [`GateError::KeyNotFound`] if no such
    /// key exists, [`GateError::KeyUnavailable`] or
    /// [`GateError::KeyPermanentlyInvalidated`] as for encryption.
    pub fn prepare_for_decryption(
        &self,
        key_name: &str,
        iv: &[u8],
    ) -> Result<PreparedCipher, GateError> {
        let iv = cipher::nonce_from_slice(iv).map_err(|e| GateError::InvalidIv(e.to_string()))?;
        let key = self
            .store
            .retrieve_key(key_name)
            .map_err(|e| self.map_prepare_error(e, None))?;
        self.check_usable(&key)?;

        let cipher = PreparedCipher {
            id: ChallengeId::new(),
            mode: Mode::Decrypt,
            key,
            iv,
            authenticated: false,
        };
        debug!(challenge = %cipher.id, key = key_name, "cipher prepared for decryption");
        Ok(cipher)
    }

    /// Run the cipher over `input`. The only point where integrity errors surface.
    ///
    /// # Errors
    ///
    /// [`GateError::UserNotAuthenticated`] if the cipher was never authorised,
    /// [`GateError::KeyPermanentlyInvalidated`] if the key became unusable after
    /// preparation, [`GateError::CryptoOperationFailed`] on tag mismatch or any
    /// other finalisation failure.
    pub fn finalize_operation(
        &self,
        cipher: PreparedCipher,
        input: &[u8],
    ) -> Result<CipherOutput, GateError> {
        if !cipher.authenticated {
            return Err(GateError::UserNotAuthenticated(format!(
                "challenge {} was not authorised",
                cipher.id
            )));
        }

        let key = self
            .store
            .unlock(&cipher.key)
            .map_err(|e| self.map_finalize_error(e, &cipher.key))?;

        let output = match cipher.mode {
            Mode::Encrypt => cipher::seal(input, &key.0[..], &cipher.iv).map(|data| CipherOutput {
                data,
                iv: Some(cipher.iv.to_vec()),
            }),
            Mode::Decrypt => cipher::open(input, &key.0[..], &cipher.iv)
                .map(|data| CipherOutput { data, iv: None }),
        }
        .map_err(map_cipher_error)?;

        info!(
            challenge = %cipher.id,
            mode = %cipher.mode,
            key = %cipher.key.name,
            "cipher finalised"
        );
        Ok(output)
    }

    /// Init-time policy check, mirroring what a platform cipher does on init.
    fn check_usable(&self, key: &KeyHandle) -> Result<(), GateError> {
        self.store
            .unlock(key)
            .map(drop)
            .map_err(|e| self.map_prepare_error(e, Some(key)))
    }

    fn map_prepare_error(&self, err: KeyStoreError, key: Option<&KeyHandle>) -> GateError {
        match err {
            KeyStoreError::Unavailable(m) => GateError::KeyUnavailable(m),
            KeyStoreError::NotFound(name) => GateError::KeyNotFound(name),
            KeyStoreError::PermanentlyInvalidated(name) => {
                if let Some(key) = key {
                    self.discard(key);
                }
                GateError::KeyPermanentlyInvalidated(format!(
                    "key {name:?} was invalidated by a biometric enrollment change"
                ))
            }
        }
    }

    fn map_finalize_error(&self, err: KeyStoreError, key: &KeyHandle) -> GateError {
        match err {
            KeyStoreError::Unavailable(m) => GateError::KeyUnavailable(m),
            KeyStoreError::NotFound(name) => GateError::KeyPermanentlyInvalidated(format!(
                "key {name:?} was removed before the operation completed"
            )),
            KeyStoreError::PermanentlyInvalidated(name) => {
                self.discard(key);
                GateError::KeyPermanentlyInvalidated(format!(
                    "key {name:?} was invalidated before the operation completed"
                ))
            }
        }
    }

    /// Delete a revoked key, unless the name already refers to a newer key.
    fn discard(&self, key: &KeyHandle) {
        match self.store.delete_key(key) {
            Ok(true) => info!(key = %key.name, "deleted permanently invalidated key"),
            Ok(false) => debug!(key = %key.name, "invalidated key already replaced or removed"),
            Err(e) => warn!(key = %key.name, error = %e, "failed to delete invalidated key"),
        }
    }
}

impl std::fmt::Debug for CipherLifecycleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherLifecycleProvider").finish_non_exhaustive()
    }
}

fn map_cipher_error(err: CipherError) -> GateError {
    match err {
        CipherError::InvalidNonceLength(_) => GateError::InvalidIv(err.to_string()),
        CipherError::AeadFailure => {
            GateError::CryptoOperationFailed("authentication tag mismatch".into())
        }
        CipherError::InvalidKeyLength => GateError::CryptoOperationFailed(err.to_string()),
    }
}
