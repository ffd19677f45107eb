//! AES-256-GCM-SIV sealing and opening of a single payload.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is authenticated and
//! nonce-misuse-resistant. The 96-bit nonce plays the role of the IV in the
//! transport string; tampering or a wrong key is detected at open time.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Errors produced by the AEAD primitive.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The nonce is the wrong length (must be [`NONCE_LEN`] bytes).
    #[error("invalid nonce length: expected {NONCE_LEN} bytes, got {0}")]
    InvalidNonceLength(usize),

    /// AES-GCM-SIV sealing or opening failed.
    #[error("aead operation failed")]
    AeadFailure,
}

/// Generate a fresh random nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Copy a nonce slice into a fixed-size array.
///
/// # Errors
///
/// Returns [`CipherError::InvalidNonceLength`] unless `bytes` is exactly [`NONCE_LEN`] long.
pub fn nonce_from_slice(bytes: &[u8]) -> Result<[u8; NONCE_LEN], CipherError> {
    <[u8; NONCE_LEN]>::try_from(bytes).map_err(|_| CipherError::InvalidNonceLength(bytes.len()))
}

/// Seal `plaintext` under `key` with the given nonce.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], key: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CipherError::AeadFailure)
}

/// Open `ciphertext` (ciphertext + tag) under `key` with the given nonce.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] if authentication fails (wrong key or tampered data).
pub fn open(
    ciphertext: &[u8],
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}
