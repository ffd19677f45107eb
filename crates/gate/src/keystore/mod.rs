//! Key store capability: named AES keys whose usability can be revoked.
//!
//! The platform key store is an external collaborator. The gate consumes it
//! only through [`KeyStore`]; [`SoftwareKeyStore`] is an in-process rendition
//! with the same observable policy (hardware availability, enrollment-bound
//! invalidation).
//!
//! # Security invariants
//!
//! - Key material is **never** logged or included in traces.
//! - [`KeyBytes`] zeroes itself on drop and redacts itself in `Debug`.

pub mod software;

pub use software::SoftwareKeyStore;

use thiserror::Error;

use crate::crypto::cipher::KEY_LEN;

/// Errors reported by a [`KeyStore`] implementation.
///
/// These never leave the crypto layer; the cipher lifecycle provider maps
/// them into `GateError`.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The store cannot produce keys right now (e.g. no secure hardware).
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    /// No key exists under the requested name.
    #[error("no key named {0:?}")]
    NotFound(String),

    /// The key exists but can never be used again.
    #[error("key {0:?} permanently invalidated")]
    PermanentlyInvalidated(String),
}

/// Reference to a key held by a [`KeyStore`].
///
/// Carries no key material. `generation` distinguishes a key from a later key
/// created under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub name: String,
    pub generation: u64,
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct KeyBytes(pub Box<[u8; KEY_LEN]>);

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// Storage and policy engine for named cipher keys.
#[cfg_attr(test, mockall::automock)]
pub trait KeyStore: Send + Sync {
    /// Return the key named `name`, generating it first if absent.
    ///
    /// `invalidated_by_enrollment` only applies when a new key is generated.
    fn get_or_create_key(
        &self,
        name: &str,
        invalidated_by_enrollment: bool,
    ) -> Result<KeyHandle, KeyStoreError>;

    /// Return the existing key named `name`.
    fn retrieve_key(&self, name: &str) -> Result<KeyHandle, KeyStoreError>;

    /// Release the key material behind `handle`, enforcing the key's policy.
    fn unlock(&self, handle: &KeyHandle) -> Result<KeyBytes, KeyStoreError>;

    /// Remove the key behind `handle` if the name still refers to that
    /// generation. Returns whether a key was removed; an absent or newer key is
    /// left alone and is not an error.
    fn delete_key(&self, handle: &KeyHandle) -> Result<bool, KeyStoreError>;
}
