//! [`SoftwareKeyStore`]: in-memory key store with enrollment-bound keys.
//!
//! Keys created with `invalidated_by_enrollment` carry an HMAC-SHA256 tag
//! (keyed by the key itself) over a SHA-256 digest of the enrolled biometric
//! ids. Any change to the enrolled set makes the tag stop verifying, which is
//! reported as permanent invalidation.
//!
//! Both maps use `arc-swap` so lookups on the cipher path never block.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use arc_swap::ArcSwap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{KeyBytes, KeyHandle, KeyStore, KeyStoreError};
use crate::crypto::cipher::KEY_LEN;

type HmacSha256 = Hmac<Sha256>;

/// A stored key plus its optional enrollment binding.
#[derive(Clone)]
struct StoredKey {
    material: KeyBytes,
    generation: u64,
    enrollment_binding: Option<[u8; 32]>,
}

/// Thread-safe in-memory [`KeyStore`].
///
/// Cheap to clone; clones share the same keys and enrollment state.
#[derive(Clone)]
pub struct SoftwareKeyStore {
    keys: Arc<ArcSwap<HashMap<String, StoredKey>>>,
    enrollments: Arc<ArcSwap<BTreeSet<String>>>,
    hardware_available: Arc<AtomicBool>,
    next_generation: Arc<AtomicU64>,
}

impl SoftwareKeyStore {
    /// Create an empty store with secure hardware available and no enrollments.
    pub fn new() -> Self {
        Self {
            keys: Arc::new(ArcSwap::new(Arc::new(HashMap::new()))),
            enrollments: Arc::new(ArcSwap::new(Arc::new(BTreeSet::new()))),
            hardware_available: Arc::new(AtomicBool::new(true)),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a store with the given enrolled biometric ids.
    pub fn with_enrollments<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.set_enrollments(ids);
        store
    }

    /// Atomically replace the enrolled biometric set.
    ///
    /// Every enrollment-bound key created under a different set becomes
    /// permanently invalid.
    pub fn set_enrollments<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        info!(count = set.len(), "biometric enrollments replaced");
        self.enrollments.store(Arc::new(set));
    }

    /// Simulate presence or absence of secure key hardware.
    pub fn set_hardware_available(&self, available: bool) {
        self.hardware_available.store(available, Ordering::SeqCst);
    }

    /// Returns `true` if a key named `name` is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.keys.load().contains_key(name)
    }

    /// Return the number of keys currently stored.
    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    /// Return `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.load().is_empty()
    }

    fn ensure_hardware(&self) -> Result<(), KeyStoreError> {
        if self.hardware_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KeyStoreError::Unavailable(
                "secure key hardware not present".into(),
            ))
        }
    }

    fn enrollment_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for id in self.enrollments.load().iter() {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }

    fn binding_mac(material: &KeyBytes, digest: &[u8; 32]) -> Result<HmacSha256, KeyStoreError> {
        let mut mac = HmacSha256::new_from_slice(&material.0[..])
            .map_err(|e| KeyStoreError::Unavailable(format!("hmac init: {e}")))?;
        mac.update(digest);
        Ok(mac)
    }

    fn generate(&self, invalidated_by_enrollment: bool) -> Result<StoredKey, KeyStoreError> {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        let material = KeyBytes(buf);

        let enrollment_binding = if invalidated_by_enrollment {
            let digest = self.enrollment_digest();
            let tag = Self::binding_mac(&material, &digest)?.finalize().into_bytes();
            Some(tag.into())
        } else {
            None
        };

        Ok(StoredKey {
            material,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            enrollment_binding,
        })
    }
}

impl Default for SoftwareKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftwareKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyStore")
            .field("keys", &self.len())
            .field("enrollments", &self.enrollments.load().len())
            .field(
                "hardware_available",
                &self.hardware_available.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl KeyStore for SoftwareKeyStore {
    fn get_or_create_key(
        &self,
        name: &str,
        invalidated_by_enrollment: bool,
    ) -> Result<KeyHandle, KeyStoreError> {
        self.ensure_hardware()?;
        if name.trim().is_empty() {
            return Err(KeyStoreError::Unavailable("key name must not be empty".into()));
        }

        if !self.contains(name) {
            let fresh = self.generate(invalidated_by_enrollment)?;
            self.keys.rcu(|current| {
                let mut next = (**current).clone();
                next.entry(name.to_owned()).or_insert_with(|| fresh.clone());
                next
            });
            info!(key = name, invalidated_by_enrollment, "generated key");
        }

        self.retrieve_key(name)
    }

    fn retrieve_key(&self, name: &str) -> Result<KeyHandle, KeyStoreError> {
        self.ensure_hardware()?;
        self.keys
            .load()
            .get(name)
            .map(|stored| KeyHandle {
                name: name.to_owned(),
                generation: stored.generation,
            })
            .ok_or_else(|| KeyStoreError::NotFound(name.to_owned()))
    }

    fn unlock(&self, handle: &KeyHandle) -> Result<KeyBytes, KeyStoreError> {
        self.ensure_hardware()?;
        let keys = self.keys.load();
        let stored = keys
            .get(&handle.name)
            .ok_or_else(|| KeyStoreError::NotFound(handle.name.clone()))?;

        if stored.generation != handle.generation {
            return Err(KeyStoreError::PermanentlyInvalidated(handle.name.clone()));
        }

        if let Some(tag) = &stored.enrollment_binding {
            let digest = self.enrollment_digest();
            Self::binding_mac(&stored.material, &digest)?
                .verify_slice(tag)
                .map_err(|_| KeyStoreError::PermanentlyInvalidated(handle.name.clone()))?;
        }

        Ok(stored.material.clone())
    }

    fn delete_key(&self, handle: &KeyHandle) -> Result<bool, KeyStoreError> {
        self.ensure_hardware()?;
        let mut removed = false;
        self.keys.rcu(|current| {
            let mut next = (**current).clone();
            removed = next
                .get(&handle.name)
                .is_some_and(|stored| stored.generation == handle.generation);
            if removed {
                next.remove(&handle.name);
            }
            next
        });
        debug!(key = %handle.name, generation = handle.generation, removed, "delete key");
        Ok(removed)
    }
}
