//! Per-operation binding between a prepared cipher and the authenticator.

use tracing::debug;
use uuid::Uuid;

use crate::crypto::provider::PreparedCipher;

/// Identity of one [`Challenge`]. Authenticators echo it back on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChallengeId(Uuid);

impl ChallengeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChallengeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Exclusive owner of a prepared cipher until authentication succeeds.
///
/// Consumed exactly once by [`Challenge::authorize`]; dropping it on any other
/// path releases the cipher and its key material.
#[derive(Debug)]
pub struct Challenge {
    id: ChallengeId,
    cipher: Option<PreparedCipher>,
}

impl Challenge {
    pub fn new(cipher: PreparedCipher) -> Self {
        let id = cipher.id();
        debug!(challenge = %id, mode = %cipher.mode(), "challenge created");
        Self {
            id,
            cipher: Some(cipher),
        }
    }

    pub fn id(&self) -> ChallengeId {
        self.id
    }

    /// Hand the cipher over for finalisation after a matching authentication.
    pub fn authorize(mut self) -> Option<PreparedCipher> {
        let mut cipher = self.cipher.take()?;
        cipher.mark_authenticated();
        Some(cipher)
    }
}

impl Drop for Challenge {
    fn drop(&mut self) {
        if self.cipher.is_some() {
            debug!(challenge = %self.id, "challenge released without authentication");
        }
    }
}
