//! Closed error taxonomy shared by every layer of the gate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure of a gated cipher operation.
///
/// Every low-level failure (key store, AEAD, codec, sensor) is mapped into one
/// of these variants at the component that observed it. Callers branch on
/// [`GateError::kind`]; the message is advisory and safe to display.
#[derive(Debug, Error)]
pub enum GateError {
    /// The key store could not produce a usable key (e.g. secure hardware absent).
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// No key with the requested name exists.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Biometric enrollment changed and the key can never be used again.
    #[error("key permanently invalidated: {0}")]
    KeyPermanentlyInvalidated(String),

    /// The initialisation vector does not match what the cipher requires.
    #[error("invalid iv: {0}")]
    InvalidIv(String),

    /// Cipher finalisation failed (tag mismatch, wrong key, undecodable output).
    #[error("crypto operation failed: {0}")]
    CryptoOperationFailed(String),

    /// The transport string is not `<data>.<iv>` in base64url.
    #[error("malformed transport string: {0}")]
    MalformedTransportString(String),

    /// Finalisation was attempted without a matching authentication.
    #[error("user not authenticated: {0}")]
    UserNotAuthenticated(String),

    /// The authenticator reported a hardware, lockout, or availability error.
    #[error("sensor error: {0}")]
    SensorError(String),

    /// The operation was cancelled before producing a terminal result.
    #[error("operation cancelled")]
    Cancelled,
}

/// Field-less discriminant of [`GateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    KeyUnavailable,
    KeyNotFound,
    KeyPermanentlyInvalidated,
    InvalidIv,
    CryptoOperationFailed,
    MalformedTransportString,
    UserNotAuthenticated,
    SensorError,
    Cancelled,
}

impl ErrorKind {
    /// Short machine-readable code, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::KeyUnavailable => "key_unavailable",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::KeyPermanentlyInvalidated => "key_permanently_invalidated",
            ErrorKind::InvalidIv => "invalid_iv",
            ErrorKind::CryptoOperationFailed => "crypto_operation_failed",
            ErrorKind::MalformedTransportString => "malformed_transport_string",
            ErrorKind::UserNotAuthenticated => "user_not_authenticated",
            ErrorKind::SensorError => "sensor_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GateError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            GateError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            GateError::KeyPermanentlyInvalidated(_) => ErrorKind::KeyPermanentlyInvalidated,
            GateError::InvalidIv(_) => ErrorKind::InvalidIv,
            GateError::CryptoOperationFailed(_) => ErrorKind::CryptoOperationFailed,
            GateError::MalformedTransportString(_) => ErrorKind::MalformedTransportString,
            GateError::UserNotAuthenticated(_) => ErrorKind::UserNotAuthenticated,
            GateError::SensorError(_) => ErrorKind::SensorError,
            GateError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// The human-readable detail, if the variant carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            GateError::KeyUnavailable(m)
            | GateError::KeyNotFound(m)
            | GateError::KeyPermanentlyInvalidated(m)
            | GateError::InvalidIv(m)
            | GateError::CryptoOperationFailed(m)
            | GateError::MalformedTransportString(m)
            | GateError::UserNotAuthenticated(m)
            | GateError::SensorError(m) => Some(m.as_str()),
            GateError::Cancelled => None,
        }
    }
}
