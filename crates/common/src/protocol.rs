//! Request and result types exchanged between the caller and the gate.
//!
//! Envelopes and failure reports serialise as JSON so any front end (the
//! self-test binary, a host application bridge) can relay them verbatim.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, GateError};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Direction of the gated cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Encrypt => f.write_str("encrypt"),
            Mode::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// One gated encryption or decryption request. Immutable once built.
///
/// For [`Mode::Encrypt`] the payload is the plaintext. For [`Mode::Decrypt`]
/// it is a transport string previously produced by an encryption.
#[derive(Debug, Clone)]
pub struct CipherRequest {
    mode: Mode,
    key_name: String,
    payload: Bytes,
    key_invalidated_by_enrollment: bool,
}

impl CipherRequest {
    /// Request encryption of `plaintext` under the key named `key_name`.
    ///
    /// The key is invalidated by biometric enrollment changes unless
    /// [`CipherRequest::invalidated_by_enrollment`] says otherwise.
    pub fn encrypt(key_name: impl Into<String>, plaintext: impl Into<Bytes>) -> Self {
        Self {
            mode: Mode::Encrypt,
            key_name: key_name.into(),
            payload: plaintext.into(),
            key_invalidated_by_enrollment: true,
        }
    }

    /// Request decryption of a transport string under the key named `key_name`.
    pub fn decrypt(key_name: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            mode: Mode::Decrypt,
            key_name: key_name.into(),
            payload: Bytes::from(transport.into()),
            key_invalidated_by_enrollment: true,
        }
    }

    /// Set whether a newly created key is revoked when enrollments change.
    pub fn invalidated_by_enrollment(mut self, invalidated: bool) -> Self {
        self.key_invalidated_by_enrollment = invalidated;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn key_invalidated_by_enrollment(&self) -> bool {
        self.key_invalidated_by_enrollment
    }
}

// ---------------------------------------------------------------------------
// Result envelope
// ---------------------------------------------------------------------------

/// Status carried by a [`ResultEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Authentication succeeded and the cipher ran. Terminal.
    Authenticated,
    /// The sensor asked the user to adjust. Progress only.
    Help,
    /// A biometric was presented but not recognised. Progress only.
    Failed,
}

/// One emission of a gated operation.
///
/// `payload` is the transport string after encryption and the recovered
/// plaintext after decryption. `message` carries help text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: AuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ResultEnvelope {
    pub fn authenticated(payload: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Authenticated,
            message: None,
            payload: Some(payload.into()),
        }
    }

    pub fn help(message: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Help,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: AuthStatus::Failed,
            message: None,
            payload: None,
        }
    }

    /// `true` for the success envelope that ends an operation.
    pub fn is_terminal(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }
}

// ---------------------------------------------------------------------------
// Failure report
// ---------------------------------------------------------------------------

/// Serialisable rendering of a terminal [`GateError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&GateError> for FailureReport {
    fn from(err: &GateError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().map(str::to_owned),
        }
    }
}
