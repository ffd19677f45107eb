//! Authenticator capability: the external biometric sensor as seen by the gate.
//!
//! The sensor driver, its dialog, and its retry/lockout policy are external.
//! The gate only checks [`Authenticator::availability`] and registers a
//! challenge, then reacts to whatever [`AuthenticationEvent`]s arrive.

pub mod scripted;

pub use scripted::{ScriptStep, ScriptedAuthenticator};

use tokio::sync::mpsc;

use crate::challenge::ChallengeId;

/// Receiving half of one registration's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<AuthenticationEvent>;

/// Whether the sensor can take part in an operation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    HardwareUnavailable,
    NoEnrollments,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Ready => f.write_str("sensor ready"),
            Availability::HardwareUnavailable => f.write_str("biometric hardware unavailable"),
            Availability::NoEnrollments => f.write_str("no biometrics enrolled"),
        }
    }
}

/// Hard error class reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    HardwareUnavailable,
    Timeout,
    /// Too many attempts; temporarily locked.
    Lockout,
    /// Too many attempts; locked until strong re-authentication.
    PermanentLockout,
    /// The platform or user dismissed the prompt.
    Canceled,
    /// Vendor-specific error code.
    Vendor(i32),
}

impl std::fmt::Display for SensorFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorFault::HardwareUnavailable => f.write_str("hardware unavailable"),
            SensorFault::Timeout => f.write_str("timeout"),
            SensorFault::Lockout => f.write_str("lockout"),
            SensorFault::PermanentLockout => f.write_str("permanent lockout"),
            SensorFault::Canceled => f.write_str("canceled"),
            SensorFault::Vendor(code) => write!(f, "vendor error {code}"),
        }
    }
}

/// One event delivered by the authenticator for a registered challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationEvent {
    /// A biometric matched; `challenge` names the cipher it unlocks.
    Succeeded { challenge: ChallengeId },
    /// Recoverable advice for the user (e.g. "move finger").
    Help { code: i32, text: String },
    /// A biometric was read but did not match.
    Failed,
    /// Unrecoverable sensor error; ends the operation.
    Error {
        fault: SensorFault,
        message: Option<String>,
    },
}

/// Capability interface of a biometric authenticator.
pub trait Authenticator: Send + Sync {
    /// Checked once per operation, before any cipher is prepared.
    fn availability(&self) -> Availability {
        Availability::Ready
    }

    /// Start listening for a biometric bound to `challenge`.
    ///
    /// The returned stream ends when the authenticator gives up; dropping the
    /// receiver tells the authenticator the challenge was released.
    fn register(&self, challenge: ChallengeId) -> EventReceiver;
}
