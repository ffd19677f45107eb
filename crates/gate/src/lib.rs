//! Biometric-gated cipher bridge.
//!
//! A request to encrypt or decrypt is held behind a biometric authentication:
//! the cipher is prepared against a named key, paired with a challenge, and
//! only run once the authenticator reports a match for that challenge.
//!
//! - [`keystore`]: named AES keys, enrollment-bound invalidation.
//! - [`crypto`]: AEAD primitive, cipher lifecycle provider, transport codec.
//! - [`auth`]: authenticator capability and a scripted simulated sensor.
//! - [`bridge`]: the state machine, result channel, and operation stream.

pub mod auth;
pub mod bridge;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod keystore;
pub mod telemetry;

pub use bridge::{AuthenticationBridge, CancelHandle, CipherOperation};
pub use common::{AuthStatus, CipherRequest, ErrorKind, GateError, Mode, ResultEnvelope};
