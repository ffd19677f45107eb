//! Common request, envelope, and error types shared across the gate crates.

pub mod error;
pub mod protocol;

pub use error::{ErrorKind, GateError};
pub use protocol::{AuthStatus, CipherRequest, FailureReport, Mode, ResultEnvelope};
