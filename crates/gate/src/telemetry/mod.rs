//! Tracing setup: structured JSON logs, plus optional OTLP span export.
//!
//! # Telemetry invariants
//!
//! - **No payload, IV, or key material** may appear in any span attribute or
//!   log field. Key names, modes, and challenge ids are fine.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::init_telemetry;
