//! `gate`: self-test binary.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline.
//! 3. Build a software key store with the configured enrollments and a
//!    simulated sensor that matches immediately.
//! 4. Encrypt the self-test payload, decrypt the result, and print every
//!    emission as a JSON line on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{error, info};

use common::{CipherRequest, FailureReport, ResultEnvelope};
use gate::auth::ScriptedAuthenticator;
use gate::config::Config;
use gate::crypto::CipherLifecycleProvider;
use gate::keystore::SoftwareKeyStore;
use gate::{telemetry, AuthenticationBridge};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otlp_endpoint(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        key = %cfg.key_name,
        "gate self-test starting"
    );

    // -----------------------------------------------------------------------
    // 3. Key store + simulated sensor
    // -----------------------------------------------------------------------
    let store = SoftwareKeyStore::with_enrollments(cfg.enrollment_ids());
    let bridge = AuthenticationBridge::new(
        CipherLifecycleProvider::new(Arc::new(store)),
        Arc::new(ScriptedAuthenticator::succeeding()),
    );

    // -----------------------------------------------------------------------
    // 4. Round trip
    // -----------------------------------------------------------------------
    let encrypt = CipherRequest::encrypt(cfg.key_name.clone(), cfg.self_test_payload.clone())
        .invalidated_by_enrollment(cfg.key_invalidated_by_enrollment);
    let sealed = run(&bridge, encrypt).await?;
    let transport = sealed
        .payload
        .context("encryption succeeded without a transport string")?;

    let opened = run(&bridge, CipherRequest::decrypt(cfg.key_name.clone(), transport)).await?;
    if opened.payload.as_deref() != Some(cfg.self_test_payload.as_str()) {
        error!("decrypted payload does not match the original");
        anyhow::bail!("self-test round trip mismatch");
    }

    info!("gate self-test passed");
    Ok(())
}

/// Print every emission of one operation and return its success envelope.
async fn run(bridge: &AuthenticationBridge, request: CipherRequest) -> Result<ResultEnvelope> {
    let mode = request.mode();
    let mut op = bridge.execute(request);

    while let Some(outcome) = op.next().await {
        match outcome {
            Ok(envelope) => {
                println!("{}", serde_json::to_string(&envelope)?);
                if envelope.is_terminal() {
                    return Ok(envelope);
                }
            }
            Err(err) => {
                println!("{}", serde_json::to_string(&FailureReport::from(&err))?);
                return Err(err).with_context(|| format!("{mode} failed"));
            }
        }
    }

    anyhow::bail!("{mode} ended without a result")
}
