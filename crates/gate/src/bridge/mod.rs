//! Authentication bridge: couples an authenticator to a prepared cipher.
//!
//! # Lifecycle of one operation
//!
//! 1. The caller gets a [`CipherOperation`] from [`AuthenticationBridge::execute`];
//!    nothing happens until it is polled.
//! 2. The driver checks sensor availability, decodes the transport string
//!    (decryption only), and prepares the cipher. Any failure is terminal and
//!    the authenticator is never engaged.
//! 3. The challenge is registered; the driver then sleeps until an event,
//!    a finalize completion, or cancellation arrives.
//! 4. A success naming this challenge moves the cipher onto a blocking worker
//!    for finalisation; its result is the terminal emission.
//!
//! # Invariants
//!
//! - At most one terminal item per operation, always last.
//! - After cancellation nothing further reaches the caller.
//! - The challenge, event stream, and cipher are released on every exit path.
//! - No payload, IV, or key material appears in any log field.

pub mod channel;
pub mod operation;
pub mod state;

pub use channel::{ChannelError, Outcome, ResultChannel};
pub use operation::{CancelHandle, CipherOperation};
pub use state::{apply, BridgeState, Effect, Input};

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use common::{CipherRequest, GateError, Mode, ResultEnvelope};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::auth::{Authenticator, Availability, AuthenticationEvent, EventReceiver};
use crate::challenge::Challenge;
use crate::crypto::codec;
use crate::crypto::provider::{CipherLifecycleProvider, PreparedCipher};

/// Entry point for gated cipher operations.
///
/// Cheap to clone; every clone shares the same key store and authenticator.
#[derive(Clone)]
pub struct AuthenticationBridge {
    provider: Arc<CipherLifecycleProvider>,
    authenticator: Arc<dyn Authenticator>,
}

impl AuthenticationBridge {
    pub fn new(provider: CipherLifecycleProvider, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            provider: Arc::new(provider),
            authenticator,
        }
    }

    /// Build the operation for `request`. It starts on first poll.
    pub fn execute(&self, request: CipherRequest) -> CipherOperation {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let span = info_span!(
            "cipher_operation",
            mode = %request.mode(),
            key = %request.key_name(),
        );
        let driver = Driver {
            provider: Arc::clone(&self.provider),
            authenticator: Arc::clone(&self.authenticator),
            channel: ResultChannel::new(tx, cancel.clone()),
            cancel: cancel.clone(),
            request,
        };
        CipherOperation::new(Box::pin(driver.run().instrument(span)), rx, cancel)
    }
}

impl std::fmt::Debug for AuthenticationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationBridge").finish_non_exhaustive()
    }
}

/// Resources held while an operation is live.
#[derive(Default)]
struct Held {
    challenge: Option<Challenge>,
    input: Option<Bytes>,
    events: Option<EventReceiver>,
    finalize: Option<JoinHandle<Outcome>>,
}

impl Held {
    fn release(&mut self) {
        self.challenge = None;
        self.input = None;
        self.events = None;
        if let Some(task) = self.finalize.take() {
            task.abort();
        }
    }
}

struct Driver {
    provider: Arc<CipherLifecycleProvider>,
    authenticator: Arc<dyn Authenticator>,
    channel: ResultChannel,
    cancel: CancellationToken,
    request: CipherRequest,
}

impl Driver {
    async fn run(mut self) {
        let mut held = Held::default();
        let mut state = BridgeState::Idle;

        let first = if self.cancel.is_cancelled() {
            Input::Cancel
        } else {
            match self.prepare() {
                Ok((challenge, input)) => {
                    let id = challenge.id();
                    held.challenge = Some(challenge);
                    held.input = Some(input);
                    Input::Prepared(id)
                }
                Err(err) => Input::PrepareFailed(err),
            }
        };
        let mut pending = VecDeque::from([first]);

        while !state.is_terminal() {
            let input = match pending.pop_front() {
                Some(input) => input,
                None => self.next_input(&state, &mut held).await,
            };

            let (next, effects) = apply(state, input);
            if next != state {
                debug!(from = ?state, to = ?next, "bridge transition");
            }
            state = next;

            for effect in effects {
                match effect {
                    Effect::Register => {
                        if let Some(challenge) = &held.challenge {
                            held.events = Some(self.authenticator.register(challenge.id()));
                            pending.push_back(Input::Registered);
                        }
                    }
                    Effect::Finalize => match self.start_finalize(&mut held) {
                        Some(task) => held.finalize = Some(task),
                        None => {
                            let err = GateError::UserNotAuthenticated(
                                "no prepared cipher to finalise".into(),
                            );
                            pending.push_back(Input::Finalized(Err(err)));
                        }
                    },
                    Effect::Progress(envelope) => {
                        if let Err(e) = self.channel.progress(envelope) {
                            error!(error = %e, "progress emission rejected");
                        }
                    }
                    Effect::Terminate(outcome) => {
                        match &outcome {
                            Ok(_) => info!("operation authenticated"),
                            Err(err) => info!(kind = %err.kind(), "operation failed"),
                        }
                        if let Err(e) = self.channel.terminate(outcome) {
                            error!(error = %e, "terminal emission rejected");
                        }
                    }
                    Effect::Release => held.release(),
                }
            }
        }

        if state == BridgeState::Cancelled {
            info!("operation cancelled");
        }
        held.release();
    }

    /// Sensor availability, transport decoding, and cipher preparation.
    fn prepare(&self) -> Result<(Challenge, Bytes), GateError> {
        match self.authenticator.availability() {
            Availability::Ready => {}
            other => return Err(GateError::SensorError(other.to_string())),
        }

        let key_name = self.request.key_name();
        match self.request.mode() {
            Mode::Encrypt => {
                let invalidated = self.request.key_invalidated_by_enrollment();
                let cipher = self.provider.prepare_for_encryption(key_name, invalidated)?;
                Ok((Challenge::new(cipher), self.request.payload().clone()))
            }
            Mode::Decrypt => {
                let transport = std::str::from_utf8(self.request.payload()).map_err(|_| {
                    GateError::MalformedTransportString("payload is not valid UTF-8".into())
                })?;
                let decoded = codec::decode(transport)?;
                let cipher = self.provider.prepare_for_decryption(key_name, &decoded.iv)?;
                Ok((Challenge::new(cipher), Bytes::from(decoded.data)))
            }
        }
    }

    async fn next_input(&self, state: &BridgeState, held: &mut Held) -> Input {
        let awaiting = matches!(state, BridgeState::AwaitingAuthentication { .. });
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Input::Cancel,
            outcome = join_finalize(&mut held.finalize) => Input::Finalized(outcome),
            event = next_event(&mut held.events), if awaiting => match event {
                Some(event) => Input::Authentication(event),
                None => Input::AuthenticatorClosed,
            },
        }
    }

    fn start_finalize(&self, held: &mut Held) -> Option<JoinHandle<Outcome>> {
        let cipher = held.challenge.take()?.authorize()?;
        let input = held.input.take().unwrap_or_default();
        let provider = Arc::clone(&self.provider);
        let span = Span::current();
        debug!(challenge = %cipher.id(), "dispatching finalize to worker");
        Some(tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            complete(&provider, cipher, &input)
        }))
    }
}

/// Finalise the cipher and turn its output into the success envelope.
fn complete(provider: &CipherLifecycleProvider, cipher: PreparedCipher, input: &[u8]) -> Outcome {
    let mode = cipher.mode();
    let output = provider.finalize_operation(cipher, input)?;
    let payload = match mode {
        Mode::Encrypt => {
            let iv = output.iv.unwrap_or_default();
            let transport = codec::encode(&output.data, &iv);
            codec::verify(&transport)?;
            transport
        }
        Mode::Decrypt => String::from_utf8(output.data).map_err(|_| {
            GateError::CryptoOperationFailed("decrypted payload is not valid UTF-8".into())
        })?,
    };
    Ok(ResultEnvelope::authenticated(payload))
}

async fn join_finalize(task: &mut Option<JoinHandle<Outcome>>) -> Outcome {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let joined = handle.await;
    *task = None;
    joined.unwrap_or_else(|e| {
        Err(GateError::CryptoOperationFailed(format!(
            "finalize worker failed: {e}"
        )))
    })
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<AuthenticationEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ScriptStep, ScriptedAuthenticator, SensorFault};
    use crate::challenge::ChallengeId;
    use crate::crypto::cipher::{KEY_LEN, NONCE_LEN};
    use crate::keystore::{KeyBytes, KeyHandle, KeyStoreError, MockKeyStore, SoftwareKeyStore};
    use common::{AuthStatus, ErrorKind};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn bridge(store: &SoftwareKeyStore, auth: &ScriptedAuthenticator) -> AuthenticationBridge {
        AuthenticationBridge::new(
            CipherLifecycleProvider::new(Arc::new(store.clone())),
            Arc::new(auth.clone()),
        )
    }

    async fn collect(op: CipherOperation) -> Vec<Outcome> {
        op.collect().await
    }

    fn is_terminal(outcome: &Outcome) -> bool {
        match outcome {
            Ok(envelope) => envelope.is_terminal(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_round_trip() {
        let store = SoftwareKeyStore::with_enrollments(["finger-1"]);
        let auth = ScriptedAuthenticator::succeeding();
        let bridge = bridge(&store, &auth);

        let items = collect(bridge.execute(CipherRequest::encrypt("k1", "secret"))).await;
        assert_eq!(items.len(), 1);
        let envelope = items[0].as_ref().unwrap();
        assert_eq!(envelope.status, AuthStatus::Authenticated);
        let transport = envelope.payload.clone().unwrap();

        let decoded = codec::decode(&transport).unwrap();
        assert!(!decoded.data.is_empty());
        assert_eq!(decoded.iv.len(), NONCE_LEN);

        let items = collect(bridge.execute(CipherRequest::decrypt("k1", transport))).await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap(),
            &ResultEnvelope::authenticated("secret")
        );
        assert_eq!(auth.registrations(), 2);
    }

    #[tokio::test]
    async fn help_then_success_in_order() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::help(3, "move finger"),
            ScriptStep::Succeed,
        ]);
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let items = collect(op).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &ResultEnvelope::help("move finger"));
        assert_eq!(items[1].as_ref().unwrap().status, AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn exactly_one_terminal_after_many_progress_events() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::Fail,
            ScriptStep::help(5, "too fast"),
            ScriptStep::Fail,
            ScriptStep::help(1, "partial"),
            ScriptStep::Succeed,
            ScriptStep::Fail,
            ScriptStep::Succeed,
        ]);
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let items = collect(op).await;

        assert_eq!(items.iter().filter(|o| is_terminal(o)).count(), 1);
        assert!(is_terminal(items.last().unwrap()));
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].as_ref().unwrap().status, AuthStatus::Failed);
    }

    #[tokio::test]
    async fn wait_returns_terminal_outcome() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![ScriptStep::Fail, ScriptStep::Succeed]);
        let envelope = bridge(&store, &auth)
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap();
        assert_eq!(envelope.status, AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn foreign_success_does_not_finalize() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::SucceedFor(ChallengeId::new()),
            ScriptStep::Succeed,
        ]);
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let items = collect(op).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn sensor_error_is_terminal_failure() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::Fail,
            ScriptStep::error(SensorFault::Lockout),
            ScriptStep::Succeed,
        ]);
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let items = collect(op).await;
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SensorError);
    }

    #[tokio::test]
    async fn authenticator_giving_up_is_sensor_error() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![ScriptStep::Fail, ScriptStep::Fail]);
        let err = bridge(&store, &auth)
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SensorError);
    }

    #[tokio::test]
    async fn unavailable_sensor_fails_before_preparing() {
        let store = SoftwareKeyStore::new();
        let auth =
            ScriptedAuthenticator::succeeding().with_availability(Availability::NoEnrollments);
        let err = bridge(&store, &auth)
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SensorError);
        assert_eq!(auth.registrations(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn key_unavailable_never_reaches_authenticator() {
        let store = SoftwareKeyStore::new();
        store.set_hardware_available(false);
        let auth = ScriptedAuthenticator::succeeding();
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let items = collect(op).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().kind(), ErrorKind::KeyUnavailable);
        assert_eq!(auth.registrations(), 0);
    }

    #[tokio::test]
    async fn malformed_transport_string_fails_before_cipher() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::succeeding();
        let bridge = bridge(&store, &auth);

        for bad in ["no-separator", "a.b.c", "YW+j.ZGVm"] {
            let err = bridge
                .execute(CipherRequest::decrypt("k1", bad))
                .wait()
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedTransportString, "{bad}");
        }
        assert_eq!(auth.registrations(), 0);
    }

    #[tokio::test]
    async fn short_iv_is_invalid_iv() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::succeeding();
        let bridge = bridge(&store, &auth);
        bridge
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap();

        let transport = codec::encode(b"ciphertext", &[1, 2, 3]);
        let err = bridge
            .execute(CipherRequest::decrypt("k1", transport))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIv);
    }

    #[tokio::test]
    async fn decrypt_with_unknown_key_is_key_not_found() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::succeeding();
        let transport = codec::encode(b"ciphertext", &[0u8; NONCE_LEN]);
        let err = bridge(&store, &auth)
            .execute(CipherRequest::decrypt("nope", transport))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_crypto_failure() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::succeeding();
        let bridge = bridge(&store, &auth);
        let envelope = bridge
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap();
        let mut decoded = codec::decode(&envelope.payload.unwrap()).unwrap();
        decoded.data[0] ^= 0x80;

        let err = bridge
            .execute(CipherRequest::decrypt("k1", codec::encode(&decoded.data, &decoded.iv)))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CryptoOperationFailed);
    }

    #[tokio::test]
    async fn key_invalidated_during_finalize_keeps_its_kind() {
        let mut store = MockKeyStore::new();
        let handle = KeyHandle {
            name: "k1".into(),
            generation: 1,
        };
        let created = handle.clone();
        store
            .expect_get_or_create_key()
            .returning(move |_, _| Ok(created.clone()));
        let mut unlocks = 0;
        store.expect_unlock().returning(move |h| {
            unlocks += 1;
            if unlocks == 1 {
                Ok(KeyBytes(Box::new([7u8; KEY_LEN])))
            } else {
                Err(KeyStoreError::PermanentlyInvalidated(h.name.clone()))
            }
        });
        store
            .expect_delete_key()
            .withf(move |h| *h == handle)
            .returning(|_| Ok(true));

        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::help(3, "move finger"),
            ScriptStep::Succeed,
        ]);
        let bridge = AuthenticationBridge::new(
            CipherLifecycleProvider::new(Arc::new(store)),
            Arc::new(auth),
        );
        let items = collect(bridge.execute(CipherRequest::encrypt("k1", "secret"))).await;

        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].as_ref().unwrap_err().kind(),
            ErrorKind::KeyPermanentlyInvalidated
        );
    }

    #[tokio::test]
    async fn enrollment_change_before_decrypt_is_permanent_invalidation() {
        let store = SoftwareKeyStore::with_enrollments(["finger-1"]);
        let auth = ScriptedAuthenticator::succeeding();
        let bridge = bridge(&store, &auth);
        let transport = bridge
            .execute(CipherRequest::encrypt("k1", "secret"))
            .wait()
            .await
            .unwrap()
            .payload
            .unwrap();

        store.set_enrollments(["finger-1", "finger-2"]);
        let err = bridge
            .execute(CipherRequest::decrypt("k1", transport))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyPermanentlyInvalidated);
        assert!(!store.contains("k1"));
    }

    #[tokio::test]
    async fn cancel_before_polling_yields_nothing() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::succeeding();
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        op.cancel();
        op.cancel();
        assert!(collect(op).await.is_empty());
        assert_eq!(auth.registrations(), 0);
    }

    #[tokio::test]
    async fn cancel_while_awaiting_yields_nothing() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![ScriptStep::Hold]);
        let mut op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let handle = op.cancellation_handle();

        let waited = tokio::time::timeout(Duration::from_millis(50), op.next()).await;
        assert!(waited.is_err(), "no envelope before authentication");
        assert_eq!(auth.registrations(), 1);

        handle.cancel();
        assert!(op.next().await.is_none());
        assert!(op.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_after_success_suppresses_terminal() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::help(3, "move finger"),
            ScriptStep::Succeed,
        ]);
        let mut op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));

        let first = op.next().await.unwrap().unwrap();
        assert_eq!(first.status, AuthStatus::Help);

        op.cancel();
        assert!(op.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_during_finalize_suppresses_result() {
        let mut store = MockKeyStore::new();
        let handle = KeyHandle {
            name: "k1".into(),
            generation: 1,
        };
        store
            .expect_get_or_create_key()
            .returning(move |_, _| Ok(handle.clone()));
        let finished = Arc::new(AtomicBool::new(false));
        let worker_done = Arc::clone(&finished);
        let mut unlocks = 0;
        store.expect_unlock().returning(move |_| {
            unlocks += 1;
            if unlocks > 1 {
                std::thread::sleep(Duration::from_millis(200));
                worker_done.store(true, Ordering::SeqCst);
            }
            Ok(KeyBytes(Box::new([7u8; KEY_LEN])))
        });

        let auth = ScriptedAuthenticator::new(vec![
            ScriptStep::help(3, "move finger"),
            ScriptStep::Succeed,
        ]);
        let bridge = AuthenticationBridge::new(
            CipherLifecycleProvider::new(Arc::new(store)),
            Arc::new(auth),
        );
        let mut op = bridge.execute(CipherRequest::encrypt("k1", "secret"));

        let first = op.next().await.unwrap().unwrap();
        assert_eq!(first.status, AuthStatus::Help);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!finished.load(Ordering::SeqCst), "finalize still running");

        op.cancel();
        assert!(op.next().await.is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(op.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_wait_reports_cancelled() {
        let store = SoftwareKeyStore::new();
        let auth = ScriptedAuthenticator::new(vec![ScriptStep::Hold]);
        let op = bridge(&store, &auth).execute(CipherRequest::encrypt("k1", "secret"));
        let handle = op.cancellation_handle();

        let waiter = tokio::spawn(op.wait());
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
