//! Pure transition function of the authentication bridge.
//!
//! ```text
//! Idle -> CipherPrepared -> AwaitingAuthentication -> Finalizing -> Succeeded
//!                                 |  ^                     |
//!                          help / failed (progress)        +-> Errored
//! any non-terminal state -> Cancelled | Errored
//! ```
//!
//! [`apply`] performs no I/O. The driver executes the returned [`Effect`]s and
//! feeds their results back in as [`Input`]s.

use common::{ErrorKind, GateError, ResultEnvelope};
use tracing::{debug, warn};

use super::channel::Outcome;
use crate::auth::AuthenticationEvent;
use crate::challenge::ChallengeId;

/// Bridge state. `Succeeded`, `Cancelled`, and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    CipherPrepared { challenge: ChallengeId },
    AwaitingAuthentication { challenge: ChallengeId },
    Finalizing { challenge: ChallengeId },
    Succeeded,
    Cancelled,
    Errored(ErrorKind),
}

impl BridgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeState::Succeeded | BridgeState::Cancelled | BridgeState::Errored(_)
        )
    }
}

/// Something that happened to the operation.
#[derive(Debug)]
pub enum Input {
    /// The cipher was prepared and wrapped in this challenge.
    Prepared(ChallengeId),
    /// Availability check, decoding, or cipher preparation failed.
    PrepareFailed(GateError),
    /// The challenge was handed to the authenticator.
    Registered,
    Authentication(AuthenticationEvent),
    /// The authenticator's event stream ended.
    AuthenticatorClosed,
    /// The finalize worker completed.
    Finalized(Outcome),
    Cancel,
}

/// Work the driver must carry out, in order.
#[derive(Debug)]
pub enum Effect {
    /// Register the challenge with the authenticator.
    Register,
    /// Hand the authorised cipher to the finalize worker.
    Finalize,
    Progress(ResultEnvelope),
    Terminate(Outcome),
    /// Drop the challenge, event stream, and any in-flight finalize.
    Release,
}

/// Compute the next state and the effects of `input` in `state`.
pub fn apply(state: BridgeState, input: Input) -> (BridgeState, Vec<Effect>) {
    use BridgeState::*;

    if state.is_terminal() {
        debug!(?state, ?input, "input after terminal state ignored");
        return (state, Vec::new());
    }

    match (state, input) {
        (_, Input::Cancel) => (Cancelled, vec![Effect::Release]),

        (Idle, Input::Prepared(challenge)) => {
            (CipherPrepared { challenge }, vec![Effect::Register])
        }
        (Idle, Input::PrepareFailed(err)) => fail(err),

        (CipherPrepared { challenge }, Input::Registered) => {
            (AwaitingAuthentication { challenge }, Vec::new())
        }

        (AwaitingAuthentication { challenge }, Input::Authentication(event)) => {
            on_authentication(challenge, event)
        }
        (AwaitingAuthentication { .. }, Input::AuthenticatorClosed) => fail(GateError::SensorError(
            "authenticator stopped before reporting a result".into(),
        )),

        (Finalizing { .. }, Input::Finalized(Ok(envelope))) => (
            Succeeded,
            vec![Effect::Terminate(Ok(envelope)), Effect::Release],
        ),
        (Finalizing { .. }, Input::Finalized(Err(err))) => fail(err),

        (state, input) => {
            debug!(?state, ?input, "input not applicable in current state");
            (state, Vec::new())
        }
    }
}

fn on_authentication(
    challenge: ChallengeId,
    event: AuthenticationEvent,
) -> (BridgeState, Vec<Effect>) {
    let awaiting = BridgeState::AwaitingAuthentication { challenge };
    match event {
        AuthenticationEvent::Succeeded { challenge: reported } if reported == challenge => {
            (BridgeState::Finalizing { challenge }, vec![Effect::Finalize])
        }
        AuthenticationEvent::Succeeded { challenge: reported } => {
            warn!(expected = %challenge, %reported, "success for a foreign challenge ignored");
            (awaiting, Vec::new())
        }
        AuthenticationEvent::Help { code, text } => {
            debug!(code, "authenticator help");
            (awaiting, vec![Effect::Progress(ResultEnvelope::help(text))])
        }
        AuthenticationEvent::Failed => (awaiting, vec![Effect::Progress(ResultEnvelope::failed())]),
        AuthenticationEvent::Error { fault, message } => {
            let detail = match message {
                Some(m) => format!("{fault}: {m}"),
                None => fault.to_string(),
            };
            fail(GateError::SensorError(detail))
        }
    }
}

fn fail(err: GateError) -> (BridgeState, Vec<Effect>) {
    (
        BridgeState::Errored(err.kind()),
        vec![Effect::Terminate(Err(err)), Effect::Release],
    )
}
