//! Deterministic simulated sensor that replays a fixed script per registration.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::debug;

use super::{Authenticator, Availability, AuthenticationEvent, EventReceiver, SensorFault};
use crate::challenge::ChallengeId;

/// One scripted sensor action.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report a match for the registered challenge.
    Succeed,
    /// Report a match naming some other challenge.
    SucceedFor(ChallengeId),
    Help { code: i32, text: String },
    Fail,
    Error {
        fault: SensorFault,
        message: Option<String>,
    },
    Delay(Duration),
    /// Keep the stream open until the registration is released.
    Hold,
}

impl ScriptStep {
    pub fn help(code: i32, text: impl Into<String>) -> Self {
        ScriptStep::Help {
            code,
            text: text.into(),
        }
    }

    pub fn error(fault: SensorFault) -> Self {
        ScriptStep::Error {
            fault,
            message: None,
        }
    }
}

/// [`Authenticator`] that plays the same script on every registration.
///
/// Once the script is exhausted the event stream ends, unless the last step
/// is [`ScriptStep::Hold`].
#[derive(Debug, Clone)]
pub struct ScriptedAuthenticator {
    steps: Arc<Vec<ScriptStep>>,
    availability: Availability,
    registrations: Arc<AtomicUsize>,
}

impl ScriptedAuthenticator {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Arc::new(steps),
            availability: Availability::Ready,
            registrations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A sensor that matches immediately.
    pub fn succeeding() -> Self {
        Self::new(vec![ScriptStep::Succeed])
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Number of challenges registered so far.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl Authenticator for ScriptedAuthenticator {
    fn availability(&self) -> Availability {
        self.availability
    }

    fn register(&self, challenge: ChallengeId) -> EventReceiver {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let steps = Arc::clone(&self.steps);

        tokio::spawn(async move {
            for step in steps.iter() {
                let event = match step {
                    ScriptStep::Succeed => AuthenticationEvent::Succeeded { challenge },
                    ScriptStep::SucceedFor(other) => {
                        AuthenticationEvent::Succeeded { challenge: *other }
                    }
                    ScriptStep::Help { code, text } => AuthenticationEvent::Help {
                        code: *code,
                        text: text.clone(),
                    },
                    ScriptStep::Fail => AuthenticationEvent::Failed,
                    ScriptStep::Error { fault, message } => AuthenticationEvent::Error {
                        fault: *fault,
                        message: message.clone(),
                    },
                    ScriptStep::Delay(d) => {
                        tokio::time::sleep(*d).await;
                        continue;
                    }
                    ScriptStep::Hold => {
                        tx.closed().await;
                        break;
                    }
                };
                if tx.send(event).is_err() {
                    debug!(%challenge, "registration released; script stopped");
                    break;
                }
            }
        });

        rx
    }
}
