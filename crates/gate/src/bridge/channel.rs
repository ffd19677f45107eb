//! [`ResultChannel`]: at most one terminal emission per operation.

use common::{GateError, ResultEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Item type of an operation's result stream.
///
/// `Ok` with status Help/Failed is progress; `Ok(Authenticated)` or `Err` is terminal.
pub type Outcome = Result<ResultEnvelope, GateError>;

/// Misuse of a [`ResultChannel`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// An emission was attempted after the terminal one.
    #[error("result channel already terminated")]
    AlreadyTerminated,

    /// A success envelope was offered as progress.
    #[error("authenticated envelope emitted as progress")]
    TerminalAsProgress,
}

/// Sending side of an operation's result stream.
///
/// After cancellation every emission is suppressed; emitting after the
/// terminal outcome is reported as [`ChannelError::AlreadyTerminated`].
#[derive(Debug)]
pub struct ResultChannel {
    tx: mpsc::UnboundedSender<Outcome>,
    cancel: CancellationToken,
    terminated: bool,
}

impl ResultChannel {
    pub fn new(tx: mpsc::UnboundedSender<Outcome>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            terminated: false,
        }
    }

    /// Relay a non-terminal Help or Failed envelope.
    pub fn progress(&mut self, envelope: ResultEnvelope) -> Result<(), ChannelError> {
        if self.terminated {
            return Err(ChannelError::AlreadyTerminated);
        }
        if envelope.is_terminal() {
            return Err(ChannelError::TerminalAsProgress);
        }
        self.send(Ok(envelope));
        Ok(())
    }

    /// Emit the terminal outcome and close the channel.
    pub fn terminate(&mut self, outcome: Outcome) -> Result<(), ChannelError> {
        if self.terminated {
            return Err(ChannelError::AlreadyTerminated);
        }
        self.terminated = true;
        self.send(outcome);
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn send(&self, outcome: Outcome) {
        if self.cancel.is_cancelled() {
            debug!("operation cancelled; emission suppressed");
            return;
        }
        if self.tx.send(outcome).is_err() {
            debug!("result receiver dropped; emission discarded");
        }
    }
}
