//! [`CipherOperation`]: the caller's lazy, cancellable view of one request.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use common::{GateError, ResultEnvelope};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::channel::Outcome;

type Driver = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cloneable handle that cancels an operation from anywhere.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Cancel the operation. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Stream of [`Outcome`]s for one gated cipher request.
///
/// Nothing runs until the stream is first polled. Progress items come first;
/// at most one terminal item (`Ok(Authenticated)` or `Err`) ends the stream.
/// Once cancelled the stream yields `None`, even if results were in flight.
/// Dropping the operation cancels it.
///
/// The first poll spawns the driver with `tokio::spawn`, so the stream must be
/// polled from within a Tokio runtime; polling it elsewhere panics.
pub struct CipherOperation {
    driver: Option<Driver>,
    receiver: mpsc::UnboundedReceiver<Outcome>,
    cancel: CancellationToken,
}

impl CipherOperation {
    pub(crate) fn new(
        driver: Driver,
        receiver: mpsc::UnboundedReceiver<Outcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver: Some(driver),
            receiver,
            cancel,
        }
    }

    /// Cancel the operation. Idempotent; no item is yielded afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive the operation to completion, skipping progress items.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure, or [`GateError::Cancelled`] if the stream
    /// ended without a terminal item.
    pub async fn wait(mut self) -> Result<ResultEnvelope, GateError> {
        while let Some(outcome) = self.next().await {
            match outcome {
                Ok(envelope) if !envelope.is_terminal() => continue,
                terminal => return terminal,
            }
        }
        Err(GateError::Cancelled)
    }
}

impl Stream for CipherOperation {
    type Item = Outcome;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() {
            this.receiver.close();
            return Poll::Ready(None);
        }

        if let Some(driver) = this.driver.take() {
            debug!("starting cipher operation");
            tokio::spawn(driver);
        }

        this.receiver.poll_recv(cx)
    }
}

impl Drop for CipherOperation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for CipherOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherOperation")
            .field("started", &self.driver.is_none())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
