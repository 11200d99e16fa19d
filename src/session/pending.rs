//! Per-call async resolution.
//!
//! Every request the session submits hands a [`Pending`] back to the caller.
//! The matching [`Resolver`] stays with the session and is consumed when the
//! request settles, so the outcome is delivered once. A caller that is not
//! interested can drop the `Pending`; the session logs the outcome either way.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::error::SessionError;
use crate::transport::TransportError;

pub type Outcome = Result<(), SessionError>;

/// Future resolving to the outcome of one submitted operation.
#[derive(Debug)]
#[must_use = "drop the Pending explicitly if the outcome is not needed"]
pub struct Pending {
    rx: oneshot::Receiver<Outcome>,
}

/// Session-side half of a [`Pending`].
#[derive(Debug)]
pub(crate) struct Resolver {
    tx: oneshot::Sender<Outcome>,
}

impl Pending {
    pub(crate) fn channel() -> (Self, Resolver) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, Resolver { tx })
    }

    /// Waits for the outcome.
    pub async fn outcome(self) -> Outcome {
        self.await
    }
}

impl Future for Pending {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TransportError::Abandoned.into())))
    }
}

impl Resolver {
    pub(crate) fn resolve(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}
