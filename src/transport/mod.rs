//! # Broker Transport
//!
//! The transport is the capability the session sits on: open and close the
//! broker connection, send publishes, register subscriptions, and report what
//! the broker does back to the session.
//!
//! ```text
//! SessionManager ──open/send/add_subscription/close──► Transport
//!        ▲                                                 │
//!        ├──────────── Completion (one per request) ───────┤
//!        └──────────── TransportEvent (unsolicited) ───────┘
//! ```
//!
//! Every request carries a [`Completion`]. It is consumed when resolved, so a
//! request can resolve at most once; dropping it unresolved is reported to the
//! waiter as [`TransportError::Abandoned`], so it also resolves at least once.
//!
//! Unsolicited events (arrived messages, connection loss) travel over a single
//! unbounded channel created with [`event_channel`].

pub mod rumqtt;
pub mod url;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::time::Duration;

use rumqttc::QoS;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use url::{BrokerAddress, UrlError};

/// Result carried by a [`Completion`].
pub type TransportResult = Result<(), TransportError>;

/// Sending half handed to the transport for unsolicited events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the session's event pump.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport uses to report unsolicited events.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Failure of a single transport request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker answered but refused the request (CONNACK or SUBACK failure)
    #[error("broker refused the request: {0}")]
    Refused(String),

    /// Network or protocol level failure of the underlying connection
    #[error("connection error: {0}")]
    Connection(String),

    /// The local client could not queue the request
    #[error("client rejected the request: {0}")]
    Client(String),

    /// The broker URL could not be turned into a connection target
    #[error("invalid broker url: {0}")]
    InvalidUrl(#[from] UrlError),

    /// The completion was dropped before anybody resolved it
    #[error("request abandoned before it completed")]
    Abandoned,

    /// No completion arrived within the configured request timeout
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// Resolver for exactly one transport request.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<TransportResult>,
}

impl Completion {
    /// Creates a completion and the receiver its outcome arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<TransportResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn resolve(self, result: TransportResult) {
        // The waiter may have given up (timeout, shutdown); nothing to report then.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self) {
        self.resolve(Ok(()));
    }

    pub fn fail(self, error: TransportError) {
        self.resolve(Err(error));
    }
}

/// Username/password pair presented to the broker on connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a transport needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub broker_url: String,
    pub client_id: String,
    pub credentials: Credentials,
}

/// An outgoing publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
}

/// Events the transport reports without being asked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A PUBLISH arrived on one of the subscribed topics
    Message { topic: String, payload: Vec<u8> },
    /// The connection dropped without the session asking for it
    ConnectionLost { cause: String },
}

/// The broker client capability the session manager drives.
///
/// Methods submit a request and return immediately. The outcome is reported
/// through the passed [`Completion`], possibly from another task or thread.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, options: &ConnectOptions, done: Completion);

    fn send(&self, envelope: Envelope, done: Completion);

    fn add_subscription(&self, topic: &str, qos: QoS, done: Completion);

    fn close(&self, done: Completion);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_resolves_once() {
        let (done, rx) = Completion::channel();
        done.fail(TransportError::Refused("bad credentials".into()));
        assert_eq!(
            rx.await.unwrap(),
            Err(TransportError::Refused("bad credentials".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_completion_is_observable() {
        let (done, rx) = Completion::channel();
        drop(done);
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_resolve_after_waiter_gone_does_not_panic() {
        let (done, rx) = Completion::channel();
        drop(rx);
        done.succeed();
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("fogo", "s3cret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("fogo"));
        assert!(!rendered.contains("s3cret"));
    }
}
