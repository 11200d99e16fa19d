//! Session manager - single owner of the broker session
//!
//! Holds the connection state and the subscription set of the one broker
//! session this process runs, and drives the [`Transport`] on the caller's
//! behalf.
//!
//! # Concurrency
//!
//! Calls return as soon as the request is submitted. Completions and transport
//! events arrive on Tokio tasks and are applied under one mutex, so state has a
//! single writer at a time. The lock is never held while calling the transport
//! or the sink.
//!
//! Every pending request is tagged with the session generation it was issued
//! in. Connect, disconnect and connection loss start a new generation, and a
//! completion from an older one can no longer move the state or touch the
//! subscriptions.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fogo360::session::{SessionConfig, SessionManager};
//! use fogo360::sink::LogSink;
//! use fogo360::transport::{event_channel, rumqtt::{RumqttSettings, RumqttTransport}, Credentials};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (events_tx, events_rx) = event_channel();
//! let transport = Arc::new(RumqttTransport::new(RumqttSettings::default(), events_tx));
//! let config = SessionConfig::new("tcp://broker.hivemq.com:1883", Credentials::default());
//!
//! let manager = SessionManager::new(config, transport, events_rx);
//! manager.set_sink(Arc::new(LogSink));
//!
//! if let Ok(pending) = manager.connect() {
//!     let _ = pending.await;
//! }
//! # }
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use rumqttc::QoS;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{
    SessionConfig, CLIENT_ID_PREFIX, CONNECTED_ANNOUNCEMENT, DEFAULT_QOS, DEFAULT_TOPIC,
};
use super::error::SessionError;
use super::message::{InboundMessage, EMPTY_MESSAGE};
use super::pending::{Pending, Resolver};
use super::state::{ConnectionState, SessionStats, SessionStatus};
use crate::sink::Sink;
use crate::transport::{
    Completion, ConnectOptions, Envelope, EventReceiver, Transport, TransportError,
    TransportEvent, TransportResult,
};

/// Handle to the broker session.
///
/// Cheap to clone; all clones drive the same session. Construct it once and
/// pass it to whoever needs it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    client_id: String,
    transport: Arc<dyn Transport>,
    session: Mutex<Session>,
    sink: RwLock<Option<Arc<dyn Sink>>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Session {
    state: ConnectionState,
    subscriptions: HashSet<String>,
    generation: u64,
    connect_waiters: Vec<Resolver>,
    stats: SessionStats,
}

impl SessionManager {
    /// Creates the session and starts listening to transport events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
    ) -> Self {
        let client_id = format!("{}{}", CLIENT_ID_PREFIX, Uuid::new_v4().simple());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        info!(
            "Creating session for {} with client id {}",
            config.broker_url, client_id
        );

        let inner = Arc::new(Inner {
            config,
            client_id,
            transport,
            session: Mutex::new(Session::default()),
            sink: RwLock::new(None),
            state_tx,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(pump_events(
            Arc::downgrade(&inner),
            events,
            inner.shutdown.clone(),
        ));

        Self { inner }
    }

    /// Starts connecting with the session's credentials.
    ///
    /// Returns [`SessionError::AlreadyConnected`] (advisory) when connected. While
    /// a connect is in flight no second request is sent; the returned
    /// [`Pending`] resolves with the outcome of the attempt already running.
    pub fn connect(&self) -> Result<Pending, SessionError> {
        self.inner.connect()
    }

    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<Pending, SessionError> {
        self.inner.subscribe(topic, qos)
    }

    pub fn subscribe_default(&self, topic: &str) -> Result<Pending, SessionError> {
        self.inner.subscribe(topic, DEFAULT_QOS)
    }

    /// Sends one message. Fails fast with [`SessionError::NotConnected`] outside
    /// the connected state; the message is dropped, not queued.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retained: bool,
    ) -> Result<Pending, SessionError> {
        self.inner.publish(topic, payload.into(), qos, retained)
    }

    pub fn publish_default(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Pending, SessionError> {
        self.inner.publish(topic, payload.into(), DEFAULT_QOS, false)
    }

    /// Closes the session. `None` when there was nothing to disconnect.
    pub fn disconnect(&self) -> Option<Pending> {
        self.inner.disconnect()
    }

    /// Tears the session down for process exit.
    ///
    /// Disconnects when connected, abandons a connect still in flight, and
    /// stops listening to the transport. The manager cannot connect again
    /// afterwards.
    pub async fn shutdown(&self) {
        match self.state() {
            ConnectionState::Connected => {
                if let Some(pending) = self.disconnect() {
                    if let Err(e) = pending.await {
                        warn!("Disconnect during shutdown failed: {}", e);
                    }
                }
            }
            ConnectionState::Connecting => self.inner.abandon_connect(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
        }
        self.inner.shutdown.cancel();
        info!("Session shut down");
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session().state
    }

    /// Observes state changes, e.g. for a status indicator.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Currently subscribed topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.session().subscriptions.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn broker_url(&self) -> &str {
        &self.inner.config.broker_url
    }

    pub fn status(&self) -> SessionStatus {
        let session = self.inner.session();
        let mut subscriptions: Vec<String> = session.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        SessionStatus {
            state: session.state,
            client_id: self.inner.client_id.clone(),
            subscriptions,
            stats: session.stats.clone(),
        }
    }

    /// Registers where arrived messages are shown. Replaces any previous sink.
    pub fn set_sink(&self, sink: Arc<dyn Sink>) {
        *self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Unregisters the sink; messages arriving afterwards are dropped.
    pub fn clear_sink(&self) {
        *self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        debug!("Session state {} -> {}", session.state, state);
        session.state = state;
        self.state_tx.send_replace(state);
    }

    fn enter_disconnected(&self, session: &mut Session) {
        session.subscriptions.clear();
        self.set_state(session, ConnectionState::Disconnected);
    }

    fn connected_generation(&self, action: &str) -> Result<u64, SessionError> {
        let session = self.session();
        if session.state == ConnectionState::Connected {
            Ok(session.generation)
        } else {
            debug!("Cannot {} while {}", action, session.state);
            Err(SessionError::NotConnected)
        }
    }

    /// Waits for a transport completion on its own task and hands the result,
    /// or a timeout, to `on_done`.
    fn track<F>(self: &Arc<Self>, rx: oneshot::Receiver<TransportResult>, on_done: F)
    where
        F: FnOnce(&Arc<Inner>, TransportResult) + Send + 'static,
    {
        let inner = Arc::clone(self);
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(received) => received.unwrap_or(Err(TransportError::Abandoned)),
                    Err(_) => Err(TransportError::TimedOut(limit)),
                },
                None => rx.await.unwrap_or(Err(TransportError::Abandoned)),
            };
            on_done(&inner, result);
        });
    }

    fn connect(self: &Arc<Self>) -> Result<Pending, SessionError> {
        if self.shutdown.is_cancelled() {
            warn!("Connect requested after shutdown");
            return Err(SessionError::NotConnected);
        }

        let (pending, resolver) = Pending::channel();
        let generation = {
            let mut session = self.session();
            match session.state {
                ConnectionState::Connected => {
                    info!("Already connected, not sending credentials again");
                    return Err(SessionError::AlreadyConnected);
                }
                ConnectionState::Connecting => {
                    debug!("Connect already in flight, joining it");
                    session.connect_waiters.push(resolver);
                    return Ok(pending);
                }
                ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                    session.generation += 1;
                    session.connect_waiters.push(resolver);
                    self.set_state(&mut session, ConnectionState::Connecting);
                    session.generation
                }
            }
        };

        info!(
            "Connecting to {} as {}",
            self.config.broker_url, self.client_id
        );
        let (done, rx) = Completion::channel();
        self.transport.open(
            &ConnectOptions {
                broker_url: self.config.broker_url.clone(),
                client_id: self.client_id.clone(),
                credentials: self.config.credentials.clone(),
            },
            done,
        );
        self.track(rx, move |inner, result| {
            inner.on_connect_result(generation, result)
        });

        Ok(pending)
    }

    fn on_connect_result(self: &Arc<Self>, generation: u64, result: TransportResult) {
        let timed_out = matches!(result, Err(TransportError::TimedOut(_)));
        if timed_out && self.is_current_attempt(generation) {
            // Closed while still Connecting, so a new connect cannot open a
            // link this close would hit. A late CONNACK then finds no session.
            self.close_abandoned_link();
        }

        let mut session = self.session();
        if session.generation != generation || session.state != ConnectionState::Connecting {
            debug!("Ignoring connect result of an abandoned attempt: {:?}", result);
            return;
        }

        let waiters = std::mem::take(&mut session.connect_waiters);
        match result {
            Ok(()) => {
                self.set_state(&mut session, ConnectionState::Connected);
                session.stats.touch();
                drop(session);

                info!("Connected to {}", self.config.broker_url);
                self.handshake();
                waiters.into_iter().for_each(|w| w.resolve(Ok(())));
            }
            Err(e) => {
                error!("Connection to {} failed: {}", self.config.broker_url, e);
                session.stats.record_error(&e);
                self.set_state(&mut session, ConnectionState::Disconnected);
                drop(session);

                let error = SessionError::from(e);
                waiters
                    .into_iter()
                    .for_each(|w| w.resolve(Err(error.clone())));
            }
        }
    }

    fn is_current_attempt(&self, generation: u64) -> bool {
        let session = self.session();
        session.generation == generation && session.state == ConnectionState::Connecting
    }

    /// Joins the default topic and announces the connection on it.
    fn handshake(self: &Arc<Self>) {
        if let Err(e) = self.subscribe(DEFAULT_TOPIC, DEFAULT_QOS) {
            warn!("Could not subscribe to {} after connect: {}", DEFAULT_TOPIC, e);
        }
        if let Err(e) = self.publish(
            DEFAULT_TOPIC,
            CONNECTED_ANNOUNCEMENT.as_bytes().to_vec(),
            DEFAULT_QOS,
            false,
        ) {
            warn!("Could not announce connection on {}: {}", DEFAULT_TOPIC, e);
        }
    }

    fn subscribe(self: &Arc<Self>, topic: &str, qos: QoS) -> Result<Pending, SessionError> {
        let generation = self.connected_generation("subscribe")?;

        debug!("Subscribing to {} with {:?}", topic, qos);
        let (pending, resolver) = Pending::channel();
        let (done, rx) = Completion::channel();
        self.transport.add_subscription(topic, qos, done);

        let topic = topic.to_string();
        self.track(rx, move |inner, result| {
            inner.on_subscribe_result(generation, topic, result, resolver)
        });
        Ok(pending)
    }

    fn on_subscribe_result(
        &self,
        generation: u64,
        topic: String,
        result: TransportResult,
        resolver: Resolver,
    ) {
        let mut session = self.session();
        let current =
            session.generation == generation && session.state == ConnectionState::Connected;

        let outcome = match result {
            Ok(()) if current => {
                info!("Subscribed to {}", topic);
                session.subscriptions.insert(topic);
                session.stats.touch();
                Ok(())
            }
            Ok(()) => {
                debug!("Subscription to {} completed after its session ended", topic);
                Err(SessionError::NotConnected)
            }
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
                session.stats.record_error(&e);
                Err(e.into())
            }
        };
        drop(session);
        resolver.resolve(outcome);
    }

    fn publish(
        self: &Arc<Self>,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retained: bool,
    ) -> Result<Pending, SessionError> {
        self.connected_generation("publish")?;

        debug!(
            "Publishing {} bytes to {} with {:?}, retained={}",
            payload.len(),
            topic,
            qos,
            retained
        );
        let (pending, resolver) = Pending::channel();
        let (done, rx) = Completion::channel();
        self.transport.send(
            Envelope {
                topic: topic.to_string(),
                payload,
                qos,
                retained,
            },
            done,
        );

        let topic = topic.to_string();
        self.track(rx, move |inner, result| {
            inner.on_publish_result(topic, result, resolver)
        });
        Ok(pending)
    }

    fn on_publish_result(&self, topic: String, result: TransportResult, resolver: Resolver) {
        let mut session = self.session();
        match &result {
            Ok(()) => {
                info!("Published to {}", topic);
                session.stats.messages_sent += 1;
                session.stats.touch();
            }
            Err(e) => {
                warn!("Failed to publish to {}: {}", topic, e);
                session.stats.record_error(e);
            }
        }
        drop(session);
        resolver.resolve(result.map_err(SessionError::from));
    }

    fn disconnect(self: &Arc<Self>) -> Option<Pending> {
        let generation = {
            let mut session = self.session();
            if session.state != ConnectionState::Connected {
                debug!("Nothing to disconnect while {}", session.state);
                return None;
            }
            session.generation += 1;
            self.set_state(&mut session, ConnectionState::Disconnecting);
            session.generation
        };

        info!("Disconnecting from {}", self.config.broker_url);
        let (pending, resolver) = Pending::channel();
        let (done, rx) = Completion::channel();
        self.transport.close(done);
        self.track(rx, move |inner, result| {
            inner.on_disconnect_result(generation, result, resolver)
        });
        Some(pending)
    }

    fn on_disconnect_result(&self, generation: u64, result: TransportResult, resolver: Resolver) {
        let mut session = self.session();
        if session.generation == generation && session.state == ConnectionState::Disconnecting {
            self.enter_disconnected(&mut session);
        } else {
            debug!("Disconnect completed after the session moved on");
        }

        match &result {
            Ok(()) => info!("Disconnected from {}", self.config.broker_url),
            Err(e) => {
                warn!("Disconnect failed, treating the session as closed: {}", e);
                session.stats.record_error(e);
            }
        }
        drop(session);
        resolver.resolve(result.map_err(SessionError::from));
    }

    /// Gives up on a connect that is still in flight.
    fn abandon_connect(self: &Arc<Self>) {
        let waiters = {
            let mut session = self.session();
            if session.state != ConnectionState::Connecting {
                return;
            }
            session.generation += 1;
            self.enter_disconnected(&mut session);
            std::mem::take(&mut session.connect_waiters)
        };

        info!("Abandoning connect to {}", self.config.broker_url);
        waiters
            .into_iter()
            .for_each(|w| w.resolve(Err(SessionError::NotConnected)));
        self.close_abandoned_link();
    }

    /// Closes a connection the session no longer tracks.
    fn close_abandoned_link(self: &Arc<Self>) {
        let (done, rx) = Completion::channel();
        self.transport.close(done);
        self.track(rx, |_, result| {
            if let Err(e) = result {
                debug!("Closing the abandoned connection failed: {}", e);
            }
        });
    }

    fn on_connection_lost(&self, cause: String) {
        let mut session = self.session();
        if session.state == ConnectionState::Disconnected {
            debug!("Connection loss reported while disconnected: {}", cause);
            return;
        }

        warn!("Connection lost while {}: {}", session.state, cause);
        session.generation += 1;
        session.stats.record_error(&cause);
        self.enter_disconnected(&mut session);
        let waiters = std::mem::take(&mut session.connect_waiters);
        drop(session);

        let error = SessionError::ConnectionLost(cause);
        waiters
            .into_iter()
            .for_each(|w| w.resolve(Err(error.clone())));
    }

    fn on_message(&self, message: InboundMessage) {
        {
            let mut session = self.session();
            session.stats.messages_received += 1;
            session.stats.touch();
        }

        let text = match message.decode() {
            Ok(text) => text,
            Err(e) => {
                warn!("{}, showing the empty-message marker", e);
                EMPTY_MESSAGE.to_string()
            }
        };
        debug!("Message received on {}: {}", message.topic, text);

        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => sink.display(text),
            None => debug!("No sink registered, dropping message from {}", message.topic),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn pump_events(inner: Weak<Inner>, mut events: EventReceiver, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Message { topic, payload } => {
                inner.on_message(InboundMessage::new(topic, payload))
            }
            TransportEvent::ConnectionLost { cause } => inner.on_connection_lost(cause),
        }
    }
    debug!("Transport event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::transport::mock::{Call, MockTransport, Reply};
    use crate::transport::{event_channel, Credentials, EventSender};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> SessionConfig {
        SessionConfig::new(
            "ssl://test.hivemq.cloud:8883",
            Credentials::new("fogo", "360"),
        )
    }

    fn setup(mock: MockTransport) -> (SessionManager, Arc<MockTransport>, EventSender) {
        setup_with(config(), mock)
    }

    fn setup_with(
        config: SessionConfig,
        mock: MockTransport,
    ) -> (SessionManager, Arc<MockTransport>, EventSender) {
        let mock = Arc::new(mock);
        let (events_tx, events_rx) = event_channel();
        let manager = SessionManager::new(config, mock.clone(), events_rx);
        (manager, mock, events_tx)
    }

    async fn wait_for_state(manager: &SessionManager, state: ConnectionState) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn handshake_calls() -> Vec<Call> {
        vec![
            Call::Subscribe {
                topic: DEFAULT_TOPIC.into(),
                qos: QoS::AtLeastOnce,
            },
            Call::Send(Envelope {
                topic: DEFAULT_TOPIC.into(),
                payload: "Conexão com HiveMQ estabelecida com sucesso!".as_bytes().to_vec(),
                qos: QoS::AtLeastOnce,
                retained: false,
            }),
        ]
    }

    async fn connected(mock: MockTransport) -> (SessionManager, Arc<MockTransport>, EventSender) {
        let (manager, mock, events) = setup(mock);
        manager.connect().unwrap().await.unwrap();
        (manager, mock, events)
    }

    #[tokio::test]
    async fn test_connect_success_runs_handshake() {
        let (manager, mock, _events) = setup(MockTransport::new());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let pending = manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        assert_eq!(pending.await, Ok(()));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.is_connected());

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            Call::Open(ConnectOptions {
                broker_url: "ssl://test.hivemq.cloud:8883".into(),
                client_id: manager.client_id().to_string(),
                credentials: Credentials::new("fogo", "360"),
            })
        );
        assert_eq!(calls[1..].to_vec(), handshake_calls());

        eventually(|| manager.subscriptions() == vec![DEFAULT_TOPIC.to_string()]).await;
        eventually(|| manager.status().stats.messages_sent == 1).await;
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let (manager, mock, _events) = setup(
            MockTransport::new().on_open(Reply::Fail(TransportError::Refused(
                "BadUserNamePassword".into(),
            ))),
        );

        let outcome = manager.connect().unwrap().await;

        assert_eq!(
            outcome,
            Err(SessionError::Transport(TransportError::Refused(
                "BadUserNamePassword".into()
            )))
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.subscriptions().is_empty());
        assert_eq!(mock.calls().len(), 1);
        assert!(manager.status().stats.last_error.is_some());
    }

    #[tokio::test]
    async fn test_operations_while_disconnected_never_reach_transport() {
        let (manager, mock, _events) = setup(MockTransport::new());

        assert_eq!(
            manager.publish_default("t", "m").unwrap_err(),
            SessionError::NotConnected
        );
        assert_eq!(
            manager.subscribe_default("t").unwrap_err(),
            SessionError::NotConnected
        );
        assert!(manager.disconnect().is_none());

        assert!(mock.calls().is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_duplicate_connect_while_connecting_sends_one_request() {
        let (manager, mock, _events) = setup(MockTransport::new().on_open(Reply::Hold));

        let first = manager.connect().unwrap();
        let second = manager.connect().unwrap();
        assert_eq!(mock.open_calls(), 1);

        mock.release_open(Ok(()));
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(mock.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_advisory() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;

        let err = manager.connect().unwrap_err();
        assert_eq!(err, SessionError::AlreadyConnected);
        assert!(err.is_advisory());
        assert_eq!(mock.open_calls(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_publish_while_connected_sends_one_envelope() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;
        let before = mock.calls().len();

        assert_eq!(manager.publish_default("t", "m").unwrap().await, Ok(()));

        let calls = mock.calls();
        assert_eq!(calls.len(), before + 1);
        assert_eq!(
            calls[before],
            Call::Send(Envelope {
                topic: "t".into(),
                payload: b"m".to_vec(),
                qos: QoS::AtLeastOnce,
                retained: false,
            })
        );
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_state() {
        let (manager, _mock, _events) = connected(
            MockTransport::new().on_send(Reply::Fail(TransportError::Client("queue full".into()))),
        )
        .await;

        let outcome = manager.publish("t", "m", QoS::ExactlyOnce, true).unwrap().await;

        assert_eq!(
            outcome,
            Err(SessionError::Transport(TransportError::Client(
                "queue full".into()
            )))
        );
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_connection() {
        let (manager, _mock, _events) = connected(
            MockTransport::new().on_subscribe(Reply::Fail(TransportError::Refused(
                "subscription rejected".into(),
            ))),
        )
        .await;

        let outcome = manager.subscribe("alerts", QoS::AtLeastOnce).unwrap().await;

        assert!(matches!(outcome, Err(SessionError::Transport(_))));
        assert!(manager.is_connected());
        assert!(manager.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_is_not_deduplicated() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;
        eventually(|| manager.subscriptions().len() == 1).await;

        assert_eq!(manager.subscribe_default(DEFAULT_TOPIC).unwrap().await, Ok(()));

        let subscribe_calls = mock
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Subscribe { .. }))
            .count();
        assert_eq!(subscribe_calls, 2);
        assert_eq!(manager.subscriptions(), vec![DEFAULT_TOPIC.to_string()]);
    }

    #[tokio::test]
    async fn test_connection_lost_wins_over_pending_subscribe() {
        let (manager, mock, events) =
            connected(MockTransport::new().on_subscribe(Reply::Hold)).await;
        let late = manager.subscribe("alerts", QoS::AtLeastOnce).unwrap();

        events
            .send(TransportEvent::ConnectionLost {
                cause: "keep alive timeout".into(),
            })
            .unwrap();
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        // handshake subscription first, then ours
        mock.release_subscribe(Ok(()));
        mock.release_subscribe(Ok(()));

        assert_eq!(late.await, Err(SessionError::NotConnected));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.subscriptions().is_empty());
        assert_eq!(
            manager.status().stats.last_error.as_deref(),
            Some("keep alive timeout")
        );
    }

    #[tokio::test]
    async fn test_connection_lost_while_connecting_fails_waiters() {
        let (manager, mock, events) = setup(MockTransport::new().on_open(Reply::Hold));
        let pending = manager.connect().unwrap();

        events
            .send(TransportEvent::ConnectionLost {
                cause: "network unreachable".into(),
            })
            .unwrap();

        assert_eq!(
            pending.await,
            Err(SessionError::ConnectionLost("network unreachable".into()))
        );

        mock.release_open(Ok(()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_passes_through_disconnecting() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;

        let pending = manager.disconnect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnecting);

        assert_eq!(pending.await, Ok(()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.subscriptions().is_empty());
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn test_failed_disconnect_still_ends_disconnected() {
        let (manager, _mock, _events) = connected(
            MockTransport::new().on_close(Reply::Fail(TransportError::Connection("eof".into()))),
        )
        .await;

        let outcome = manager.disconnect().unwrap().await;

        assert!(outcome.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_late_publish_failure_after_disconnect_is_harmless() {
        let (manager, mock, _events) = setup(MockTransport::new().on_send(Reply::Hold));
        manager.connect().unwrap().await.unwrap();
        let publish = manager.publish_default("t", "m").unwrap();

        manager.disconnect().unwrap().await.unwrap();

        // handshake announcement first, then ours
        mock.release_send(Err(TransportError::Connection("connection closed".into())));
        mock.release_send(Err(TransportError::Connection("connection closed".into())));

        assert!(publish.await.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_repeats_handshake() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;
        manager.disconnect().unwrap().await.unwrap();

        manager.connect().unwrap().await.unwrap();

        assert_eq!(mock.open_calls(), 2);
        eventually(|| manager.subscriptions() == vec![DEFAULT_TOPIC.to_string()]).await;
    }

    #[tokio::test]
    async fn test_empty_payload_reaches_sink_as_marker() {
        let (manager, _mock, events) = connected(MockTransport::new()).await;
        let (sink, mut displayed) = ChannelSink::new();
        manager.set_sink(Arc::new(sink));

        events
            .send(TransportEvent::Message {
                topic: DEFAULT_TOPIC.into(),
                payload: Vec::new(),
            })
            .unwrap();
        events
            .send(TransportEvent::Message {
                topic: DEFAULT_TOPIC.into(),
                payload: b"Queda detectada".to_vec(),
            })
            .unwrap();

        let first = tokio::time::timeout(WAIT, displayed.recv()).await.unwrap();
        let second = tokio::time::timeout(WAIT, displayed.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some(EMPTY_MESSAGE));
        assert_eq!(second.as_deref(), Some("Queda detectada"));
    }

    #[tokio::test]
    async fn test_undecodable_payload_does_not_break_delivery() {
        let (manager, _mock, events) = connected(MockTransport::new()).await;
        let (sink, mut displayed) = ChannelSink::new();
        manager.set_sink(Arc::new(sink));

        events
            .send(TransportEvent::Message {
                topic: "t".into(),
                payload: vec![0xc3, 0x28],
            })
            .unwrap();
        events
            .send(TransportEvent::Message {
                topic: "t".into(),
                payload: b"ok".to_vec(),
            })
            .unwrap();

        let first = tokio::time::timeout(WAIT, displayed.recv()).await.unwrap();
        let second = tokio::time::timeout(WAIT, displayed.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some(EMPTY_MESSAGE));
        assert_eq!(second.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_message_without_sink_is_dropped() {
        let (manager, _mock, events) = connected(MockTransport::new()).await;
        let (sink, mut displayed) = ChannelSink::new();
        manager.set_sink(Arc::new(sink));
        manager.clear_sink();

        events
            .send(TransportEvent::Message {
                topic: "t".into(),
                payload: b"lost".to_vec(),
            })
            .unwrap();

        eventually(|| manager.status().stats.messages_received == 1).await;
        assert!(displayed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_timeout_resolves_hung_connect() {
        let (manager, _mock, _events) = setup_with(
            config().with_request_timeout(Some(Duration::from_millis(20))),
            MockTransport::new().on_open(Reply::Hold),
        );

        let outcome = manager.connect().unwrap().await;

        assert_eq!(
            outcome,
            Err(SessionError::Transport(TransportError::TimedOut(
                Duration::from_millis(20)
            )))
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_timed_out_connect_closes_transport() {
        let (manager, mock, _events) = setup_with(
            config().with_request_timeout(Some(Duration::from_millis(20))),
            MockTransport::new().on_open(Reply::Hold),
        );

        assert!(manager.connect().unwrap().await.is_err());
        assert_eq!(mock.calls().last(), Some(&Call::Close));

        // CONNACK arriving after the timeout
        mock.release_open(Ok(()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.subscriptions().is_empty());
        assert!(!mock
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Subscribe { .. } | Call::Send(_))));
    }

    #[tokio::test]
    async fn test_connect_while_disconnecting_supersedes_disconnect() {
        let (manager, mock, _events) = connected(MockTransport::new().on_close(Reply::Hold)).await;
        eventually(|| manager.subscriptions() == vec![DEFAULT_TOPIC.to_string()]).await;

        let disconnect = manager.disconnect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnecting);

        manager.connect().unwrap().await.unwrap();
        assert_eq!(mock.open_calls(), 2);
        assert_eq!(mock.calls().len(), 7);

        mock.release_close(Ok(()));
        assert_eq!(disconnect.await, Ok(()));

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.subscriptions(), vec![DEFAULT_TOPIC.to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_connect_in_flight() {
        let (manager, mock, _events) = setup(MockTransport::new().on_open(Reply::Hold));
        let pending = manager.connect().unwrap();

        manager.shutdown().await;

        assert_eq!(pending.await, Err(SessionError::NotConnected));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(mock.calls().last(), Some(&Call::Close));

        mock.release_open(Ok(()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.connect().unwrap_err(), SessionError::NotConnected);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_connected_session() {
        let (manager, mock, _events) = connected(MockTransport::new()).await;

        manager.shutdown().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn test_client_id_is_stable_and_unique() {
        let (first, _, _) = setup(MockTransport::new());
        let (second, _, _) = setup(MockTransport::new());

        assert!(first.client_id().starts_with(CLIENT_ID_PREFIX));
        assert_eq!(first.client_id(), first.clone().client_id());
        assert_ne!(first.client_id(), second.client_id());
    }
}
