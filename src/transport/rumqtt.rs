//! # rumqttc Transport
//!
//! Production [`Transport`] built on rumqttc's `AsyncClient`/`EventLoop` pair.
//!
//! Each `open` creates a fresh client and spawns a driver task that owns the
//! event loop. The driver correlates protocol acknowledgements with the
//! completions handed in by the session:
//!
//! ```text
//! try_publish ──► queued ──Outgoing::Publish(pkid)──► inflight ──PubAck(pkid)──► resolved
//! try_subscribe ► queued ──Outgoing::Subscribe(pkid)► inflight ──SubAck(pkid)──► resolved
//! ```
//!
//! rumqttc writes requests in the order they were queued, so the queued lists are
//! FIFO and are only pushed while the tracker lock is held.
//!
//! The driver never reconnects. After CONNACK, the first event loop error is
//! reported as [`TransportEvent::ConnectionLost`] and the driver stops; whatever
//! is still outstanding is failed so every completion resolves exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    BrokerAddress, Completion, ConnectOptions, Envelope, EventSender, Transport, TransportError,
    TransportEvent,
};

/// Client tuning that is not part of the session itself.
#[derive(Clone, Debug)]
pub struct RumqttSettings {
    /// Keep-alive interval negotiated with the broker
    pub keep_alive: Duration,
    /// Capacity of rumqttc's request channel
    pub channel_capacity: usize,
}

impl Default for RumqttSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            channel_capacity: 10,
        }
    }
}

pub struct RumqttTransport {
    settings: RumqttSettings,
    events: EventSender,
    runtime: Handle,
    link: Arc<Mutex<Option<Link>>>,
}

/// The currently open client and the driver that serves it.
struct Link {
    client: AsyncClient,
    tracker: Arc<Mutex<AckTracker>>,
    cancel: CancellationToken,
}

impl RumqttTransport {
    /// Creates the transport. Must be called from within a Tokio runtime, the
    /// driver tasks are spawned onto it.
    pub fn new(settings: RumqttSettings, events: EventSender) -> Self {
        Self {
            settings,
            events,
            runtime: Handle::current(),
            link: Arc::new(Mutex::new(None)),
        }
    }

    fn mqtt_options(
        &self,
        options: &ConnectOptions,
        address: &BrokerAddress,
    ) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), address.host.clone(), address.port);
        mqtt_options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(true);

        if !options.credentials.is_empty() {
            mqtt_options.set_credentials(
                options.credentials.username.clone(),
                options.credentials.password.clone(),
            );
        }

        if address.tls {
            mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        mqtt_options
    }
}

impl Transport for RumqttTransport {
    fn open(&self, options: &ConnectOptions, done: Completion) {
        let address = match BrokerAddress::parse(&options.broker_url) {
            Ok(address) => address,
            Err(e) => {
                warn!("Refusing to open connection: {}", e);
                done.fail(e.into());
                return;
            }
        };

        info!("Opening broker connection to {} as {}", address, options.client_id);
        let (client, event_loop) = AsyncClient::new(
            self.mqtt_options(options, &address),
            self.settings.channel_capacity,
        );

        let tracker = Arc::new(Mutex::new(AckTracker::opening(done)));
        let cancel = CancellationToken::new();

        let previous = lock(&self.link).replace(Link {
            client,
            tracker: Arc::clone(&tracker),
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            debug!("Replacing a still running driver");
            previous.cancel.cancel();
        }

        self.runtime.spawn(drive(
            event_loop,
            tracker,
            self.events.clone(),
            cancel,
            Arc::clone(&self.link),
        ));
    }

    fn send(&self, envelope: Envelope, done: Completion) {
        let link = lock(&self.link);
        let Some(link) = link.as_ref() else {
            done.fail(TransportError::Connection("no open connection".into()));
            return;
        };

        let mut tracker = lock(&link.tracker);
        tracker.queued_publishes.push_back((envelope.qos, done));
        if let Err(e) = link.client.try_publish(
            envelope.topic,
            envelope.qos,
            envelope.retained,
            envelope.payload,
        ) {
            if let Some((_, done)) = tracker.queued_publishes.pop_back() {
                done.fail(TransportError::Client(e.to_string()));
            }
        }
    }

    fn add_subscription(&self, topic: &str, qos: QoS, done: Completion) {
        let link = lock(&self.link);
        let Some(link) = link.as_ref() else {
            done.fail(TransportError::Connection("no open connection".into()));
            return;
        };

        let mut tracker = lock(&link.tracker);
        tracker.queued_subscribes.push_back(done);
        if let Err(e) = link.client.try_subscribe(topic, qos) {
            if let Some(done) = tracker.queued_subscribes.pop_back() {
                done.fail(TransportError::Client(e.to_string()));
            }
        }
    }

    fn close(&self, done: Completion) {
        let link = lock(&self.link);
        let Some(link) = link.as_ref() else {
            debug!("Close requested without an open connection");
            done.succeed();
            return;
        };

        let mut tracker = lock(&link.tracker);
        tracker.close = Some(done);
        if let Err(e) = link.client.try_disconnect() {
            warn!("Could not queue DISCONNECT, tearing the connection down: {}", e);
            if let Some(done) = tracker.close.take() {
                done.fail(TransportError::Client(e.to_string()));
            }
            link.cancel.cancel();
        }
    }
}

/// What the driver does after an event was applied to the tracker.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Emit(TransportEvent),
    Stop(Option<TransportEvent>),
}

/// Outstanding completions of one connection.
#[derive(Default)]
struct AckTracker {
    open: Option<Completion>,
    close: Option<Completion>,
    queued_publishes: VecDeque<(QoS, Completion)>,
    queued_subscribes: VecDeque<Completion>,
    inflight_publishes: HashMap<u16, Completion>,
    inflight_subscribes: HashMap<u16, Completion>,
}

impl AckTracker {
    fn opening(done: Completion) -> Self {
        Self {
            open: Some(done),
            ..Default::default()
        }
    }

    fn handle(&mut self, event: Event) -> Step {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                let Some(open) = self.open.take() else {
                    return Step::Continue;
                };
                if ack.code == ConnectReturnCode::Success {
                    open.succeed();
                    Step::Continue
                } else {
                    open.fail(TransportError::Refused(format!("{:?}", ack.code)));
                    Step::Stop(None)
                }
            }
            Event::Incoming(Packet::Publish(publish)) => Step::Emit(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Event::Incoming(Packet::PubAck(ack)) => {
                self.resolve_publish(ack.pkid);
                Step::Continue
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                self.resolve_publish(comp.pkid);
                Step::Continue
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if let Some(done) = self.inflight_subscribes.remove(&ack.pkid) {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        done.fail(TransportError::Refused("subscription rejected".into()));
                    } else {
                        done.succeed();
                    }
                }
                Step::Continue
            }
            Event::Incoming(Packet::Disconnect) => Step::Stop(Some(TransportEvent::ConnectionLost {
                cause: "disconnected by broker".into(),
            })),
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                if let Some((qos, done)) = self.queued_publishes.pop_front() {
                    if qos == QoS::AtMostOnce {
                        done.succeed();
                    } else {
                        self.inflight_publishes.insert(pkid, done);
                    }
                }
                Step::Continue
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                if let Some(done) = self.queued_subscribes.pop_front() {
                    self.inflight_subscribes.insert(pkid, done);
                }
                Step::Continue
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                if let Some(done) = self.close.take() {
                    done.succeed();
                }
                Step::Stop(None)
            }
            other => {
                trace!("Unhandled event: {:?}", other);
                Step::Continue
            }
        }
    }

    fn resolve_publish(&mut self, pkid: u16) {
        match self.inflight_publishes.remove(&pkid) {
            Some(done) => done.succeed(),
            None => trace!("Acknowledgement for unknown packet id {}", pkid),
        }
    }

    /// Applies an event loop error. Before CONNACK it fails the open request,
    /// while closing it fails the close request, otherwise the connection was lost.
    fn on_error(&mut self, cause: String) -> Option<TransportEvent> {
        if let Some(open) = self.open.take() {
            open.fail(TransportError::Connection(cause));
            None
        } else if let Some(close) = self.close.take() {
            close.fail(TransportError::Connection(cause));
            None
        } else {
            Some(TransportEvent::ConnectionLost { cause })
        }
    }

    fn fail_all(&mut self, error: TransportError) {
        let open = self.open.take();
        let close = self.close.take();
        let queued_publishes = self.queued_publishes.drain(..).map(|(_, done)| done);
        let queued_subscribes = self.queued_subscribes.drain(..);
        let inflight_publishes = self.inflight_publishes.drain().map(|(_, done)| done);
        let inflight_subscribes = self.inflight_subscribes.drain().map(|(_, done)| done);

        open.into_iter()
            .chain(close)
            .chain(queued_publishes)
            .chain(queued_subscribes)
            .chain(inflight_publishes)
            .chain(inflight_subscribes)
            .for_each(|done| done.fail(error.clone()));
    }
}

async fn drive(
    mut event_loop: EventLoop,
    tracker: Arc<Mutex<AckTracker>>,
    events: EventSender,
    cancel: CancellationToken,
    link: Arc<Mutex<Option<Link>>>,
) {
    debug!("Driver started");
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Driver cancelled");
                break;
            }
            polled = event_loop.poll() => polled,
        };

        let step = match polled {
            Ok(event) => lock(&tracker).handle(event),
            Err(e) => Step::Stop(lock(&tracker).on_error(e.to_string())),
        };

        match step {
            Step::Continue => {}
            Step::Emit(event) => emit(&events, event),
            Step::Stop(event) => {
                if let Some(event) = event {
                    emit(&events, event);
                }
                break;
            }
        }
    }

    lock(&tracker).fail_all(TransportError::Connection("connection closed".into()));

    let mut link = lock(&link);
    if link
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(&current.tracker, &tracker))
    {
        *link = None;
    }
    debug!("Driver stopped");
}

fn emit(events: &EventSender, event: TransportEvent) {
    if events.send(event).is_err() {
        debug!("Session is gone, dropping transport event");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
