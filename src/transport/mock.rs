//! Recording transport for tests.
//!
//! Records every request and either resolves it on the spot or holds its
//! completion until the test releases it.

use std::collections::VecDeque;
use std::sync::Mutex;

use rumqttc::QoS;

use super::{Completion, ConnectOptions, Envelope, Transport, TransportError, TransportResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Open(ConnectOptions),
    Send(Envelope),
    Subscribe { topic: String, qos: QoS },
    Close,
}

/// How the mock answers a kind of request.
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    Succeed,
    Fail(TransportError),
    Hold,
}

#[derive(Default)]
struct Held {
    open: VecDeque<Completion>,
    send: VecDeque<Completion>,
    subscribe: VecDeque<Completion>,
    close: VecDeque<Completion>,
}

pub(crate) struct MockTransport {
    calls: Mutex<Vec<Call>>,
    held: Mutex<Held>,
    open: Reply,
    send: Reply,
    subscribe: Reply,
    close: Reply,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            held: Mutex::new(Held::default()),
            open: Reply::Succeed,
            send: Reply::Succeed,
            subscribe: Reply::Succeed,
            close: Reply::Succeed,
        }
    }

    pub(crate) fn on_open(mut self, reply: Reply) -> Self {
        self.open = reply;
        self
    }

    pub(crate) fn on_send(mut self, reply: Reply) -> Self {
        self.send = reply;
        self
    }

    pub(crate) fn on_subscribe(mut self, reply: Reply) -> Self {
        self.subscribe = reply;
        self
    }

    pub(crate) fn on_close(mut self, reply: Reply) -> Self {
        self.close = reply;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn open_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Open(_)))
            .count()
    }

    pub(crate) fn release_open(&self, result: TransportResult) {
        let done = self.held.lock().unwrap().open.pop_front();
        done.expect("no held open request").resolve(result);
    }

    pub(crate) fn release_send(&self, result: TransportResult) {
        let done = self.held.lock().unwrap().send.pop_front();
        done.expect("no held send request").resolve(result);
    }

    pub(crate) fn release_subscribe(&self, result: TransportResult) {
        let done = self.held.lock().unwrap().subscribe.pop_front();
        done.expect("no held subscribe request").resolve(result);
    }

    pub(crate) fn release_close(&self, result: TransportResult) {
        let done = self.held.lock().unwrap().close.pop_front();
        done.expect("no held close request").resolve(result);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn answer(
        &self,
        reply: &Reply,
        done: Completion,
        hold: impl FnOnce(&mut Held) -> &mut VecDeque<Completion>,
    ) {
        match reply {
            Reply::Succeed => done.succeed(),
            Reply::Fail(error) => done.fail(error.clone()),
            Reply::Hold => {
                let mut held = self.held.lock().unwrap();
                hold(&mut *held).push_back(done);
            }
        }
    }
}

impl Transport for MockTransport {
    fn open(&self, options: &ConnectOptions, done: Completion) {
        self.record(Call::Open(options.clone()));
        self.answer(&self.open, done, |held| &mut held.open);
    }

    fn send(&self, envelope: Envelope, done: Completion) {
        self.record(Call::Send(envelope));
        self.answer(&self.send, done, |held| &mut held.send);
    }

    fn add_subscription(&self, topic: &str, qos: QoS, done: Completion) {
        self.record(Call::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        self.answer(&self.subscribe, done, |held| &mut held.subscribe);
    }

    fn close(&self, done: Completion) {
        self.record(Call::Close);
        self.answer(&self.close, done, |held| &mut held.close);
    }
}
