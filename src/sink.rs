//! Display surfaces for arrived messages.
//!
//! The session calls [`Sink::display`] from its event task. A sink that lives
//! on another execution context (a UI thread, a render loop) must hand the text
//! over instead of touching that context directly; [`ChannelSink`] is the
//! building block for that.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Anything that accepts an arrived message for display.
pub trait Sink: Send + Sync + 'static {
    /// Fire and forget. Must not block the caller.
    fn display(&self, text: String);
}

/// Forwards every message into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn display(&self, text: String) {
        if self.tx.send(text).is_err() {
            debug!("Display surface is gone, dropping message");
        }
    }
}

/// Writes arrived messages to the log. Used when running without a window.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn display(&self, text: String) {
        info!(target: "fogo360::inbox", "{}", text);
    }
}
