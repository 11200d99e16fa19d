//! # Display Surface
//!
//! eframe/egui window showing the session status and the last arrived message.
//!
//! Messages reach the window through [`EguiSink`]: the session's event task
//! pushes the text into a channel and asks egui for a repaint, and the UI thread
//! drains the channel at the start of the next frame. The session never touches
//! UI state directly.
//!
//! ```text
//! SessionManager ──display(text)──► EguiSink ──mpsc──► MessageBoard::update (UI thread)
//!                                       └──request_repaint()──┘
//! ```

pub mod common;

use std::sync::Arc;

use egui::RichText;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::session::{ConnectionState, SessionManager};
use crate::sink::Sink;
use common::{create_frame, status_color, UiColors};

const PLACEHOLDER: &str = "Waiting for messages...";

/// Sink that hands arrived messages over to the egui thread.
pub struct EguiSink {
    tx: mpsc::UnboundedSender<String>,
    ctx: egui::Context,
}

impl EguiSink {
    pub fn new(ctx: egui::Context) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, ctx }, rx)
    }
}

impl Sink for EguiSink {
    fn display(&self, text: String) {
        if self.tx.send(text).is_ok() {
            self.ctx.request_repaint();
        } else {
            debug!("Message board closed, dropping message");
        }
    }
}

pub struct MessageBoard {
    manager: SessionManager,
    messages: mpsc::UnboundedReceiver<String>,
    state: watch::Receiver<ConnectionState>,
    last_message: Option<String>,
    notice: Option<String>,
}

impl MessageBoard {
    /// Builds the window and registers it as the session's sink.
    pub fn new(cc: &eframe::CreationContext<'_>, manager: SessionManager, runtime: Handle) -> Self {
        let (sink, messages) = EguiSink::new(cc.egui_ctx.clone());
        manager.set_sink(Arc::new(sink));

        // Repaint on state changes even when no message arrives
        let mut state_changes = manager.watch_state();
        let ctx = cc.egui_ctx.clone();
        runtime.spawn(async move {
            while state_changes.changed().await.is_ok() {
                ctx.request_repaint();
            }
        });

        Self {
            state: manager.watch_state(),
            manager,
            messages,
            last_message: None,
            notice: None,
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(text) = self.messages.try_recv() {
            self.last_message = Some(text);
        }
    }

    /// Only offered while disconnected, so the advisory AlreadyConnected
    /// answer cannot come back here.
    fn request_connect(&mut self) {
        self.notice = match self.manager.connect() {
            // The session logs the outcome
            Ok(_pending) => None,
            Err(e) => {
                warn!("Connect request rejected: {}", e);
                Some(e.to_string())
            }
        };
    }
}

impl eframe::App for MessageBoard {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_messages();
        let state = *self.state.borrow();

        egui::CentralPanel::default()
            .frame(create_frame(UiColors::MAIN_BG, UiColors::BORDER))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.heading("Fogo360");
                    ui.colored_label(status_color(state), "\u{2B24}");
                    ui.label(state.as_str());
                });
                ui.label(format!("Broker: {}", self.manager.broker_url()));
                ui.separator();

                create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
                    ui.set_min_width(ui.available_width());
                    let text = self.last_message.as_deref().unwrap_or(PLACEHOLDER);
                    ui.label(RichText::new(text).size(22.0));
                });

                let received = self.manager.status().stats.messages_received;
                ui.label(format!("Messages received: {}", received));

                if state == ConnectionState::Disconnected && ui.button("Connect").clicked() {
                    self.request_connect();
                }
                if let Some(notice) = &self.notice {
                    ui.small(notice.as_str());
                }
            });
    }
}
