//! Fogo360 broker client.
//!
//! Keeps one publish/subscribe session with the broker and shows what arrives
//! on a display surface.
//!
//! 1. [`session`] - Connection lifecycle, subscriptions and the completion protocol
//! 2. [`transport`] - Broker client capability and its rumqttc implementation
//! 3. [`sink`] - Where arrived messages go
//! 4. [`ui`] - Window showing the session and the last message
//! 5. [`config`] - File and environment configuration

pub mod config;
pub mod session;
pub mod sink;
pub mod transport;
pub mod ui;
