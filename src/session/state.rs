use std::fmt;

use chrono::{DateTime, Local};

/// Connection lifecycle of the broker session.
///
/// ```text
/// Disconnected ──connect──► Connecting ──ok──► Connected ──disconnect──► Disconnecting
///      ▲                        │                  │                          │
///      ├────────failure─────────┘                  │                          │
///      ├──────────────connection lost──────────────┘                          │
///      └────────────────────────ok or failure─────────────────────────────────┘
/// ```
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters of the session.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

impl SessionStats {
    pub(crate) fn touch(&mut self) {
        self.last_activity = Some(Local::now());
    }

    pub(crate) fn record_error(&mut self, error: impl fmt::Display) {
        self.last_error = Some(error.to_string());
    }
}

/// Point-in-time view of the session for display.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub client_id: String,
    pub subscriptions: Vec<String>,
    pub stats: SessionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Disconnecting.to_string(), "Disconnecting");
    }

    #[test]
    fn test_stats_record_activity_and_errors() {
        let mut stats = SessionStats::default();
        stats.touch();
        stats.record_error("broker refused the request");
        assert!(stats.last_activity.is_some());
        assert_eq!(stats.last_error.as_deref(), Some("broker refused the request"));
    }
}
