use std::time::Duration;

use rumqttc::QoS;

use crate::transport::Credentials;

/// Topic joined right after every successful connect.
pub const DEFAULT_TOPIC: &str = "/fogo360/falls";

/// Announcement published to [`DEFAULT_TOPIC`] after every successful connect.
pub const CONNECTED_ANNOUNCEMENT: &str = "Conexão com HiveMQ estabelecida com sucesso!";

/// QoS used when the caller does not pick one.
pub const DEFAULT_QOS: QoS = QoS::AtLeastOnce;

/// Prefix of the generated per-process client ID.
pub const CLIENT_ID_PREFIX: &str = "fogo360_";

/// Inputs a session is constructed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub broker_url: String,
    pub credentials: Credentials,
    /// How long a request may stay unresolved. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(broker_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            broker_url: broker_url.into(),
            credentials,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}
