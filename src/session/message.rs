use chrono::{DateTime, Local};

use super::error::SessionError;

/// Shown in place of a payload that is empty or cannot be decoded.
pub const EMPTY_MESSAGE: &str = "Mensagem vazia";

/// A message that arrived on a subscribed topic.
///
/// Transient: handed to the sink once and then dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    /// Decodes the payload as UTF-8 text.
    pub fn decode(&self) -> Result<String, SessionError> {
        if self.payload.is_empty() {
            return Err(self.malformed("empty payload"));
        }

        std::str::from_utf8(&self.payload)
            .map(str::to_owned)
            .map_err(|e| self.malformed(e))
    }

    fn malformed(&self, reason: impl ToString) -> SessionError {
        SessionError::MalformedMessage {
            topic: self.topic.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_payload() {
        let msg = InboundMessage::new("/fogo360/falls", "Queda detectada às 10:42");
        assert_eq!(msg.decode().unwrap(), "Queda detectada às 10:42");
    }

    #[test]
    fn test_empty_payload_is_malformed() {
        let msg = InboundMessage::new("/fogo360/falls", Vec::new());
        assert!(matches!(
            msg.decode(),
            Err(SessionError::MalformedMessage { ref topic, .. }) if topic == "/fogo360/falls"
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let msg = InboundMessage::new("t", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(
            msg.decode(),
            Err(SessionError::MalformedMessage { .. })
        ));
    }
}
