//! Inbound payload validation and outbound rendering

use std::fmt;
use std::str::FromStr;

use axum::extract::ws::Message;
use serde::Serialize;
use serde_json::Value;

use crate::error::{RelayError, Result};

/// Payload exactly as it arrived on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    Text(String),
    Binary(Vec<u8>),
}

/// How a validated payload is forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Forward the original frame untouched (text stays text, binary stays binary)
    #[default]
    Verbatim,
    /// Forward the compact re-serialization of the parsed JSON as a text frame
    Canonical,
}

impl PayloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbatim => "verbatim",
            Self::Canonical => "canonical",
        }
    }
}

impl FromStr for PayloadMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "verbatim" | "raw" => Ok(Self::Verbatim),
            "canonical" | "json" => Ok(Self::Canonical),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown payload mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that parsed as JSON. Lives for one relay.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    raw: RawPayload,
    value: Value,
}

impl RelayMessage {
    /// Validate a raw payload as JSON
    pub fn parse(raw: RawPayload) -> Result<Self> {
        let value = match &raw {
            RawPayload::Text(text) => serde_json::from_str(text)?,
            RawPayload::Binary(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(Self { raw, value })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn raw(&self) -> &RawPayload {
        &self.raw
    }

    /// Compact JSON text of the parsed value
    pub fn canonical(&self) -> String {
        self.value.to_string()
    }

    /// Build the frame every recipient of this relay receives
    pub fn render(&self, mode: PayloadMode) -> Message {
        match (mode, &self.raw) {
            (PayloadMode::Verbatim, RawPayload::Text(text)) => Message::Text(text.clone()),
            (PayloadMode::Verbatim, RawPayload::Binary(bytes)) => Message::Binary(bytes.clone()),
            (PayloadMode::Canonical, _) => Message::Text(self.canonical()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawPayload {
        RawPayload::Text(s.to_string())
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(RelayMessage::parse(text("42")).unwrap().value(), &Value::from(42));
        assert_eq!(
            RelayMessage::parse(text("65535")).unwrap().value(),
            &Value::from(65535)
        );
        assert!(RelayMessage::parse(text("\"hello\"")).is_ok());
        assert!(RelayMessage::parse(text("{\"bpm\": 72}")).is_ok());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["not json", "", "{", "42 43", "[1,"] {
            let err = RelayMessage::parse(text(bad)).unwrap_err();
            assert!(
                matches!(err, RelayError::MalformedPayload(_)),
                "expected malformed for {:?}",
                bad
            );
        }

        let err = RelayMessage::parse(RawPayload::Binary(vec![0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));
    }

    #[test]
    fn test_binary_payload_parses_as_json() {
        let msg = RelayMessage::parse(RawPayload::Binary(b"2".to_vec())).unwrap();
        assert_eq!(msg.value(), &Value::from(2));
    }

    #[test]
    fn test_verbatim_render_keeps_bytes_and_frame_kind() {
        let msg = RelayMessage::parse(text(" 42\n")).unwrap();
        match msg.render(PayloadMode::Verbatim) {
            Message::Text(t) => assert_eq!(t, " 42\n"),
            other => panic!("unexpected frame: {:?}", other),
        }

        let msg = RelayMessage::parse(RawPayload::Binary(b"72".to_vec())).unwrap();
        match msg.render(PayloadMode::Verbatim) {
            Message::Binary(b) => assert_eq!(b, b"72".to_vec()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_canonical_render_is_compact_text() {
        let msg = RelayMessage::parse(text(" 2 ")).unwrap();
        assert_eq!(msg.canonical(), "2");

        let msg = RelayMessage::parse(RawPayload::Binary(b"{ \"mode\" : 3 }".to_vec())).unwrap();
        match msg.render(PayloadMode::Canonical) {
            Message::Text(t) => assert_eq!(t, "{\"mode\":3}"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_payload_mode_from_str() {
        assert_eq!("verbatim".parse::<PayloadMode>().unwrap(), PayloadMode::Verbatim);
        assert_eq!(" Canonical ".parse::<PayloadMode>().unwrap(), PayloadMode::Canonical);
        assert!(matches!(
            "fancy".parse::<PayloadMode>(),
            Err(RelayError::InvalidConfig(_))
        ));
    }
}
