//! Inbound message protocol.
//!
//! Classifies raw channel text into a closed set of [`MessageKind`]s and
//! extracts typed payloads. Decoding never fails past this module: every
//! raw message yields exactly one [`InboundMessage`] for the session log,
//! plus an [`Outcome`] telling the controller what (if anything) to apply.
//!
//! # Wire format
//!
//! ```text
//! WebSocket connection established        -> Info (reserved marker prefix)
//! {"type":"image","data":"data:image/png;base64,..."}
//! {"type":"matrix_data","data":{"tempA":[[..]],"tempB":[[..]],"Ib":0.5,"start":10,"end":12}}
//! {"type":"progress"|"status"|"error","message":"..."}
//! anything else that parses as JSON       -> Other
//! anything else                           -> Unparseable
//! ```

// Rust guideline compliant 2026-02

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::constants::INFO_MARKER;
use crate::datauri;
use crate::matrix::MatrixBundle;

/// Single-message decode failures. Always non-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Image payload is not a `data:<mime>;<encoding>,<payload>` string.
    MalformedImagePayload(String),
    /// Image payload bytes failed to decode.
    MalformedImageBytes(String),
    /// Matrix payload is missing, not an object, or fails validation.
    MalformedMatrixPayload(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedImagePayload(msg) => write!(f, "Malformed image payload: {msg}"),
            Self::MalformedImageBytes(msg) => write!(f, "Malformed image bytes: {msg}"),
            Self::MalformedMatrixPayload(msg) => write!(f, "Malformed matrix payload: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Closed set of inbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Processed image (`type: "image"`).
    Image,
    /// Numeric side-channel (`type: "matrix_data"`).
    MatrixData,
    /// Progress text.
    Progress,
    /// Status text.
    Status,
    /// Server-reported error.
    Error,
    /// Plain text line starting with the reserved marker.
    Info,
    /// Text that is neither marked nor valid JSON.
    Unparseable,
    /// Any other JSON value, including unknown `type`s.
    Other,
}

impl MessageKind {
    /// Map an envelope `type` string to a kind.
    fn from_type(kind: &str) -> Self {
        match kind {
            "image" => Self::Image,
            "matrix_data" => Self::MatrixData,
            "progress" => Self::Progress,
            "status" => Self::Status,
            "error" => Self::Error,
            _ => Self::Other,
        }
    }

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::MatrixData => "matrix_data",
            Self::Progress => "progress",
            Self::Status => "status",
            Self::Error => "error",
            Self::Info => "info",
            Self::Unparseable => "unparseable",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the session message log.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Classified kind.
    pub kind: MessageKind,
    /// Human-readable text (info line, progress text, raw unparseable text).
    pub text: Option<String>,
    /// Kind-dependent payload; the full envelope for `Other`.
    pub payload: Option<Value>,
    /// Decode failure for this message, if any.
    pub diagnostic: Option<DecodeError>,
    /// When the message arrived on the channel.
    pub arrived_at: DateTime<Utc>,
}

/// Binary image extracted from an `image` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Declared MIME type.
    pub mime_type: String,
    /// Decoded bytes.
    pub bytes: Vec<u8>,
}

/// What the controller should apply after logging a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Log only.
    Logged,
    /// Replace the current output image.
    Image(ImagePayload),
    /// Replace the current matrix bundle.
    Matrices(MatrixBundle),
    /// Raise a user-visible notification with this text.
    Alert(String),
}

/// Result of decoding one raw message.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Log entry (always produced).
    pub message: InboundMessage,
    /// Effect to apply.
    pub outcome: Outcome,
}

impl Decoded {
    fn logged(message: InboundMessage) -> Self {
        Self {
            message,
            outcome: Outcome::Logged,
        }
    }
}

/// Classify and decode one raw channel message.
pub fn decode(raw: &str, arrived_at: DateTime<Utc>) -> Decoded {
    let mut message = InboundMessage {
        kind: MessageKind::Info,
        text: None,
        payload: None,
        diagnostic: None,
        arrived_at,
    };

    if raw.starts_with(INFO_MARKER) {
        message.text = Some(raw.to_string());
        return Decoded::logged(message);
    }

    let envelope: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Unparseable channel message ({e}): {raw}");
            message.kind = MessageKind::Unparseable;
            message.text = Some(raw.to_string());
            return Decoded::logged(message);
        }
    };

    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .map_or(MessageKind::Other, MessageKind::from_type);
    message.kind = kind;

    match kind {
        MessageKind::Image => decode_image(message, &envelope),
        MessageKind::MatrixData => decode_matrix(message, &envelope),
        MessageKind::Progress | MessageKind::Status | MessageKind::Error => {
            decode_text(message, &envelope)
        }
        _ => {
            message.payload = Some(envelope);
            Decoded::logged(message)
        }
    }
}

fn decode_image(mut message: InboundMessage, envelope: &Value) -> Decoded {
    let data = envelope.get("data");
    message.text = envelope_text(envelope);
    let result = match data.and_then(Value::as_str) {
        Some(text) => datauri::decode_image(text),
        None => Err(DecodeError::MalformedImagePayload(
            "image data is not a string".to_string(),
        )),
    };
    match result {
        Ok((mime_type, bytes)) => {
            log::debug!("Decoded {} bytes of {mime_type}", bytes.len());
            Decoded {
                message,
                outcome: Outcome::Image(ImagePayload { mime_type, bytes }),
            }
        }
        Err(e) => {
            log::warn!("Dropping image message: {e}");
            message.diagnostic = Some(e);
            Decoded::logged(message)
        }
    }
}

fn decode_matrix(mut message: InboundMessage, envelope: &Value) -> Decoded {
    message.text = envelope_text(envelope);
    let result = match envelope.get("data") {
        Some(data) => MatrixBundle::from_value(data),
        None => Err(DecodeError::MalformedMatrixPayload(
            "matrix data missing".to_string(),
        )),
    };
    message.payload = envelope.get("data").cloned();
    match result {
        Ok(bundle) => Decoded {
            message,
            outcome: Outcome::Matrices(bundle),
        },
        Err(e) => {
            log::warn!("Ignoring matrix message: {e}");
            message.diagnostic = Some(e);
            Decoded::logged(message)
        }
    }
}

fn decode_text(mut message: InboundMessage, envelope: &Value) -> Decoded {
    // `message` wins, otherwise fall back to a rendering of `data`.
    let text = envelope_text(envelope).or_else(|| {
        envelope.get("data").filter(|v| !v.is_null()).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    });
    message.text.clone_from(&text);
    message.payload = envelope.get("data").cloned();
    if message.kind == MessageKind::Error {
        let alert = text.unwrap_or_else(|| "Processing error".to_string());
        return Decoded {
            message,
            outcome: Outcome::Alert(alert),
        };
    }
    Decoded::logged(message)
}

fn envelope_text(envelope: &Value) -> Option<String> {
    envelope
        .get("message")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_info_marker_short_circuits() {
        let decoded = decode("WebSocket connection established", now());
        assert_eq!(decoded.message.kind, MessageKind::Info);
        assert_eq!(
            decoded.message.text.as_deref(),
            Some("WebSocket connection established")
        );
        assert_eq!(decoded.outcome, Outcome::Logged);
    }

    #[test]
    fn test_marker_wins_over_json_shape() {
        // Starts with the marker, so never parsed.
        let decoded = decode("WebSocket{\"type\":\"error\"}", now());
        assert_eq!(decoded.message.kind, MessageKind::Info);
    }

    #[test]
    fn test_plain_text_is_unparseable() {
        let decoded = decode("hello there", now());
        assert_eq!(decoded.message.kind, MessageKind::Unparseable);
        assert_eq!(decoded.message.text.as_deref(), Some("hello there"));
        assert_eq!(decoded.outcome, Outcome::Logged);
    }

    #[test]
    fn test_image_envelope() {
        let decoded = decode(
            r#"{"type":"image","data":"data:image/png;base64,iVBORw0KGgo="}"#,
            now(),
        );
        assert_eq!(decoded.message.kind, MessageKind::Image);
        match decoded.outcome {
            Outcome::Image(image) => {
                assert_eq!(image.mime_type, "image/png");
                assert_eq!(image.bytes.len(), 8);
            }
            other => panic!("expected image outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_image_without_scheme_is_diagnosed() {
        let decoded = decode(r#"{"type":"image","data":"iVBORw0KGgo="}"#, now());
        assert_eq!(decoded.message.kind, MessageKind::Image);
        assert!(matches!(
            decoded.message.diagnostic,
            Some(DecodeError::MalformedImagePayload(_))
        ));
        assert_eq!(decoded.outcome, Outcome::Logged);
    }

    #[test]
    fn test_image_with_bad_bytes_is_diagnosed() {
        let decoded = decode(r#"{"type":"image","data":"data:image/png;base64,!!!"}"#, now());
        assert!(matches!(
            decoded.message.diagnostic,
            Some(DecodeError::MalformedImageBytes(_))
        ));
    }

    #[test]
    fn test_matrix_envelope() {
        let decoded = decode(
            r#"{"type":"matrix_data","data":{"tempA":[[1,2],[3,4]],"tempB":[[0,0],[0,0]],"Ib":0.5,"start":10,"end":12}}"#,
            now(),
        );
        assert_eq!(decoded.message.kind, MessageKind::MatrixData);
        match decoded.outcome {
            Outcome::Matrices(bundle) => {
                assert!((bundle.bias - 0.5).abs() < f64::EPSILON);
                assert!((bundle.span() - 2.0).abs() < f64::EPSILON);
            }
            other => panic!("expected matrices, got {other:?}"),
        }
    }

    #[test]
    fn test_matrix_without_data_is_ignored() {
        let decoded = decode(r#"{"type":"matrix_data"}"#, now());
        assert_eq!(decoded.outcome, Outcome::Logged);
        assert!(decoded.message.diagnostic.is_some());

        let decoded = decode(r#"{"type":"matrix_data","data":"nope"}"#, now());
        assert_eq!(decoded.outcome, Outcome::Logged);
    }

    #[test]
    fn test_progress_prefers_message_over_data() {
        let decoded = decode(r#"{"type":"progress","message":"50%","data":0.5}"#, now());
        assert_eq!(decoded.message.kind, MessageKind::Progress);
        assert_eq!(decoded.message.text.as_deref(), Some("50%"));

        let decoded = decode(r#"{"type":"status","data":"queued"}"#, now());
        assert_eq!(decoded.message.kind, MessageKind::Status);
        assert_eq!(decoded.message.text.as_deref(), Some("queued"));
    }

    #[test]
    fn test_error_raises_alert() {
        let decoded = decode(r#"{"type":"error","message":"worker crashed"}"#, now());
        assert_eq!(decoded.message.kind, MessageKind::Error);
        assert_eq!(decoded.outcome, Outcome::Alert("worker crashed".to_string()));
    }

    #[test]
    fn test_unknown_type_keeps_envelope() {
        let raw = r#"{"type":"heartbeat","seq":3}"#;
        let decoded = decode(raw, now());
        assert_eq!(decoded.message.kind, MessageKind::Other);
        assert_eq!(
            decoded.message.payload,
            Some(serde_json::from_str::<Value>(raw).unwrap())
        );
    }

    #[test]
    fn test_json_without_type_is_other() {
        assert_eq!(decode("42", now()).message.kind, MessageKind::Other);
        assert_eq!(decode("[1,2]", now()).message.kind, MessageKind::Other);
        assert_eq!(decode(r#"{"type":7}"#, now()).message.kind, MessageKind::Other);
    }

    #[test]
    fn test_arrival_time_is_kept() {
        let at = now();
        assert_eq!(decode("whatever", at).message.arrived_at, at);
    }
}
