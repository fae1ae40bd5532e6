//! Self-describing text encoding for image payloads.
//!
//! Images travel through the job request and the channel as
//! `data:<mimeType>;<encoding>,<payload>` text. The MIME type is the text
//! between `data:` and the first `;`, the payload is everything after the
//! first `,`. Only the `base64` encoding is understood.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::protocol::DecodeError;

const SCHEME: &str = "data:";
const BASE64_ENCODING: &str = "base64";

/// Borrowed view of a parsed data URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    /// Declared MIME type, e.g. `image/png`.
    pub mime_type: &'a str,
    /// Declared encoding scheme, e.g. `base64`.
    pub encoding: &'a str,
    /// Encoded payload text.
    pub payload: &'a str,
}

impl<'a> DataUri<'a> {
    /// Split `text` into its MIME type, encoding and payload.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedImagePayload` if the `data:` prefix,
    /// the `;` separator or the `,` separator is missing.
    pub fn parse(text: &'a str) -> Result<Self, DecodeError> {
        let rest = text.strip_prefix(SCHEME).ok_or_else(|| {
            DecodeError::MalformedImagePayload("missing data: scheme prefix".to_string())
        })?;
        let (header, payload) = rest.split_once(',').ok_or_else(|| {
            DecodeError::MalformedImagePayload("missing ',' before payload".to_string())
        })?;
        let (mime_type, encoding) = header.split_once(';').ok_or_else(|| {
            DecodeError::MalformedImagePayload("missing ';' after MIME type".to_string())
        })?;
        if mime_type.is_empty() {
            return Err(DecodeError::MalformedImagePayload(
                "empty MIME type".to_string(),
            ));
        }
        Ok(Self {
            mime_type,
            encoding,
            payload,
        })
    }

    /// Decode the payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedImagePayload` for an encoding other
    /// than base64 and `DecodeError::MalformedImageBytes` when the base64
    /// text itself is invalid.
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        if !self.encoding.eq_ignore_ascii_case(BASE64_ENCODING) {
            return Err(DecodeError::MalformedImagePayload(format!(
                "unsupported encoding: {}",
                self.encoding
            )));
        }
        BASE64
            .decode(self.payload.trim())
            .map_err(|e| DecodeError::MalformedImageBytes(e.to_string()))
    }
}

/// Parse an image data URI and decode its bytes.
///
/// Returns the declared MIME type and the raw binary.
///
/// # Errors
///
/// Fails with `MalformedImagePayload` if the text is not an `image/*` data
/// URI and with `MalformedImageBytes` if the payload does not decode.
pub fn decode_image(text: &str) -> Result<(String, Vec<u8>), DecodeError> {
    let uri = DataUri::parse(text)?;
    if !uri.mime_type.starts_with("image/") {
        return Err(DecodeError::MalformedImagePayload(format!(
            "not an image MIME type: {}",
            uri.mime_type
        )));
    }
    let bytes = uri.decode()?;
    Ok((uri.mime_type.to_string(), bytes))
}

/// Encode `bytes` as a base64 data URI with the given MIME type.
#[must_use]
pub fn encode(mime_type: &str, bytes: &[u8]) -> String {
    format!("{SCHEME}{mime_type};{BASE64_ENCODING},{}", BASE64.encode(bytes))
}
