#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-wire/src/lib.rs
// ============================================================================
// Module: Wire Envelope
// Description: Length-prefixed binary envelope wrapping a typed payload.
// Purpose: Give every log topic (§6) one on-the-wire shape: a content-type
//          byte, a schema-version field, and a length-prefixed body, so a
//          consumer can reject a payload it does not understand before
//          attempting to decode the body.
// Dependencies: bytes, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Topic payloads are never raw JSON on the wire: every message is wrapped
//! in an [`Envelope`] so a consumer can distinguish "I don't understand this
//! content type" (poison message, skip and count) from "the body failed to
//! parse" (also poison, but a different failure mode worth separate
//! counters).
//!
//! Evolution rules (§6): schema versions are never reused, and new fields on
//! a body type are added as `Option`/`#[serde(default)]` so an older
//! consumer can still decode a newer producer's message by ignoring fields
//! it does not know about.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Content type carried in the envelope header. Only one variant exists
/// today; the byte is on the wire so a future binary codec can be
/// introduced without changing the envelope shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// Body is a UTF-8 JSON document.
    Json = 0,
}

impl ContentType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors raised while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before a complete envelope could be read.
    #[error("truncated envelope: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum bytes required to continue parsing.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
    /// The content-type byte did not match a known [`ContentType`].
    #[error("unrecognized content type byte: {0}")]
    UnrecognizedContentType(u8),
    /// The body's schema version is higher than this consumer understands.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(u16),
    /// The body failed to deserialize as the expected type.
    #[error("body decode failed: {0}")]
    BodyDecode(#[from] serde_json::Error),
}

const HEADER_LEN: usize = 1 /* content type */ + 2 /* schema version */ + 4 /* body length */;

/// A decoded envelope: header fields plus the still-undecoded body bytes.
/// Splitting decode into "parse header" and "decode body" lets a consumer
/// reject an unsupported schema version without paying for a JSON parse.
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    /// Content type of the body.
    pub content_type: ContentType,
    /// Schema version of the body.
    pub schema_version: u16,
    /// Raw body bytes (not yet deserialized).
    pub body: Bytes,
}

impl RawEnvelope {
    /// Encodes a typed body into a length-prefixed envelope.
    ///
    /// # Errors
    /// Returns [`WireError::BodyDecode`] if `body` fails to serialize (this
    /// wraps a [`serde_json::Error`], which also covers serialization
    /// failures despite the variant's decode-oriented name).
    pub fn encode<T: Serialize>(schema_version: u16, body: &T) -> Result<Bytes, WireError> {
        let body_bytes = serde_json::to_vec(body)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_bytes.len());
        buf.put_u8(ContentType::Json as u8);
        buf.put_u16(schema_version);
        buf.put_u32(body_bytes.len() as u32);
        buf.put_slice(&body_bytes);
        Ok(buf.freeze())
    }

    /// Parses the envelope header and slices out the body without
    /// deserializing it.
    ///
    /// # Errors
    /// Returns [`WireError::Truncated`] if `data` is shorter than the
    /// header declares, or [`WireError::UnrecognizedContentType`] for an
    /// unknown content-type byte.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }
        let mut cursor = data;
        let content_type_byte = cursor.get_u8();
        let content_type = ContentType::from_byte(content_type_byte)
            .ok_or(WireError::UnrecognizedContentType(content_type_byte))?;
        let schema_version = cursor.get_u16();
        let body_len = cursor.get_u32() as usize;
        if cursor.len() < body_len {
            return Err(WireError::Truncated {
                expected: HEADER_LEN + body_len,
                actual: data.len(),
            });
        }
        Ok(Self {
            content_type,
            schema_version,
            body: Bytes::copy_from_slice(&cursor[..body_len]),
        })
    }

    /// Decodes the body as `T`, rejecting a schema version newer than
    /// `max_supported_schema_version`.
    ///
    /// # Errors
    /// Returns [`WireError::UnsupportedSchemaVersion`] or
    /// [`WireError::BodyDecode`].
    pub fn decode<T: DeserializeOwned>(
        &self,
        max_supported_schema_version: u16,
    ) -> Result<T, WireError> {
        if self.schema_version > max_supported_schema_version {
            return Err(WireError::UnsupportedSchemaVersion(self.schema_version));
        }
        let ContentType::Json = self.content_type;
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_a_body() {
        let body = Sample { a: 7, b: "hi".to_string() };
        let encoded = RawEnvelope::encode(1, &body).expect("encode");
        let raw = RawEnvelope::parse(&encoded).expect("parse");
        assert_eq!(raw.schema_version, 1);
        let decoded: Sample = raw.decode(1).expect("decode");
        assert_eq!(decoded, body);
    }

    #[test]
    fn rejects_newer_schema_version() {
        let body = Sample { a: 1, b: "x".to_string() };
        let encoded = RawEnvelope::encode(5, &body).expect("encode");
        let raw = RawEnvelope::parse(&encoded).expect("parse");
        let err = raw.decode::<Sample>(4).unwrap_err();
        assert!(matches!(err, WireError::UnsupportedSchemaVersion(5)));
    }

    #[test]
    fn rejects_truncated_header() {
        let err = RawEnvelope::parse(&[0, 1]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }
}
