//! Envelope codec for the two DSLink wire formats.
//!
//! | Format        | Frame kind | Encoding                               |
//! |---------------|------------|----------------------------------------|
//! | `json`        | text       | UTF-8 JSON object                      |
//! | `msgpack`     | binary     | MessagePack map with named fields      |
//!
//! The format is negotiated once per connection and never changes for its
//! lifetime.  Both encodings share the same shape, so the same optional-field
//! and unknown-field rules apply to each.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::envelope::Envelope;

/// The encoding used for every envelope on one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// JSON text, carried in WebSocket text frames.
    #[default]
    Json,
    /// MessagePack, carried in WebSocket binary frames.
    MessagePack,
}

impl WireFormat {
    /// Canonical negotiation name (`"json"` or `"msgpack"`).
    pub fn name(self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MessagePack => "msgpack",
        }
    }

    /// Parses a negotiation name, ignoring ASCII case.
    ///
    /// ```rust
    /// use dslink_core::WireFormat;
    ///
    /// assert_eq!(WireFormat::from_name("MsgPack"), Some(WireFormat::MessagePack));
    /// assert_eq!(WireFormat::from_name("xml"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("json") {
            Some(WireFormat::Json)
        } else if name.eq_ignore_ascii_case("msgpack") {
            Some(WireFormat::MessagePack)
        } else {
            None
        }
    }

    /// Whether envelopes in this format travel in binary frames.
    pub fn is_binary(self) -> bool {
        matches!(self, WireFormat::MessagePack)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during envelope encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The bytes are not a valid encoding of an envelope in this format.
    #[error("malformed {format} envelope: {reason}")]
    MalformedEnvelope { format: WireFormat, reason: String },

    /// The envelope carries nothing worth sending.
    #[error("refusing to encode an envelope with no requests, responses, or ack")]
    EmptyEnvelope,

    /// Two parties disagree about the connection's wire format.
    #[error("wire format mismatch: connection uses {expected}, got {actual}")]
    FormatMismatch {
        expected: WireFormat,
        actual: WireFormat,
    },

    /// The serializer rejected the envelope.
    #[error("failed to encode {format} envelope: {reason}")]
    Encode { format: WireFormat, reason: String },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] in `format`.
///
/// # Errors
///
/// Returns [`CodecError::EmptyEnvelope`] if the envelope carries no requests,
/// responses, or ack, and [`CodecError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use dslink_core::{encode_envelope, Envelope, WireFormat};
///
/// let bytes = encode_envelope(WireFormat::Json, &Envelope::ack(3)).unwrap();
/// assert_eq!(bytes, br#"{"ack":3}"#);
/// ```
pub fn encode_envelope(format: WireFormat, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if envelope.is_empty() {
        return Err(CodecError::EmptyEnvelope);
    }
    let encoded = match format {
        WireFormat::Json => serde_json::to_vec(envelope).map_err(|e| e.to_string()),
        // Named encoding writes a map, so missing optional fields decode as
        // `None` exactly as they do for JSON.
        WireFormat::MessagePack => rmp_serde::to_vec_named(envelope).map_err(|e| e.to_string()),
    };
    encoded.map_err(|reason| CodecError::Encode { format, reason })
}

/// Decodes one [`Envelope`] from `bytes` in `format`.
///
/// Missing optional fields decode as `None`; unknown top-level fields are
/// ignored.
///
/// # Errors
///
/// Returns [`CodecError::MalformedEnvelope`] for anything that is not an
/// envelope-shaped object: invalid syntax, a non-object top level,
/// non-object batch entries, or negative/non-integer `msg`/`ack` values.
///
/// # Examples
///
/// ```rust
/// use dslink_core::{decode_envelope, WireFormat};
///
/// let env = decode_envelope(WireFormat::Json, br#"{"msg":4,"responses":[]}"#).unwrap();
/// assert_eq!(env.msg, Some(4));
/// assert!(decode_envelope(WireFormat::Json, b"[1,2]").is_err());
/// ```
pub fn decode_envelope(format: WireFormat, bytes: &[u8]) -> Result<Envelope, CodecError> {
    let malformed = |reason: String| CodecError::MalformedEnvelope { format, reason };

    // Decode to a tree first: the derived struct visitor would otherwise
    // accept a top-level array as a positional envelope.
    let tree: Value = match format {
        WireFormat::Json => serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?,
        WireFormat::MessagePack => {
            rmp_serde::from_slice(bytes).map_err(|e| malformed(e.to_string()))?
        }
    };
    if !tree.is_object() {
        return Err(malformed(format!(
            "top level must be a map, got {}",
            value_kind(&tree)
        )));
    }
    serde_json::from_value(tree).map_err(|e| malformed(e.to_string()))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

/// A codec bound to one connection's negotiated [`WireFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodec {
    format: WireFormat,
}

impl EnvelopeCodec {
    /// Creates a codec for `format`.
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// The format this codec reads and writes.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// See [`encode_envelope`].
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        encode_envelope(self.format, envelope)
    }

    /// See [`decode_envelope`].
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        decode_envelope(self.format, bytes)
    }

    /// Fails with [`CodecError::FormatMismatch`] unless `other` is this
    /// codec's format.
    pub fn ensure_format(&self, other: WireFormat) -> Result<(), CodecError> {
        if other == self.format {
            Ok(())
        } else {
            Err(CodecError::FormatMismatch {
                expected: self.format,
                actual: other,
            })
        }
    }
}
