//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means "these bytes or values don't fit the
//! protocol": serialization failed, a message was malformed, or an
//! interface descriptor breaks its own rules.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes or JSON).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes or JSON into a Rust value).
    ///
    /// Common causes: malformed JSON, missing fields, or an argument of
    /// the wrong type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is well-formed but breaks a protocol rule, e.g. an
    /// argument index past the end of the argument list.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A capability interface descriptor is inconsistent.
    #[error("invalid interface {interface}: {reason}")]
    InvalidInterface {
        interface: &'static str,
        reason: String,
    },
}
