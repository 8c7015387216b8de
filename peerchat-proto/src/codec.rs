//! Encoding and decoding for the `PeerChat` wire protocol.
//!
//! Handshake and encrypted frames are JSON objects; plaintext payloads
//! travel as raw UTF-8 text. Decoding therefore probes the structured
//! shapes first and falls back to treating the bytes as opaque text.
//! A frame that matches none of the shapes (not even valid UTF-8) is a
//! [`CodecError`], which callers log as a warning — a malformed frame
//! never tears a connection down.

use crate::frame::{EncryptedFrame, Frame, Handshake};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization of a structured frame failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The bytes match no known frame shape.
    #[error("unrecognized frame: {0}")]
    UnrecognizedFrame(String),
}

/// Encodes a [`Frame`] into wire bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if a structured frame cannot be
/// serialized to JSON.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    match frame {
        Frame::Version(v) => serde_json::to_vec(&Handshake::Version(v.clone()))
            .map_err(|e| CodecError::Serialization(e.to_string())),
        Frame::Encrypted(sealed) => {
            serde_json::to_vec(sealed).map_err(|e| CodecError::Serialization(e.to_string()))
        }
        Frame::Plain(text) => Ok(text.clone().into_bytes()),
    }
}

/// Decodes wire bytes into a [`Frame`].
///
/// Probe order matters: a handshake object decodes as `Version`, a
/// sealed container as `Encrypted`, and any remaining valid UTF-8 is an
/// opaque `Plain` payload.
///
/// # Errors
///
/// Returns `CodecError::UnrecognizedFrame` if the bytes are neither a
/// structured frame nor valid UTF-8 text.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if let Ok(Handshake::Version(v)) = serde_json::from_slice::<Handshake>(bytes) {
        return Ok(Frame::Version(v));
    }
    if let Ok(sealed) = serde_json::from_slice::<EncryptedFrame>(bytes) {
        return Ok(Frame::Encrypted(sealed));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Frame::Plain(text.to_string())),
        Err(e) => Err(CodecError::UnrecognizedFrame(format!(
            "{} byte frame is not a known object shape or UTF-8 text: {e}",
            bytes.len()
        ))),
    }
}
