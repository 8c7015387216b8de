//! Wire frame types for the `PeerChat` protocol.
//!
//! Two structured shapes travel over a data channel: the version
//! handshake and the encrypted payload container. Everything else is an
//! opaque plaintext payload, carried as raw UTF-8 text. The structured
//! shapes serialize as JSON objects because the underlying transport is
//! object-oriented rather than byte-exact.

use serde::{Deserialize, Serialize};

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Version handshake, sent once when a connection opens.
    Version(VersionFrame),
    /// A sealed payload produced by the crypto envelope.
    Encrypted(EncryptedFrame),
    /// A plaintext payload, passed through untouched.
    Plain(String),
}

impl Frame {
    /// Builds a handshake frame carrying the given protocol version.
    #[must_use]
    pub fn version(version: impl Into<String>) -> Self {
        Self::Version(VersionFrame {
            version: version.into(),
        })
    }

    /// Builds a plaintext payload frame.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain(text.into())
    }
}

/// The handshake shape: `{"type":"version","version":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Handshake {
    /// The only handshake variant; the tag doubles as the frame marker.
    Version(VersionFrame),
}

/// Body of a version handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFrame {
    /// Sender's protocol version string.
    pub version: String,
}

/// The sealed-payload shape: `{"iv":[..],"data":[..]}`.
///
/// `iv` is the per-message nonce, `data` the AEAD ciphertext (including
/// the authentication tag). Unknown fields are rejected so that
/// arbitrary JSON text is not mistaken for a sealed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedFrame {
    /// Nonce used to seal this payload. Never reused for a given key.
    pub iv: Vec<u8>,
    /// Ciphertext bytes, authentication tag included.
    pub data: Vec<u8>,
}
