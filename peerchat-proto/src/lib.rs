//! Shared protocol definitions for the `PeerChat` wire format.

pub mod codec;
pub mod frame;

/// Protocol version announced in every handshake frame.
///
/// The handshake is informational: peers with differing versions keep
/// talking, but the mismatch is surfaced to the user once per connection.
pub const PROTOCOL_VERSION: &str = "1.0.2";
