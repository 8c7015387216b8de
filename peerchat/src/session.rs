//! Per-connection session state machine.
//!
//! Wraps one abstract peer connection and tracks its lifecycle:
//!
//! ```text
//! Connecting -> Ready          (on transport open; handshake sent)
//!            -> Failed         (on transport error)
//! Ready      -> Closed         (on transport close)
//! ```
//!
//! The handshake is informational, not blocking: the session becomes
//! `Ready` the moment the connection opens, before the peer's own
//! handshake arrives. A differing remote version produces a one-time
//! compatibility warning and nothing else.

use peerchat_proto::PROTOCOL_VERSION;
use peerchat_proto::codec::{self, CodecError};
use peerchat_proto::frame::Frame;

use crate::transport::{ConnectionSender, FailureKind, PeerId, TransportError};

/// Lifecycle states of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection requested, not yet confirmed open.
    Connecting,
    /// Bidirectional traffic flows.
    Ready,
    /// The transport closed; terminal.
    Closed,
    /// The transport errored before or during use; terminal.
    Failed,
}

/// Who initiated the connection. Drives the focus policy: outbound
/// connections take focus on open, inbound ones do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The local agent opened this connection.
    Initiator,
    /// The remote peer opened this connection.
    Acceptor,
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is not in the `Ready` state.
    #[error("session is {0:?}, not ready")]
    NotReady(SessionState),

    /// Wire encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The underlying transport rejected the frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What an inbound frame means to the layer above.
#[derive(Debug)]
pub enum InboundEvent {
    /// The peer announced a protocol version different from ours.
    /// Emitted at most once per session.
    VersionMismatch {
        /// The version string the peer announced.
        remote_version: String,
    },
    /// A payload frame for the receive pipeline.
    Payload(Frame),
}

/// One live connection to a remote peer, owned by the session manager.
pub struct ConnectionSession {
    peer: PeerId,
    role: SessionRole,
    state: SessionState,
    sender: ConnectionSender,
    remote_version: Option<String>,
    version_warned: bool,
}

impl ConnectionSession {
    /// Wrap a freshly requested connection. Starts in `Connecting`.
    #[must_use]
    pub const fn new(peer: PeerId, role: SessionRole, sender: ConnectionSender) -> Self {
        Self {
            peer,
            role,
            state: SessionState::Connecting,
            sender,
            remote_version: None,
            version_warned: false,
        }
    }

    /// Handle the transport `open` event.
    ///
    /// Transitions to `Ready` and sends the local version handshake.
    /// The transition happens first — the connection is usable even if
    /// the handshake send itself fails.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the handshake frame cannot be
    /// encoded or handed to the transport.
    pub async fn on_open(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Ready;
        let handshake = codec::encode(&Frame::version(PROTOCOL_VERSION))?;
        self.sender.send(handshake).await?;
        Ok(())
    }

    /// Interpret one decoded inbound frame.
    ///
    /// Handshake frames are consumed here; everything else is passed
    /// up as a payload. Returns `None` when the frame needs no action.
    pub fn on_frame(&mut self, frame: Frame) -> Option<InboundEvent> {
        match frame {
            Frame::Version(v) => {
                let mismatch = v.version != PROTOCOL_VERSION;
                self.remote_version = Some(v.version.clone());
                if mismatch && !self.version_warned {
                    self.version_warned = true;
                    return Some(InboundEvent::VersionMismatch {
                        remote_version: v.version,
                    });
                }
                None
            }
            payload => Some(InboundEvent::Payload(payload)),
        }
    }

    /// Handle the transport `close` event.
    pub const fn on_close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Handle the transport `error` event.
    pub const fn on_error(&mut self, _kind: FailureKind) {
        self.state = SessionState::Failed;
    }

    /// Encode and transmit one frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotReady`] unless the session is
    /// `Ready`, or the encoding/transport error otherwise.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady(self.state));
        }
        let bytes = codec::encode(frame)?;
        self.sender.send(bytes).await?;
        Ok(())
    }

    /// The remote peer of this session.
    #[must_use]
    pub const fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether traffic may flow.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Who initiated this connection.
    #[must_use]
    pub const fn role(&self) -> SessionRole {
        self.role
    }

    /// The protocol version the peer announced, once its handshake
    /// has arrived.
    #[must_use]
    pub fn remote_version(&self) -> Option<&str> {
        self.remote_version.as_deref()
    }
}
