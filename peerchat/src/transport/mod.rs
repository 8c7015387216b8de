//! Transport layer abstraction for `PeerChat`.
//!
//! The signaling/NAT-traversal machinery itself lives outside this
//! repository; what the core consumes is the abstract peer-connection
//! primitive defined here: a [`Connector`] that opens reliable, ordered,
//! message-oriented connections, each surfacing `open` / `data` /
//! `close` / `error` as [`ConnectionEvent`]s. Concrete implementations:
//! - [`loopback::LoopbackNetwork`] — in-process channel-based network
//!   for tests and the offline demo mode.

pub mod loopback;

use std::fmt;

use tokio::sync::mpsc;

/// Unique identifier for a peer in the network.
///
/// Opaque string assigned by the signaling service on registration.
/// Sole key for live sessions and persisted conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new peer identifier from a string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this peer ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classifies a connection failure for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The local network path is down or unreachable.
    NetworkUnreachable,
    /// The remote peer identifier is unknown or currently offline.
    PeerUnavailable,
    /// The remote signaling service reported an error.
    SignalingServer,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::PeerUnavailable => write!(f, "peer not found or unavailable"),
            Self::SignalingServer => write!(f, "signaling server error"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the peer has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The specified peer is not reachable via this transport.
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    /// The signaling service refused or dropped the operation.
    #[error("signaling error: {0}")]
    Signaling(String),
}

impl TransportError {
    /// Map this error onto the user-facing failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::ConnectionClosed => FailureKind::NetworkUnreachable,
            Self::Unreachable(_) => FailureKind::PeerUnavailable,
            Self::Signaling(_) => FailureKind::SignalingServer,
        }
    }
}

/// Lifecycle and data events emitted by one peer connection.
///
/// Delivery is reliable and ordered per connection. `Opened` always
/// precedes any `Data`; `Closed` and `Error` are terminal.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The connection is confirmed open and traffic may flow.
    Opened,
    /// A frame arrived from the remote peer.
    Data(Vec<u8>),
    /// The remote side closed the connection.
    Closed,
    /// The connection failed, classified by cause.
    Error(FailureKind),
}

/// Signaling-level events, distinct from per-connection events.
#[derive(Debug)]
pub enum SignalingEvent {
    /// A remote peer opened a connection to us.
    IncomingConnection(ConnectionHandle),
    /// The rendezvous service dropped our registration.
    Disconnected,
}

/// The sending half of a peer connection.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    peer: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ConnectionSender {
    /// Send one wire frame to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection
    /// is no longer live.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// The remote peer this sender delivers to.
    #[must_use]
    pub const fn peer(&self) -> &PeerId {
        &self.peer
    }
}

/// The receiving half of a peer connection.
#[derive(Debug)]
pub struct ConnectionEvents {
    rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionEvents {
    /// Wait for the next connection event.
    ///
    /// Returns `None` when the remote endpoint is gone; callers treat
    /// that the same as an explicit `Closed`.
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

/// One live (or in-progress) connection to a remote peer.
///
/// Emits [`ConnectionEvent`]s in order and accepts outbound frames.
#[derive(Debug)]
pub struct ConnectionHandle {
    peer: PeerId,
    sender: ConnectionSender,
    events: ConnectionEvents,
}

impl ConnectionHandle {
    /// Assemble a handle from its raw channel endpoints.
    ///
    /// Used by [`Connector`] implementations; the frames pushed into
    /// `event_rx` become this handle's event stream and frames sent via
    /// the handle surface on `outbound_tx`'s paired receiver.
    #[must_use]
    pub fn from_parts(
        peer: PeerId,
        outbound_tx: mpsc::Sender<Vec<u8>>,
        event_rx: mpsc::Receiver<ConnectionEvent>,
    ) -> Self {
        Self {
            sender: ConnectionSender {
                peer: peer.clone(),
                tx: outbound_tx,
            },
            events: ConnectionEvents { rx: event_rx },
            peer,
        }
    }

    /// The remote peer this handle is connected to.
    #[must_use]
    pub const fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Split into independently owned sending and receiving halves.
    #[must_use]
    pub fn split(self) -> (ConnectionSender, ConnectionEvents) {
        (self.sender, self.events)
    }
}

/// Async connector for opening peer connections through a signaling
/// service.
///
/// Implementations never interpret frame contents — encryption and
/// serialization happen above this boundary.
pub trait Connector: Send + Sync + 'static {
    /// Request a new connection to the given peer.
    ///
    /// Resolving `Ok` means the connection request was accepted by the
    /// signaling layer; the connection itself is usable once the
    /// returned handle emits [`ConnectionEvent::Opened`].
    fn open(
        &self,
        peer: &PeerId,
    ) -> impl std::future::Future<Output = Result<ConnectionHandle, TransportError>> + Send;

    /// Re-establish the registration with the signaling service after a
    /// [`SignalingEvent::Disconnected`].
    fn reconnect(&self)
    -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}
