//! Loopback network for testing and offline demo mode.
//!
//! Simulates a rendezvous service plus data channels entirely in
//! process, backed by [`tokio::sync::mpsc`] channels. Peers register
//! with the [`LoopbackNetwork`] and receive a [`LoopbackConnector`]
//! plus a stream of [`SignalingEvent`]s; opening a connection pipes
//! frames between the two endpoints with reliable, ordered delivery.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    ConnectionEvent, ConnectionHandle, Connector, PeerId, SignalingEvent, TransportError,
};

/// Default per-direction channel capacity.
const DEFAULT_CAPACITY: usize = 32;

/// One registered peer's signaling inbox and failure switches.
struct PeerSlot {
    signaling: mpsc::Sender<SignalingEvent>,
    reconnect_fails: bool,
}

/// In-process rendezvous service shared by all loopback connectors.
#[derive(Clone)]
pub struct LoopbackNetwork {
    peers: Arc<Mutex<HashMap<PeerId, PeerSlot>>>,
    capacity: usize,
}

impl LoopbackNetwork {
    /// Create an empty network with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty network with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Register a peer and return its connector plus signaling events.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Signaling`] if the identifier is
    /// already registered — peer IDs are unique per network.
    pub fn register(
        &self,
        peer: PeerId,
    ) -> Result<(LoopbackConnector, mpsc::Receiver<SignalingEvent>), TransportError> {
        let (signaling_tx, signaling_rx) = mpsc::channel(self.capacity);
        let mut peers = self.peers.lock();
        if peers.contains_key(&peer) {
            return Err(TransportError::Signaling(format!(
                "peer id {peer} already registered"
            )));
        }
        peers.insert(
            peer.clone(),
            PeerSlot {
                signaling: signaling_tx,
                reconnect_fails: false,
            },
        );
        drop(peers);

        let connector = LoopbackConnector {
            local: peer,
            peers: Arc::clone(&self.peers),
            capacity: self.capacity,
        };
        Ok((connector, signaling_rx))
    }

    /// Simulate the rendezvous service dropping a peer's registration.
    ///
    /// The peer receives [`SignalingEvent::Disconnected`]; its live
    /// data channels are unaffected, matching real signaling loss.
    pub fn drop_signaling(&self, peer: &PeerId) {
        let peers = self.peers.lock();
        if let Some(slot) = peers.get(peer) {
            let _ = slot.signaling.try_send(SignalingEvent::Disconnected);
        }
    }

    /// Make subsequent [`Connector::reconnect`] calls for `peer` fail.
    pub fn set_reconnect_fails(&self, peer: &PeerId, fails: bool) {
        if let Some(slot) = self.peers.lock().get_mut(peer) {
            slot.reconnect_fails = fails;
        }
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector endpoint for one registered loopback peer.
pub struct LoopbackConnector {
    local: PeerId,
    peers: Arc<Mutex<HashMap<PeerId, PeerSlot>>>,
    capacity: usize,
}

impl Connector for LoopbackConnector {
    async fn open(&self, peer: &PeerId) -> Result<ConnectionHandle, TransportError> {
        let incoming = {
            let peers = self.peers.lock();
            let Some(slot) = peers.get(peer) else {
                return Err(TransportError::Unreachable(peer.clone()));
            };
            slot.signaling.clone()
        };

        let (local_handle, remote_handle) =
            handle_pair(self.local.clone(), peer.clone(), self.capacity);

        incoming
            .send(SignalingEvent::IncomingConnection(remote_handle))
            .await
            .map_err(|_| TransportError::Unreachable(peer.clone()))?;

        Ok(local_handle)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let peers = self.peers.lock();
        match peers.get(&self.local) {
            Some(slot) if !slot.reconnect_fails => Ok(()),
            _ => Err(TransportError::Signaling(
                "rendezvous service refused re-registration".into(),
            )),
        }
    }
}

/// Create a directly wired pair of connection handles.
///
/// `a` holds the first handle (connected to `b`) and vice versa. Both
/// handles have [`ConnectionEvent::Opened`] already queued; dropping
/// either side delivers [`ConnectionEvent::Closed`] to the other.
#[must_use]
pub fn handle_pair(a: PeerId, b: PeerId, capacity: usize) -> (ConnectionHandle, ConnectionHandle) {
    let (a_out_tx, a_out_rx) = mpsc::channel::<Vec<u8>>(capacity);
    let (b_out_tx, b_out_rx) = mpsc::channel::<Vec<u8>>(capacity);
    let (a_evt_tx, a_evt_rx) = mpsc::channel::<ConnectionEvent>(capacity);
    let (b_evt_tx, b_evt_rx) = mpsc::channel::<ConnectionEvent>(capacity);

    let _ = a_evt_tx.try_send(ConnectionEvent::Opened);
    let _ = b_evt_tx.try_send(ConnectionEvent::Opened);

    tokio::spawn(pump(a_out_rx, b_evt_tx));
    tokio::spawn(pump(b_out_rx, a_evt_tx));

    let handle_a = ConnectionHandle::from_parts(b, a_out_tx, a_evt_rx);
    let handle_b = ConnectionHandle::from_parts(a, b_out_tx, b_evt_rx);
    (handle_a, handle_b)
}

/// Forward outbound frames to the remote event stream, then close.
async fn pump(mut out_rx: mpsc::Receiver<Vec<u8>>, evt_tx: mpsc::Sender<ConnectionEvent>) {
    while let Some(frame) = out_rx.recv().await {
        if evt_tx.send(ConnectionEvent::Data(frame)).await.is_err() {
            return;
        }
    }
    let _ = evt_tx.send(ConnectionEvent::Closed).await;
}
