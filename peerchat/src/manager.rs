//! Multi-peer session manager.
//!
//! Owns one logical conversation per remote peer: the live
//! [`ConnectionSession`] set, the persisted [`HistoryStore`], the
//! active-conversation pointer and the per-peer unread markers. All
//! state lives behind this one type and is mutated only from its event
//! loop, so transport events, user commands and crypto completions are
//! serialized and never race.
//!
//! # Focus policy
//!
//! Outbound connections take focus when they open. Inbound connections
//! never steal focus; an arriving message promotes its sender to the
//! active conversation only when no conversation is selected
//! (first-message-wins). Unread markers do not suppress that
//! auto-promotion.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;

use peerchat_proto::codec;
use peerchat_proto::frame::Frame;

use crate::crypto::{self, CipherMode, CryptoError, SharedKey};
use crate::history::{HistoryStore, Message, StorageBackend};
use crate::session::{
    ConnectionSession, InboundEvent, SessionError, SessionRole, SessionState,
};
use crate::transport::{
    ConnectionEvent, ConnectionHandle, Connector, FailureKind, PeerId, SignalingEvent,
    TransportError,
};

/// Delay before the single signaling reconnection attempt.
const SIGNALING_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Capacity of the internal connection-event queue.
const CONNECTION_EVENT_CAPACITY: usize = 256;

/// Synchronously rejected user input. No state changes on these.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The peer identifier was empty.
    #[error("peer identifier must not be empty")]
    EmptyPeerId,

    /// The peer identifier named the local agent itself.
    #[error("cannot connect to your own identifier")]
    SelfConnection,

    /// The message text was empty after trimming.
    #[error("message must not be empty")]
    EmptyMessage,
}

/// Errors from [`SessionManager::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Input rejected before any transport call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The transport refused to open the connection.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from [`SessionManager::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No conversation is selected.
    #[error("no conversation selected")]
    NoActivePeer,

    /// The active conversation has no live connection.
    #[error("no live connection to {0}")]
    NoLiveSession(PeerId),

    /// The live session cannot carry traffic yet (or any more).
    #[error("connection to {0} is not ready")]
    SessionNotReady(PeerId),

    /// Input rejected before any work.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Sealing the payload failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Encoding or transmitting the frame failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// UI-facing events emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A peer appeared in the chat list (new connection or first message).
    PeerAdded {
        /// The listed peer.
        peer: PeerId,
    },
    /// The active conversation changed; `log` is the full visible log.
    Switched {
        /// The now-active peer.
        peer: PeerId,
        /// Replacement contents for the visible log.
        log: String,
    },
    /// A line was appended to the active conversation's visible log.
    Rendered {
        /// The active peer the line belongs to.
        peer: PeerId,
        /// The appended line, direction prefix included.
        line: String,
    },
    /// A message arrived for a background conversation.
    Unread {
        /// The peer with unread messages.
        peer: PeerId,
    },
    /// The active peer's connection closed; input is disabled.
    ActiveClosed {
        /// The peer whose connection closed.
        peer: PeerId,
    },
    /// A connection attempt or live connection failed.
    SessionFailed {
        /// The peer the connection belonged to.
        peer: PeerId,
        /// User-facing failure classification.
        reason: FailureKind,
    },
    /// A message or frame was dropped; the connection stays alive.
    Warning {
        /// The peer concerned, when known.
        peer: Option<PeerId>,
        /// Human-readable description.
        message: String,
    },
    /// Neutral status for the front end (key derived, reconnected, ...).
    Notice {
        /// Human-readable status text.
        message: String,
    },
    /// The signaling service dropped us. `retrying` is false once the
    /// single reconnection attempt has been spent.
    SignalingDown {
        /// Whether a reconnection attempt is still scheduled.
        retrying: bool,
    },
    /// A conversation's history was deleted.
    Deleted {
        /// The peer whose history was removed.
        peer: PeerId,
    },
}

/// Commands sent from the front end into the manager's event loop.
#[derive(Debug)]
pub enum Command {
    /// Connect to (or focus) a peer.
    Connect(PeerId),
    /// Send text to the active conversation.
    Send(String),
    /// Switch the active conversation.
    Switch(PeerId),
    /// Delete a conversation's history.
    Delete(PeerId),
    /// Turn the encryption envelope on or off.
    SetCipher(CipherMode),
    /// Derive the shared key from a passphrase.
    DeriveKey(String),
    /// Stop the event loop.
    Shutdown,
}

/// A live connection's session plus the id its forwarded events carry.
///
/// When a new connection replaces an old one for the same peer, the
/// old forwarding task keeps draining events; the id lets the manager
/// drop those instead of acting on the replacement session.
struct LiveSession {
    id: u64,
    session: ConnectionSession,
}

/// Owns all per-peer sessions and routes operations between the front
/// end, the transport and the history store.
pub struct SessionManager<C: Connector, S: StorageBackend> {
    local_id: PeerId,
    connector: C,
    history: HistoryStore<S>,
    sessions: HashMap<PeerId, LiveSession>,
    active: Option<PeerId>,
    unread: HashSet<PeerId>,
    cipher: CipherMode,
    key: Option<SharedKey>,
    events: mpsc::Sender<ChatEvent>,
    next_conn_id: u64,
    conn_tx: mpsc::Sender<(PeerId, u64, ConnectionEvent)>,
    conn_rx: Option<mpsc::Receiver<(PeerId, u64, ConnectionEvent)>>,
    reconnect_tx: mpsc::Sender<()>,
    reconnect_rx: Option<mpsc::Receiver<()>>,
    reconnect_spent: bool,
}

impl<C: Connector, S: StorageBackend> SessionManager<C, S> {
    /// Create a manager for `local_id`, loading its persisted history.
    ///
    /// Returns the manager and the receiver for [`ChatEvent`]s the
    /// front end should consume. Events are delivered best-effort: a
    /// full or dropped receiver loses events, never blocks the core.
    pub fn new(
        local_id: PeerId,
        connector: C,
        backend: S,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let history = HistoryStore::load(local_id.clone(), backend);
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_EVENT_CAPACITY);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let manager = Self {
            local_id,
            connector,
            history,
            sessions: HashMap::new(),
            active: None,
            unread: HashSet::new(),
            cipher: CipherMode::Off,
            key: None,
            events: event_tx,
            next_conn_id: 0,
            conn_tx,
            conn_rx: Some(conn_rx),
            reconnect_tx,
            reconnect_rx: Some(reconnect_rx),
            reconnect_spent: false,
        };
        (manager, event_rx)
    }

    // -----------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------

    /// Connect to a peer, or focus the existing conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty or self identifier —
    /// checked before any transport call — or the transport's error if
    /// the connection request is refused.
    pub async fn connect(&mut self, peer: &PeerId) -> Result<(), ConnectError> {
        if peer.is_empty() {
            return Err(ValidationError::EmptyPeerId.into());
        }
        if *peer == self.local_id {
            return Err(ValidationError::SelfConnection.into());
        }
        if self.sessions.contains_key(peer) {
            self.switch(peer);
            return Ok(());
        }

        let handle = self.connector.open(peer).await?;
        self.adopt(handle, SessionRole::Initiator);
        Ok(())
    }

    /// Adopt a connection the remote peer opened to us.
    ///
    /// Self-connections are dropped on the floor, mirroring the
    /// outbound-side rejection.
    pub fn accept(&mut self, handle: ConnectionHandle) {
        if *handle.peer() == self.local_id {
            tracing::warn!("dropping incoming self-connection");
            return;
        }
        self.adopt(handle, SessionRole::Acceptor);
    }

    /// Send text to the active conversation.
    ///
    /// The outgoing message is appended to history even when the
    /// transmit fails — the local record of intent is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if no ready session is selected, sealing
    /// fails, or the transport rejects the frame.
    pub async fn send(&mut self, text: &str) -> Result<(), SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let Some(peer) = self.active.clone() else {
            return Err(SendError::NoActivePeer);
        };
        let Some(live) = self.sessions.get(&peer) else {
            return Err(SendError::NoLiveSession(peer));
        };
        if !live.session.is_ready() {
            return Err(SendError::SessionNotReady(peer));
        }

        let frame = if self.cipher == CipherMode::Aes
            && let Some(key) = &self.key
        {
            Frame::Encrypted(crypto::seal(text, key)?)
        } else {
            Frame::plain(text)
        };

        let result = live.session.send_frame(&frame).await;

        let message = Message::outgoing(text);
        let line = message.to_line();
        self.history.append(&peer, message);
        self.emit(ChatEvent::Rendered { peer, line });

        result.map_err(Into::into)
    }

    /// Make `peer` the active conversation.
    ///
    /// Only possible when a live session or stored history exists.
    /// Idempotent: the visible log is repopulated from history and the
    /// unread marker cleared each time. Returns whether the switch
    /// happened.
    pub fn switch(&mut self, peer: &PeerId) -> bool {
        if !self.sessions.contains_key(peer) && !self.history.contains(peer) {
            return false;
        }
        self.active = Some(peer.clone());
        self.unread.remove(peer);
        self.emit(ChatEvent::Switched {
            peer: peer.clone(),
            log: self.history.lines(peer),
        });
        true
    }

    /// Delete a peer's persisted history.
    ///
    /// Clears focus (disabling sending) if the peer was active. A live
    /// connection is deliberately left open — the next message simply
    /// starts a fresh history entry.
    pub fn delete_conversation(&mut self, peer: &PeerId) {
        self.history.delete(peer);
        self.unread.remove(peer);
        if self.active.as_ref() == Some(peer) {
            self.active = None;
        }
        self.emit(ChatEvent::Deleted { peer: peer.clone() });
    }

    /// Select whether outgoing payloads are sealed.
    pub fn set_cipher(&mut self, mode: CipherMode) {
        self.cipher = mode;
    }

    /// Derive and install the shared key from a passphrase.
    ///
    /// The derivation runs on the blocking pool; its completion
    /// re-enters this manager's single-threaded flow.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] for an empty passphrase or a failed
    /// derivation task.
    pub async fn derive_key(&mut self, passphrase: &str) -> Result<(), CryptoError> {
        let passphrase = passphrase.to_string();
        let key = tokio::task::spawn_blocking(move || crypto::derive_key(&passphrase))
            .await
            .map_err(|e| CryptoError::TaskFailed(e.to_string()))??;
        self.key = Some(key);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------

    /// Apply one connection event to the owning session.
    ///
    /// Events carry the id of the connection that produced them. An id
    /// that no longer matches the peer's current session belongs to a
    /// replaced connection; such events are dropped so a late `Closed`
    /// or `Error` cannot tear down the replacement.
    async fn handle_connection_event(&mut self, peer: &PeerId, conn_id: u64, event: ConnectionEvent) {
        if self.sessions.get(peer).is_none_or(|live| live.id != conn_id) {
            tracing::debug!(peer = %peer, conn_id, "dropping event from a replaced connection");
            return;
        }
        match event {
            ConnectionEvent::Opened => self.on_opened(peer).await,
            ConnectionEvent::Data(bytes) => self.on_data(peer, &bytes).await,
            ConnectionEvent::Closed => self.on_closed(peer),
            ConnectionEvent::Error(kind) => self.on_error(peer, kind),
        }
    }

    /// Apply one signaling-level event.
    pub fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::IncomingConnection(handle) => self.accept(handle),
            SignalingEvent::Disconnected => self.schedule_signaling_reconnect(),
        }
    }

    /// Wait for and process the next queued connection event.
    ///
    /// Test seam: lets callers step the manager deterministically
    /// without running the full event loop.
    pub async fn process_one(&mut self) -> bool {
        let next = match self.conn_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };
        match next {
            Some((peer, conn_id, event)) => {
                self.handle_connection_event(&peer, conn_id, event).await;
                true
            }
            None => false,
        }
    }

    /// Drive the manager until shutdown.
    ///
    /// Single logical thread: commands, connection events, signaling
    /// events and timer completions are interleaved through one loop,
    /// so no two handlers ever run concurrently.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signaling: mpsc::Receiver<SignalingEvent>,
    ) {
        let Some(mut conn_rx) = self.conn_rx.take() else {
            return;
        };
        let Some(mut reconnect_rx) = self.reconnect_rx.take() else {
            return;
        };

        loop {
            tokio::select! {
                maybe_command = commands.recv() => {
                    let Some(command) = maybe_command else { break };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some((peer, conn_id, event)) = conn_rx.recv() => {
                    self.handle_connection_event(&peer, conn_id, event).await;
                }
                Some(event) = signaling.recv() => {
                    self.handle_signaling_event(event);
                }
                Some(()) = reconnect_rx.recv() => {
                    self.attempt_signaling_reconnect().await;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The local agent's own identifier.
    #[must_use]
    pub const fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// The persisted conversation log.
    #[must_use]
    pub const fn history(&self) -> &HistoryStore<S> {
        &self.history
    }

    /// The currently focused conversation, if any.
    #[must_use]
    pub const fn active_peer(&self) -> Option<&PeerId> {
        self.active.as_ref()
    }

    /// State of the live session for `peer`, if one exists.
    #[must_use]
    pub fn session_state(&self, peer: &PeerId) -> Option<SessionState> {
        self.sessions.get(peer).map(|live| live.session.state())
    }

    /// Whether `peer` has unread messages.
    #[must_use]
    pub fn has_unread(&self, peer: &PeerId) -> bool {
        self.unread.contains(peer)
    }

    /// Every peer with a live session or stored history, sorted.
    #[must_use]
    pub fn peer_list(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .keys()
            .chain(self.history.peers().iter())
            .cloned()
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Wrap a handle in a session and start forwarding its events into
    /// the manager's serialized queue.
    ///
    /// Each adoption gets a fresh connection id; if this replaces an
    /// existing session for the peer, events still in flight from the
    /// old connection carry the old id and are dropped on arrival.
    fn adopt(&mut self, handle: ConnectionHandle, role: SessionRole) {
        let peer = handle.peer().clone();
        let (sender, mut events) = handle.split();

        let id = self.next_conn_id;
        self.next_conn_id += 1;

        let conn_tx = self.conn_tx.clone();
        let event_peer = peer.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if conn_tx.send((event_peer.clone(), id, event)).await.is_err() {
                    break;
                }
            }
        });

        self.sessions.insert(
            peer.clone(),
            LiveSession {
                id,
                session: ConnectionSession::new(peer, role, sender),
            },
        );
    }

    async fn on_opened(&mut self, peer: &PeerId) {
        let Some(live) = self.sessions.get_mut(peer) else {
            return;
        };
        let role = live.session.role();
        if let Err(e) = live.session.on_open().await {
            tracing::warn!(peer = %peer, error = %e, "handshake send failed");
        }
        self.append_notice(peer, format!("connected to {peer}"));
        self.emit(ChatEvent::PeerAdded { peer: peer.clone() });
        if role == SessionRole::Initiator {
            self.switch(peer);
        }
    }

    async fn on_data(&mut self, peer: &PeerId, bytes: &[u8]) {
        let frame = match codec::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "dropping undecodable frame");
                self.warn_peer(peer, format!("dropped a malformed frame: {e}"));
                return;
            }
        };

        let Some(live) = self.sessions.get_mut(peer) else {
            return;
        };
        let Some(inbound) = live.session.on_frame(frame) else {
            return;
        };

        match inbound {
            InboundEvent::VersionMismatch { remote_version } => {
                self.append_notice(
                    peer,
                    format!("peer is running protocol version {remote_version}"),
                );
            }
            InboundEvent::Payload(Frame::Plain(text)) => {
                if self.cipher == CipherMode::Aes && self.key.is_some() {
                    // Encryption is on locally but the sealed container
                    // fields are missing: the peers' cipher settings
                    // disagree. Drop, keep the connection.
                    tracing::warn!(peer = %peer, "expected sealed payload, got plaintext");
                    self.warn_peer(peer, "dropped a plaintext message (encryption is on)".into());
                } else {
                    self.deliver_incoming(peer, text);
                }
            }
            InboundEvent::Payload(Frame::Encrypted(sealed)) => {
                let key = if self.cipher == CipherMode::Aes {
                    self.key.clone()
                } else {
                    None
                };
                if let Some(key) = key {
                    match crypto::open(&sealed, &key) {
                        Ok(text) => self.deliver_incoming(peer, text),
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "dropping undecryptable message");
                            self.append_notice(peer, "failed to decrypt a message".into());
                            self.warn_peer(peer, "failed to decrypt a message".into());
                        }
                    }
                } else {
                    tracing::warn!(peer = %peer, "sealed payload arrived but encryption is off");
                    self.warn_peer(peer, "dropped an encrypted message (encryption is off)".into());
                }
            }
            // Handshakes are consumed inside the session.
            InboundEvent::Payload(Frame::Version(_)) => {}
        }
    }

    fn on_closed(&mut self, peer: &PeerId) {
        if let Some(mut live) = self.sessions.remove(peer) {
            live.session.on_close();
        }
        // History is retained; only the live session goes away.
        if self.active.as_ref() == Some(peer) {
            self.append_notice(peer, format!("chat closed: {peer}"));
            self.emit(ChatEvent::ActiveClosed { peer: peer.clone() });
        }
    }

    fn on_error(&mut self, peer: &PeerId, kind: FailureKind) {
        if let Some(mut live) = self.sessions.remove(peer) {
            live.session.on_error(kind);
        }
        // Retrying is a new explicit user action, never automatic.
        self.emit(ChatEvent::SessionFailed {
            peer: peer.clone(),
            reason: kind,
        });
    }

    /// Route a decrypted/plaintext message into history and the UI.
    fn deliver_incoming(&mut self, peer: &PeerId, text: String) {
        let message = Message::incoming(text);
        let line = message.to_line();
        self.history.append(peer, message);

        if self.active.as_ref() == Some(peer) {
            self.emit(ChatEvent::Rendered {
                peer: peer.clone(),
                line,
            });
        } else if self.active.is_none() {
            // First-message-wins focus.
            self.switch(peer);
        } else {
            self.unread.insert(peer.clone());
            self.emit(ChatEvent::Unread { peer: peer.clone() });
        }
    }

    /// Append a system notice to a peer's log. Notices render when the
    /// peer is active but never set unread markers or steal focus.
    fn append_notice(&mut self, peer: &PeerId, text: String) {
        let message = Message::incoming(text);
        let line = message.to_line();
        self.history.append(peer, message);
        if self.active.as_ref() == Some(peer) {
            self.emit(ChatEvent::Rendered {
                peer: peer.clone(),
                line,
            });
        }
    }

    fn warn_peer(&self, peer: &PeerId, message: String) {
        self.emit(ChatEvent::Warning {
            peer: Some(peer.clone()),
            message,
        });
    }

    fn schedule_signaling_reconnect(&mut self) {
        if self.reconnect_spent {
            self.emit(ChatEvent::SignalingDown { retrying: false });
            return;
        }
        self.reconnect_spent = true;
        self.emit(ChatEvent::SignalingDown { retrying: true });

        let reconnect_tx = self.reconnect_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SIGNALING_RECONNECT_DELAY).await;
            let _ = reconnect_tx.send(()).await;
        });
    }

    /// The single delayed reconnection attempt. Success re-arms the
    /// policy for a future disconnect; failure is surfaced and never
    /// retried automatically.
    async fn attempt_signaling_reconnect(&mut self) {
        match self.connector.reconnect().await {
            Ok(()) => {
                self.reconnect_spent = false;
                tracing::info!("signaling connection re-established");
                self.emit(ChatEvent::Notice {
                    message: "reconnected to the signaling service".into(),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "signaling reconnect failed");
                self.emit(ChatEvent::SignalingDown { retrying: false });
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(peer) => {
                if let Err(e) = self.connect(&peer).await {
                    self.emit(ChatEvent::Warning {
                        peer: Some(peer),
                        message: e.to_string(),
                    });
                }
            }
            Command::Send(text) => {
                if let Err(e) = self.send(&text).await {
                    self.emit(ChatEvent::Warning {
                        peer: self.active.clone(),
                        message: e.to_string(),
                    });
                }
            }
            Command::Switch(peer) => {
                if !self.switch(&peer) {
                    self.emit(ChatEvent::Warning {
                        peer: Some(peer),
                        message: "no conversation or connection for that peer".into(),
                    });
                }
            }
            Command::Delete(peer) => self.delete_conversation(&peer),
            Command::SetCipher(mode) => {
                self.set_cipher(mode);
                self.emit(ChatEvent::Notice {
                    message: format!("cipher set to {mode}"),
                });
            }
            Command::DeriveKey(passphrase) => match self.derive_key(&passphrase).await {
                Ok(()) => self.emit(ChatEvent::Notice {
                    message: "encryption key derived".into(),
                }),
                Err(e) => self.emit(ChatEvent::Warning {
                    peer: None,
                    message: e.to_string(),
                }),
            },
            Command::Shutdown => return true,
        }
        false
    }

    /// Best-effort event emission; a slow or absent front end never
    /// blocks the core.
    fn emit(&self, event: ChatEvent) {
        let _ = self.events.try_send(event);
    }
}
