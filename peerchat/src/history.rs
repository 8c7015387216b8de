//! Durable per-peer conversation history.
//!
//! In memory a conversation is an append-only sequence of tagged
//! [`Message`]s per peer. At the persistence boundary the legacy
//! line format survives for compatibility: each message is one
//! direction-prefixed line (`">> "` outgoing, `"<< "` incoming) and
//! the whole per-owner mapping is stored as a single JSON blob under
//! the key `chat-history-<ownerId>`.
//!
//! Every mutation re-serializes and saves the full namespace. That is
//! deliberate simplicity over incremental-write efficiency —
//! conversations are small. Save failures are best-effort (logged,
//! never propagated); a missing or corrupt blob on load is treated as
//! no history.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transport::PeerId;

/// Prefix marking an outgoing line in the persisted format.
const OUTGOING_PREFIX: &str = ">> ";
/// Prefix marking an incoming line in the persisted format.
const INCOMING_PREFIX: &str = "<< ";

/// Errors that can occur during history persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A read from the backing store failed.
    #[error("storage read failed: {0}")]
    Read(String),
    /// A write to the backing store failed.
    #[error("storage write failed: {0}")]
    Write(String),
}

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the local agent.
    Outgoing,
    /// Received from (or about) the remote peer.
    Incoming,
}

/// One conversation entry. Append-only once stored: entries are never
/// mutated or reordered after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Direction of travel.
    pub direction: Direction,
    /// Message text, without the direction prefix.
    pub text: String,
}

impl Message {
    /// An entry for a message the local agent sent.
    #[must_use]
    pub fn outgoing(text: impl Into<String>) -> Self {
        Self {
            direction: Direction::Outgoing,
            text: text.into(),
        }
    }

    /// An entry for a message or notice received from a peer.
    #[must_use]
    pub fn incoming(text: impl Into<String>) -> Self {
        Self {
            direction: Direction::Incoming,
            text: text.into(),
        }
    }

    /// Render this entry in the legacy persisted line format.
    #[must_use]
    pub fn to_line(&self) -> String {
        let prefix = match self.direction {
            Direction::Outgoing => OUTGOING_PREFIX,
            Direction::Incoming => INCOMING_PREFIX,
        };
        format!("{prefix}{}\n", self.text)
    }

    /// Parse a persisted line back into a tagged entry.
    ///
    /// Lines without a known prefix are kept as incoming text rather
    /// than discarded, so old or hand-edited blobs still load.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        let body = line.strip_suffix('\n').unwrap_or(line);
        body.strip_prefix(OUTGOING_PREFIX).map_or_else(
            || {
                body.strip_prefix(INCOMING_PREFIX)
                    .map_or_else(|| Self::incoming(body), Self::incoming)
            },
            Self::outgoing,
        )
    }
}

/// Key-value persistence surface the history store writes through.
///
/// Mirrors the embedding environment's persistent storage: string keys,
/// string blobs, whole-value replacement on write.
pub trait StorageBackend: Send + Sync + 'static {
    /// Read the blob stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the store is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the value cannot be persisted.
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the blob stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory backend for tests. Cloning shares the underlying map, so
/// a store reloaded from a clone sees earlier writes — a simulated
/// restart.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Filesystem backend: one JSON file per key under a data directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Write(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Map a storage key onto a file path, keeping only filename-safe
    /// characters from the (opaque) key.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read(e.to_string())),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::write(self.path_for(key), value).map_err(|e| StorageError::Write(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write(e.to_string())),
        }
    }
}

/// Append-only conversation log, keyed by peer, persisted wholesale.
pub struct HistoryStore<S: StorageBackend> {
    owner: PeerId,
    entries: HashMap<PeerId, Vec<Message>>,
    backend: S,
}

impl<S: StorageBackend> HistoryStore<S> {
    /// Load the owner's full history namespace from the backend.
    ///
    /// A missing or unparseable blob is treated as "no history": the
    /// failure is logged and an empty store returned. Startup never
    /// fails on a bad history file.
    pub fn load(owner: PeerId, backend: S) -> Self {
        let entries = match backend.get(&storage_key(&owner)) {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<String, Vec<String>>>(&raw) {
                Ok(map) => map
                    .into_iter()
                    .map(|(peer, lines)| {
                        let messages = lines.iter().map(|l| Message::from_line(l)).collect();
                        (PeerId::new(peer), messages)
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!(owner = %owner, error = %e, "corrupt history blob, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "history load failed, starting empty");
                HashMap::new()
            }
        };

        Self {
            owner,
            entries,
            backend,
        }
    }

    /// Append one message to a peer's log and persist immediately.
    ///
    /// The in-memory append always succeeds; the follow-up save is
    /// best-effort. A crash loses at most the unsaved tail, never
    /// message order.
    pub fn append(&mut self, peer: &PeerId, message: Message) {
        self.entries.entry(peer.clone()).or_default().push(message);
        self.persist();
    }

    /// Delete a peer's entire log and persist immediately.
    ///
    /// Returns whether an entry existed.
    pub fn delete(&mut self, peer: &PeerId) -> bool {
        let existed = self.entries.remove(peer).is_some();
        if existed {
            self.persist();
        }
        existed
    }

    /// Write the full namespace through to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend write fails; [`append`]
    /// and [`delete`] swallow this, explicit flushes surface it.
    ///
    /// [`append`]: Self::append
    /// [`delete`]: Self::delete
    pub fn flush(&self) -> Result<(), StorageError> {
        let map: BTreeMap<String, Vec<String>> = self
            .entries
            .iter()
            .map(|(peer, messages)| {
                let lines = messages.iter().map(Message::to_line).collect();
                (peer.as_str().to_string(), lines)
            })
            .collect();
        let blob = serde_json::to_string(&map)
            .map_err(|e| StorageError::Write(e.to_string()))?;
        self.backend.put(&storage_key(&self.owner), &blob)
    }

    /// Messages logged for a peer, oldest first.
    #[must_use]
    pub fn messages(&self, peer: &PeerId) -> &[Message] {
        self.entries.get(peer).map_or(&[], Vec::as_slice)
    }

    /// The peer's visible log: all lines concatenated in order.
    #[must_use]
    pub fn lines(&self, peer: &PeerId) -> String {
        self.messages(peer).iter().map(Message::to_line).collect()
    }

    /// Whether any history exists for the peer.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    /// All peers ever contacted, sorted for stable display.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.entries.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Best-effort save after a mutation.
    fn persist(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(owner = %self.owner, error = %e, "history save failed");
        }
    }
}

/// Storage namespace key for one owner's history.
fn storage_key(owner: &PeerId) -> String {
    format!("chat-history-{owner}")
}
