//! In-memory account store with bcrypt password hashing.
//!
//! Accounts live for the lifetime of the process. Only the bcrypt hash
//! of a password is ever kept; the plaintext is dropped as soon as the
//! hash or verification completes.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Errors from account operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The username is already registered.
    #[error("User already exists")]
    DuplicateUser,

    /// No account with that username exists.
    #[error("User not found")]
    UnknownUser,

    /// The password did not match the stored hash.
    #[error("Invalid password")]
    WrongPassword,

    /// bcrypt itself failed (malformed stored hash, cost out of range).
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// One registered account.
#[derive(Debug, Clone)]
struct UserRecord {
    password_hash: String,
    peer_id: Option<String>,
}

/// Thread-safe in-memory account registry.
///
/// bcrypt hashing and verification are CPU-bound; callers on an async
/// runtime should run [`register`](Self::register) and
/// [`verify`](Self::verify) on the blocking pool.
#[derive(Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new account, hashing the password with bcrypt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateUser`] if the username is taken,
    /// [`StoreError::Hash`] if bcrypt fails.
    pub fn register(&self, username: &str, password: &str) -> Result<(), StoreError> {
        // Check-then-hash keeps the expensive work outside the common
        // duplicate-username path; the write lock below re-checks.
        if self.users.read().contains_key(username) {
            return Err(StoreError::DuplicateUser);
        }

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| StoreError::Hash(e.to_string()))?;

        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(StoreError::DuplicateUser);
        }
        users.insert(
            username.to_string(),
            UserRecord {
                password_hash,
                peer_id: None,
            },
        );
        Ok(())
    }

    /// Verifies a password, returning the account's last recorded peer
    /// identifier on success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownUser`] for a missing account,
    /// [`StoreError::WrongPassword`] on mismatch, [`StoreError::Hash`]
    /// if the stored hash is malformed.
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<String>, StoreError> {
        let record = self
            .users
            .read()
            .get(username)
            .cloned()
            .ok_or(StoreError::UnknownUser)?;

        let matches = bcrypt::verify(password, &record.password_hash)
            .map_err(|e| StoreError::Hash(e.to_string()))?;
        if matches {
            Ok(record.peer_id)
        } else {
            Err(StoreError::WrongPassword)
        }
    }

    /// Records the peer identifier an account is currently using.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownUser`] for a missing account.
    pub fn set_peer_id(&self, username: &str, peer_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write();
        let record = users.get_mut(username).ok_or(StoreError::UnknownUser)?;
        record.peer_id = Some(peer_id.to_string());
        Ok(())
    }
}
