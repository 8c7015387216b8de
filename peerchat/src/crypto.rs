//! Optional symmetric-encryption envelope for chat payloads.
//!
//! A [`SharedKey`] is derived once per local agent from a passphrase
//! (PBKDF2-HMAC-SHA256, fixed application salt, 100 000 iterations)
//! and applied uniformly to all peers. Sealing uses AES-128-GCM with a
//! fresh random nonce per message; the nonce travels alongside the
//! ciphertext in the wire frame's `iv` field.
//!
//! Encryption is a local, non-negotiated policy: when the two sides
//! disagree, decryption fails on one end and the message is dropped
//! with a warning — never a crash.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use peerchat_proto::frame::EncryptedFrame;

/// Application-specific PBKDF2 salt. Fixed so that the same passphrase
/// derives the same key on every agent.
const KEY_SALT: &[u8] = b"peerchat-shared-key";

/// PBKDF2 iteration count.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Errors that can occur in the crypto envelope.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key derivation was attempted with an empty passphrase.
    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    /// Sealing a payload failed.
    #[error("encryption failed: {0}")]
    SealFailed(String),

    /// Authentication failed: wrong key, corrupted or truncated bytes.
    #[error("decryption failed (wrong key or corrupted message)")]
    DecryptFailed,

    /// A crypto operation scheduled on the blocking pool did not finish.
    #[error("crypto task failed: {0}")]
    TaskFailed(String),
}

/// Whether the local agent applies the encryption envelope.
///
/// Point-to-point policy, never negotiated with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    /// Payloads travel as plaintext.
    #[default]
    Off,
    /// Payloads are sealed with the shared AES-GCM key.
    Aes,
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Aes => write!(f, "aes"),
        }
    }
}

impl FromStr for CipherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes" | "on" => Ok(Self::Aes),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!("unknown cipher mode: {other}")),
        }
    }
}

/// Derived 128-bit AES-GCM key, shared across all peers of this agent.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; 16]);

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        write!(f, "SharedKey(..)")
    }
}

/// Derive a [`SharedKey`] from a passphrase.
///
/// Deterministic: the same passphrase always yields the same key, so
/// two agents that agree on a passphrase can exchange sealed messages.
///
/// # Errors
///
/// Returns [`CryptoError::EmptyPassphrase`] before any derivation work
/// if the passphrase is empty.
pub fn derive_key(passphrase: &str) -> Result<SharedKey, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::EmptyPassphrase);
    }
    let mut key = [0u8; 16];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KEY_SALT, PBKDF2_ITERATIONS, &mut key);
    Ok(SharedKey(key))
}

/// Seal a plaintext payload under the shared key.
///
/// Generates a fresh random nonce per call; a nonce is never reused
/// for a given key.
///
/// # Errors
///
/// Returns [`CryptoError::SealFailed`] if the AEAD rejects the input.
pub fn seal(plaintext: &str, key: &SharedKey) -> Result<EncryptedFrame, CryptoError> {
    let cipher = Aes128Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::SealFailed(format!("cipher init: {e}")))?;
    let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
    let data = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::SealFailed("aead encryption rejected input".into()))?;
    Ok(EncryptedFrame {
        iv: nonce.to_vec(),
        data,
    })
}

/// Open a sealed payload, recovering the plaintext.
///
/// # Errors
///
/// Returns [`CryptoError::DecryptFailed`] when authentication fails:
/// wrong key, corrupted or truncated ciphertext, or a malformed nonce.
/// Callers surface a per-peer warning and drop the message.
pub fn open(sealed: &EncryptedFrame, key: &SharedKey) -> Result<String, CryptoError> {
    let nonce_bytes: [u8; NONCE_LEN] = sealed
        .iv
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptFailed)?;
    let nonce = Nonce::from(nonce_bytes);

    let cipher =
        Aes128Gcm::new_from_slice(&key.0).map_err(|_| CryptoError::DecryptFailed)?;
    let plaintext = cipher
        .decrypt(&nonce, sealed.data.as_slice())
        .map_err(|_| CryptoError::DecryptFailed)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
}
