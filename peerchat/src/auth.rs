//! HTTP client for the account service.
//!
//! Thin wrapper over the three JSON endpoints the account service
//! exposes: register, login and peer-id update. The service is
//! optional — agents can run purely peer-to-peer — so every call here
//! happens before the session manager starts and never from inside its
//! event loop.

use serde::{Deserialize, Serialize};

use crate::transport::PeerId;

/// Errors from account-service calls.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The service answered with a non-success status.
    #[error("{message} (status {status})")]
    Rejected {
        /// HTTP status code the service returned.
        status: u16,
        /// The service's own error message, when it sent one.
        message: String,
    },

    /// The request never completed (connection refused, timeout, ...).
    #[error("account service unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

/// Username and password pair, as the service expects them.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    /// Account name, unique per service.
    pub username: String,
    /// Plaintext password; the service stores only a hash.
    pub password: String,
}

/// Generic `{ "message": ... }` response body.
#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: String,
}

/// Login response: a message plus the peer identifier last recorded
/// for the account, if any.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[allow(dead_code)]
    message: String,
    #[serde(rename = "peerId")]
    peer_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdatePeerIdRequest<'a> {
    username: &'a str,
    #[serde(rename = "peerId")]
    peer_id: &'a str,
}

/// Client for one account service instance.
pub struct AuthClient {
    base_url: String,
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a client for the service at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when the username is taken or
    /// the request body is incomplete, [`AuthError::Http`] when the
    /// service cannot be reached.
    pub async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(credentials)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Log in, returning the peer identifier the account last used.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for an unknown username or a
    /// wrong password, [`AuthError::Http`] when the service cannot be
    /// reached.
    pub async fn login(&self, credentials: &Credentials) -> Result<Option<PeerId>, AuthError> {
        let response = self
            .http
            .post(format!("{}/login", self.base_url))
            .json(credentials)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: LoginResponse = response.json().await?;
        Ok(body.peer_id.map(PeerId::new))
    }

    /// Record the peer identifier the account is currently using.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for an unknown username,
    /// [`AuthError::Http`] when the service cannot be reached.
    pub async fn update_peer_id(&self, username: &str, peer: &PeerId) -> Result<(), AuthError> {
        let response = self
            .http
            .post(format!("{}/updatePeerId", self.base_url))
            .json(&UpdatePeerIdRequest {
                username,
                peer_id: peer.as_str(),
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Map a non-success status to [`AuthError::Rejected`], keeping the
    /// service's own message where possible.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<MessageResponse>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request rejected")
                .to_string(),
        };
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
