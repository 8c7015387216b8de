//! HTTP surface of the account service.
//!
//! Three JSON endpoints backed by the in-memory [`UserStore`]:
//!
//! * `POST /register` — create an account
//! * `POST /login` — verify credentials, return the last peer id
//! * `POST /updatePeerId` — record the peer id the account now uses
//!
//! Every response body is `{"message": ...}`; login additionally
//! carries `peerId`. bcrypt work runs on the blocking pool so handler
//! latency never stalls the accept loop.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, UserStore};

/// Request body for `/register` and `/login`.
///
/// Fields are optional so that incomplete bodies produce the service's
/// own 400 message instead of a generic extractor rejection.
#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    /// Account name.
    pub username: Option<String>,
    /// Plaintext password; hashed immediately, never stored.
    pub password: Option<String>,
}

/// Request body for `/updatePeerId`.
#[derive(Debug, Deserialize)]
pub struct UpdatePeerIdBody {
    /// Account name.
    pub username: Option<String>,
    /// Peer identifier the account is currently using.
    #[serde(rename = "peerId")]
    pub peer_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct LoginBody {
    message: String,
    #[serde(rename = "peerId", skip_serializing_if = "Option::is_none")]
    peer_id: Option<String>,
}

/// Build the service router over a shared account store.
#[must_use]
pub fn router(store: Arc<UserStore>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/updatePeerId", post(update_peer_id))
        .with_state(store)
}

async fn register(
    State(store): State<Arc<UserStore>>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return message(StatusCode::BAD_REQUEST, "Username and password are required");
    };

    let result =
        tokio::task::spawn_blocking(move || store.register(&username, &password).map(|()| username))
            .await;

    match result {
        Ok(Ok(username)) => {
            tracing::info!(username = %username, "account registered");
            message(StatusCode::OK, "User registered successfully")
        }
        Ok(Err(e)) => store_error(&e),
        Err(e) => {
            tracing::error!(error = %e, "register task failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn login(
    State(store): State<Arc<UserStore>>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return message(StatusCode::BAD_REQUEST, "Username and password are required");
    };

    let result = tokio::task::spawn_blocking(move || store.verify(&username, &password)).await;

    match result {
        Ok(Ok(peer_id)) => (
            StatusCode::OK,
            Json(LoginBody {
                message: "Login successful".to_string(),
                peer_id,
            }),
        )
            .into_response(),
        Ok(Err(e)) => store_error(&e),
        Err(e) => {
            tracing::error!(error = %e, "login task failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn update_peer_id(
    State(store): State<Arc<UserStore>>,
    Json(body): Json<UpdatePeerIdBody>,
) -> Response {
    let (Some(username), Some(peer_id)) = (body.username, body.peer_id) else {
        return message(StatusCode::BAD_REQUEST, "Username and peerId are required");
    };

    match store.set_peer_id(&username, &peer_id) {
        Ok(()) => {
            tracing::debug!(username = %username, peer_id = %peer_id, "peer id updated");
            message(StatusCode::OK, "Peer ID updated successfully")
        }
        Err(e) => store_error(&e),
    }
}

/// Map a store error to the endpoint status contract.
fn store_error(error: &StoreError) -> Response {
    let status = match error {
        StoreError::DuplicateUser => StatusCode::CONFLICT,
        StoreError::UnknownUser => StatusCode::BAD_REQUEST,
        StoreError::WrongPassword => StatusCode::UNAUTHORIZED,
        StoreError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "account store failure");
        return message(status, "Internal server error");
    }
    message(status, &error.to_string())
}

fn message(status: StatusCode, text: &str) -> Response {
    (
        status,
        Json(MessageBody {
            message: text.to_string(),
        }),
    )
        .into_response()
}
