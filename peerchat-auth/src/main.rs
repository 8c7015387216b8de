//! `peerchat` account service — registration, login and peer-id lookup.
//!
//! Accounts are held in memory for the lifetime of the process; the
//! service exists so peers can find each other's current identifier,
//! not as durable account storage.
//!
//! ```bash
//! # Run on the default port 4000
//! cargo run --bin peerchat-auth
//!
//! # Or pick a port
//! PORT=8080 cargo run --bin peerchat-auth
//! ```

use std::sync::Arc;

use peerchat_auth::server;
use peerchat_auth::store::UserStore;

/// Port used when `PORT` is unset or unparseable.
const DEFAULT_PORT: u16 = 4000;

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let app = server::router(Arc::new(UserStore::new()));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(port, "account service listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "account service failed");
    }
}
