//! `peerchat` — multi-peer encrypted chat client library.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod history;
pub mod manager;
pub mod session;
pub mod transport;
