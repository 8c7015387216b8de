//! `peerchat` account service library.

pub mod server;
pub mod store;
