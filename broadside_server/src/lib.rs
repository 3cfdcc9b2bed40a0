//! Authoritative simulation server: accepts client connections, validates
//! their messages, runs the shared physics at a fixed tick, and broadcasts
//! resulting state changes.

pub mod net;
pub mod server;

pub use server::GameServer;
