//! `broadside_client`
//!
//! Client-side systems:
//! - Connection management and device identity persistence
//! - Predicted local world driven by the shared movement model
//! - Intent handling for helm and combat orders
//! - Reconciliation against authoritative server messages

pub mod client;
pub mod input;

pub use client::{ClientState, GameClient};
