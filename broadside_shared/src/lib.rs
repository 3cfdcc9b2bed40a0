//! `broadside_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical: the movement and collision
//!   code here IS the simulation, on both sides of the wire.
//! - Clear separation of concerns (entities, physics, spatial index, net,
//!   config, events).
//! - Validation at the protocol boundary; no untyped payloads.
//! - No `unsafe`.

pub mod collision;
pub mod config;
pub mod events;
pub mod math;
pub mod movement;
pub mod net;
pub mod projectile;
pub mod ship;
pub mod spatial;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::projectile::*;
    pub use crate::ship::*;
    pub use crate::world::*;
}
