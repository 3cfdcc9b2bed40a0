//! Collision and damage resolution.
//!
//! All detection is circle-circle: `distance < sum_of_radii`. The functions
//! here are pure math over ship/projectile state; bookkeeping (pair
//! cooldowns, who gets notified) lives with the [`crate::world::World`]
//! owner so predicting clients and the authoritative server resolve
//! contacts identically.

use crate::math::Vec2;
use crate::projectile::Projectile;
use crate::ship::Ship;

/// Damage floor for any ship-ship contact, however gentle.
pub const MIN_COLLISION_DAMAGE: f32 = 2.0;
/// Scales relative speed into ram damage.
pub const COLLISION_DAMAGE_SCALE: f32 = 0.12;
/// Energy retained through the bounce; below 1 makes contacts inelastic.
pub const RESTITUTION: f32 = 0.5;
/// Milliseconds during which a colliding pair cannot collide again.
pub const PAIR_COOLDOWN_MS: u64 = 500;

pub fn circles_overlap(a: Vec2, ra: f32, b: Vec2, rb: f32) -> bool {
    a.distance(b) < ra + rb
}

/// Resolved outcome of one ship-ship contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShipImpact {
    pub damage_to_a: f32,
    pub damage_to_b: f32,
    /// Positional corrections separating the hulls along the contact normal.
    pub push_a: Vec2,
    pub push_b: Vec2,
    /// Post-bounce scalar speeds.
    pub speed_a: f32,
    pub speed_b: f32,
}

/// Computes damage, separation, and bounce for two overlapping ships.
///
/// Damage comes from the closing speed scaled by the heavier ship's
/// collision multiplier, floored at [`MIN_COLLISION_DAMAGE`] for both
/// hulls. Each ship is pushed out by half the overlap along the normal.
/// The bounce is inelastic: each ship keeps a share of its (reversed)
/// speed weighted by the other hull's mass.
pub fn resolve_ship_impact(a: &Ship, b: &Ship) -> ShipImpact {
    let ta = a.tuning();
    let tb = b.tuning();

    let mut normal = b.pos.sub(a.pos).normalized();
    if normal == Vec2::ZERO {
        // Exactly coincident centers; pick an arbitrary but shared axis.
        normal = Vec2::new(1.0, 0.0);
    }

    let distance = a.pos.distance(b.pos);
    let overlap = (ta.collision_radius + tb.collision_radius - distance).max(0.0);

    let va = Vec2::from_heading(a.rotation).scale(a.speed);
    let vb = Vec2::from_heading(b.rotation).scale(b.speed);
    let relative_speed = va.sub(vb).len();

    let heavier_multiplier = ta
        .collision_damage_multiplier
        .max(tb.collision_damage_multiplier);
    let damage =
        (relative_speed * COLLISION_DAMAGE_SCALE * heavier_multiplier).max(MIN_COLLISION_DAMAGE);

    let total_mass = ta.mass + tb.mass;
    let bounce_a = RESTITUTION * (tb.mass / total_mass);
    let bounce_b = RESTITUTION * (ta.mass / total_mass);

    ShipImpact {
        damage_to_a: damage,
        damage_to_b: damage,
        push_a: normal.scale(-overlap / 2.0),
        push_b: normal.scale(overlap / 2.0),
        speed_a: -a.speed * bounce_a,
        speed_b: -b.speed * bounce_b,
    }
}

/// True when a projectile hits this ship.
///
/// The source ship is immune while the projectile is inside its arming
/// distance, so a shot can never detonate on the deck it left.
pub fn projectile_hits(projectile: &Projectile, ship: &Ship) -> bool {
    if !ship.is_active() {
        return false;
    }
    if projectile.source == ship.id && projectile.is_arming() {
        return false;
    }
    // Projectiles are points against the ship's collision circle.
    circles_overlap(projectile.pos, 0.0, ship.pos, ship.tuning().collision_radius)
}
