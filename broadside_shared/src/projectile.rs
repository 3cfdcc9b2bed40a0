//! Projectile model.
//!
//! Two weapon kinds: the cannon is short-range and fast-firing, the torpedo
//! is long-range and high-damage with a long cooldown. Projectiles fly in a
//! straight line at constant speed and expire on max range or a wall-clock
//! timeout, whichever comes first.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;
use crate::net::ConnId;

/// Weapon kind fired by a ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Weapon {
    Cannon,
    Torpedo,
}

impl Weapon {
    /// Flight speed in world units per second.
    pub fn speed(self) -> f32 {
        match self {
            Weapon::Cannon => 500.0,
            Weapon::Torpedo => 260.0,
        }
    }

    /// Maximum travel distance before the projectile expires.
    pub fn max_range(self) -> f32 {
        match self {
            Weapon::Cannon => 600.0,
            Weapon::Torpedo => 1800.0,
        }
    }

    /// Damage applied on impact.
    pub fn damage(self) -> f32 {
        match self {
            Weapon::Cannon => 8.0,
            Weapon::Torpedo => 35.0,
        }
    }

    /// Ticks between shots.
    pub fn cooldown_ticks(self) -> u32 {
        match self {
            Weapon::Cannon => 6,
            Weapon::Torpedo => 60,
        }
    }

    /// Hard lifetime cap in milliseconds, backstopping the range check.
    pub fn timeout_ms(self) -> i64 {
        match self {
            Weapon::Cannon => 3_000,
            Weapon::Torpedo => 10_000,
        }
    }
}

/// A live projectile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projectile {
    /// Globally unique: `"<conn>-<seq>"` minted by the firing side.
    pub id: String,
    pub weapon: Weapon,
    pub pos: Vec2,
    pub rotation: f32,
    /// Connection that fired this projectile.
    pub source: ConnId,
    /// Epoch milliseconds at spawn.
    pub spawn_ms: i64,
    pub distance_traveled: f32,
    /// Distance before the projectile may hit its own source ship,
    /// set to the source's collision radius at spawn.
    pub arming_distance: f32,
}

impl Projectile {
    pub fn new(
        id: impl Into<String>,
        weapon: Weapon,
        pos: Vec2,
        rotation: f32,
        source: ConnId,
        spawn_ms: i64,
        arming_distance: f32,
    ) -> Self {
        Self {
            id: id.into(),
            weapon,
            pos,
            rotation,
            source,
            spawn_ms,
            distance_traveled: 0.0,
            arming_distance,
        }
    }

    /// Advances the projectile along its heading.
    pub fn advance(&mut self, dt: f32) {
        let step = self.weapon.speed() * dt;
        self.pos = self.pos.add(Vec2::from_heading(self.rotation).scale(step));
        self.distance_traveled += step;
    }

    /// True once max range or the lifetime timeout is exceeded.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.distance_traveled >= self.weapon.max_range()
            || now_ms - self.spawn_ms >= self.weapon.timeout_ms()
    }

    /// True while the projectile is still too close to its source to arm.
    pub fn is_arming(&self) -> bool {
        self.distance_traveled <= self.arming_distance
    }
}
