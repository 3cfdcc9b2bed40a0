//! Ship entity model.
//!
//! # Ship classes
//! Three tiers, trading speed for durability:
//! - **Corvette**: light and fast, high turn rate, thin hull.
//! - **Frigate**: balanced all-rounder.
//! - **Dreadnought**: heavy and slow, thick hull, hits hard in collisions.
//!
//! # Controls
//! Throttle and rudder are discrete levels, not continuous axes. The
//! movement model (see [`crate::movement`]) eases actual speed toward the
//! throttle target, so both client prediction and server authority run the
//! same deterministic code.
//!
//! # Hull invariant
//! `0 <= hull <= max_hull` after every mutation. Hull reaching zero flips
//! the ship into a destroyed state; it stays non-interactive until a
//! respawn is granted.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;
use crate::net::{ConnId, DeviceId};
use crate::projectile::Weapon;

/// Ship class tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShipClass {
    Corvette,
    Frigate,
    Dreadnought,
}

impl ShipClass {
    pub const ALL: [ShipClass; 3] = [
        ShipClass::Corvette,
        ShipClass::Frigate,
        ShipClass::Dreadnought,
    ];

    /// Class-derived movement and combat constants.
    pub const fn tuning(self) -> ClassTuning {
        match self {
            ShipClass::Corvette => ClassTuning {
                max_speed: 220.0,
                acceleration: 60.0,
                rotation_speed: 1.4,
                collision_radius: 18.0,
                collision_damage_multiplier: 0.8,
                mass: 1.0,
                max_hull: 80.0,
            },
            ShipClass::Frigate => ClassTuning {
                max_speed: 160.0,
                acceleration: 40.0,
                rotation_speed: 1.0,
                collision_radius: 26.0,
                collision_damage_multiplier: 1.0,
                mass: 2.0,
                max_hull: 100.0,
            },
            ShipClass::Dreadnought => ClassTuning {
                max_speed: 110.0,
                acceleration: 22.0,
                rotation_speed: 0.6,
                collision_radius: 38.0,
                collision_damage_multiplier: 1.5,
                mass: 4.0,
                max_hull: 150.0,
            },
        }
    }

    /// Picks a class uniformly at random (used when identification omits one).
    pub fn random<R: rand::Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Constants derived from a ship's class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassTuning {
    /// Maximum forward speed in world units per second.
    pub max_speed: f32,
    /// Speed change rate toward a higher target, units/s².
    pub acceleration: f32,
    /// Full-rudder turn rate at max speed, radians per second.
    pub rotation_speed: f32,
    /// Circle-collision radius in world units.
    pub collision_radius: f32,
    /// Scales ram damage dealt in ship-ship collisions.
    pub collision_damage_multiplier: f32,
    /// Relative mass, used for the collision bounce split.
    pub mass: f32,
    /// Hull points when fully repaired.
    pub max_hull: f32,
}

/// Discrete throttle levels mapping to a fraction of `max_speed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Throttle {
    ReverseFull,
    ReverseHalf,
    #[default]
    Stop,
    Slow,
    Half,
    Flank,
}

impl Throttle {
    /// Target speed as a signed fraction of the class max speed.
    pub fn fraction(self) -> f32 {
        match self {
            Throttle::ReverseFull => -0.5,
            Throttle::ReverseHalf => -0.3,
            Throttle::Stop => 0.0,
            Throttle::Slow => 0.3,
            Throttle::Half => 0.6,
            Throttle::Flank => 1.0,
        }
    }

    /// One level up, saturating at flank.
    pub fn increased(self) -> Self {
        match self {
            Throttle::ReverseFull => Throttle::ReverseHalf,
            Throttle::ReverseHalf => Throttle::Stop,
            Throttle::Stop => Throttle::Slow,
            Throttle::Slow => Throttle::Half,
            Throttle::Half => Throttle::Flank,
            Throttle::Flank => Throttle::Flank,
        }
    }

    /// One level down, saturating at full reverse.
    pub fn decreased(self) -> Self {
        match self {
            Throttle::Flank => Throttle::Half,
            Throttle::Half => Throttle::Slow,
            Throttle::Slow => Throttle::Stop,
            Throttle::Stop => Throttle::ReverseHalf,
            Throttle::ReverseHalf => Throttle::ReverseFull,
            Throttle::ReverseFull => Throttle::ReverseFull,
        }
    }
}

/// Discrete rudder levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Rudder {
    FullLeft,
    HalfLeft,
    #[default]
    Midships,
    HalfRight,
    FullRight,
}

impl Rudder {
    /// Signed turn factor; negative turns left (decreasing rotation).
    pub fn factor(self) -> f32 {
        match self {
            Rudder::FullLeft => -1.0,
            Rudder::HalfLeft => -0.5,
            Rudder::Midships => 0.0,
            Rudder::HalfRight => 0.5,
            Rudder::FullRight => 1.0,
        }
    }

    /// One level to port, saturating.
    pub fn to_port(self) -> Self {
        match self {
            Rudder::FullLeft => Rudder::FullLeft,
            Rudder::HalfLeft => Rudder::FullLeft,
            Rudder::Midships => Rudder::HalfLeft,
            Rudder::HalfRight => Rudder::Midships,
            Rudder::FullRight => Rudder::HalfRight,
        }
    }

    /// One level to starboard, saturating.
    pub fn to_starboard(self) -> Self {
        match self {
            Rudder::FullLeft => Rudder::HalfLeft,
            Rudder::HalfLeft => Rudder::Midships,
            Rudder::Midships => Rudder::HalfRight,
            Rudder::HalfRight => Rudder::FullRight,
            Rudder::FullRight => Rudder::FullRight,
        }
    }
}

/// Outcome of a hull mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HullChange {
    pub new_hull: f32,
    /// Damage actually applied after clamping.
    pub applied: f32,
    /// True if this change brought the ship to zero hull.
    pub destroyed: bool,
}

/// A player-controlled vessel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    /// Keyed by the owning connection.
    pub id: ConnId,
    /// Durable identity the ship is bound to, 1:1.
    pub device: DeviceId,
    pub name: String,
    pub color: String,
    pub class: ShipClass,

    pub pos: Vec2,
    /// Heading in radians.
    pub rotation: f32,
    /// Signed scalar speed along the heading.
    pub speed: f32,
    pub throttle: Throttle,
    pub rudder: Rudder,

    pub hull: f32,
    pub max_hull: f32,
    /// Remaining ticks until the cannon may fire again.
    pub cannon_cooldown: u32,
    /// Remaining ticks until a torpedo may be launched.
    pub torpedo_cooldown: u32,

    pub destroyed: bool,
}

impl Ship {
    pub fn new(
        id: ConnId,
        device: DeviceId,
        name: impl Into<String>,
        color: impl Into<String>,
        class: ShipClass,
        pos: Vec2,
    ) -> Self {
        let max_hull = class.tuning().max_hull;
        Self {
            id,
            device,
            name: name.into(),
            color: color.into(),
            class,
            pos,
            rotation: 0.0,
            speed: 0.0,
            throttle: Throttle::default(),
            rudder: Rudder::default(),
            hull: max_hull,
            max_hull,
            cannon_cooldown: 0,
            torpedo_cooldown: 0,
            destroyed: false,
        }
    }

    pub fn tuning(&self) -> ClassTuning {
        self.class.tuning()
    }

    /// A ship takes part in movement and collision only while active.
    pub fn is_active(&self) -> bool {
        !self.destroyed
    }

    /// Applies damage, clamping hull into `[0, max_hull]`.
    pub fn apply_damage(&mut self, amount: f32) -> HullChange {
        let amount = amount.max(0.0);
        let before = self.hull;
        self.hull = (self.hull - amount).clamp(0.0, self.max_hull);
        let destroyed = self.hull <= 0.0 && !self.destroyed;
        if destroyed {
            self.destroyed = true;
        }
        HullChange {
            new_hull: self.hull,
            applied: before - self.hull,
            destroyed,
        }
    }

    /// Forces hull to an authoritative value (server echo wins over prediction).
    pub fn set_hull(&mut self, hull: f32) {
        self.hull = hull.clamp(0.0, self.max_hull);
        self.destroyed = self.hull <= 0.0;
    }

    /// Re-activates a destroyed ship at a fresh position with neutral controls.
    pub fn respawn_at(&mut self, pos: Vec2) {
        self.pos = pos;
        self.rotation = 0.0;
        self.speed = 0.0;
        self.throttle = Throttle::default();
        self.rudder = Rudder::default();
        self.hull = self.max_hull;
        self.cannon_cooldown = 0;
        self.torpedo_cooldown = 0;
        self.destroyed = false;
    }

    pub fn weapon_ready(&self, weapon: Weapon) -> bool {
        match weapon {
            Weapon::Cannon => self.cannon_cooldown == 0,
            Weapon::Torpedo => self.torpedo_cooldown == 0,
        }
    }

    /// Starts the per-weapon cooldown after a shot.
    pub fn start_cooldown(&mut self, weapon: Weapon) {
        match weapon {
            Weapon::Cannon => self.cannon_cooldown = weapon.cooldown_ticks(),
            Weapon::Torpedo => self.torpedo_cooldown = weapon.cooldown_ticks(),
        }
    }

    /// Decrements cooldown counters, once per tick.
    pub fn tick_cooldowns(&mut self) {
        self.cannon_cooldown = self.cannon_cooldown.saturating_sub(1);
        self.torpedo_cooldown = self.torpedo_cooldown.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ship() -> Ship {
        Ship::new(
            ConnId(1),
            DeviceId::from("dev-1"),
            "Tester",
            "#00ff00",
            ShipClass::Frigate,
            Vec2::new(100.0, 100.0),
        )
    }

    #[test]
    fn damage_clamps_at_zero_and_destroys() {
        let mut ship = test_ship();
        let change = ship.apply_damage(40.0);
        assert_eq!(change.new_hull, 60.0);
        assert!(!change.destroyed);

        let change = ship.apply_damage(1000.0);
        assert_eq!(change.new_hull, 0.0);
        assert_eq!(change.applied, 60.0);
        assert!(change.destroyed);
        assert!(ship.destroyed);

        // Further damage is a no-op on an already-destroyed hull.
        let change = ship.apply_damage(10.0);
        assert_eq!(change.new_hull, 0.0);
        assert!(!change.destroyed);
    }

    #[test]
    fn negative_damage_never_heals() {
        let mut ship = test_ship();
        ship.apply_damage(30.0);
        ship.apply_damage(-50.0);
        assert_eq!(ship.hull, 70.0);
    }

    #[test]
    fn set_hull_clamps_to_max() {
        let mut ship = test_ship();
        ship.set_hull(9999.0);
        assert_eq!(ship.hull, ship.max_hull);
        ship.set_hull(-5.0);
        assert_eq!(ship.hull, 0.0);
        assert!(ship.destroyed);
    }

    #[test]
    fn respawn_resets_controls_and_hull() {
        let mut ship = test_ship();
        ship.throttle = Throttle::Flank;
        ship.rudder = Rudder::FullRight;
        ship.apply_damage(ship.max_hull);
        assert!(ship.destroyed);

        ship.respawn_at(Vec2::new(5.0, 5.0));
        assert!(!ship.destroyed);
        assert_eq!(ship.hull, ship.max_hull);
        assert_eq!(ship.throttle, Throttle::Stop);
        assert_eq!(ship.rudder, Rudder::Midships);
        assert_eq!(ship.pos, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn throttle_steps_saturate() {
        assert_eq!(Throttle::Flank.increased(), Throttle::Flank);
        assert_eq!(Throttle::ReverseFull.decreased(), Throttle::ReverseFull);
        assert_eq!(Throttle::Stop.increased(), Throttle::Slow);
    }

    #[test]
    fn dreadnought_outweighs_corvette() {
        let heavy = ShipClass::Dreadnought.tuning();
        let light = ShipClass::Corvette.tuning();
        assert!(heavy.mass > light.mass);
        assert!(heavy.collision_damage_multiplier > light.collision_damage_multiplier);
        assert!(heavy.max_speed < light.max_speed);
    }
}
