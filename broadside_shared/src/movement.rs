//! Shared movement model.
//!
//! This exact algorithm runs on the locally-predicting client and on the
//! authoritative server with the same constants; any divergence here shows
//! up as prediction error, so keep it deterministic: no wall-clock reads,
//! no randomness, plain `f32` math.
//!
//! Per step:
//! 1. Ease `speed` toward the throttle target. Gaining speed uses the class
//!    acceleration; shedding speed is faster (water drag beats propulsion).
//! 2. Turn at a rate scaled by `|speed| / max_speed`; rudder authority is
//!    reduced when making sternway.
//! 3. Slide laterally when turning hard above a speed threshold (a ship
//!    skids outward through a turn).
//! 4. Integrate position and clamp into the world square.

use crate::math::{wrap_angle, Vec2};
use crate::ship::Ship;

/// Deceleration is this much faster than acceleration.
pub const DECEL_FACTOR: f32 = 2.5;
/// Rudder authority multiplier while moving astern.
pub const REVERSE_RUDDER_FACTOR: f32 = 0.5;
/// Fraction of max speed above which lateral drift kicks in.
pub const DRIFT_SPEED_THRESHOLD: f32 = 0.25;
/// Scales the lateral drift displacement.
pub const DRIFT_FACTOR: f32 = 0.18;

/// Advances one ship by `dt` seconds inside a square world of edge
/// `world_size`. Destroyed ships do not move.
pub fn step_ship(ship: &mut Ship, dt: f32, world_size: f32) {
    if !ship.is_active() || dt <= 0.0 {
        return;
    }

    let tuning = ship.tuning();
    let target_speed = ship.throttle.fraction() * tuning.max_speed;

    // Asymmetric easing toward the target.
    let gaining = target_speed.abs() > ship.speed.abs();
    let rate = if gaining {
        tuning.acceleration
    } else {
        tuning.acceleration * DECEL_FACTOR
    };
    let delta = target_speed - ship.speed;
    ship.speed += delta.clamp(-rate * dt, rate * dt);

    // Turn rate scales with how much water is moving over the rudder.
    let speed_ratio = (ship.speed.abs() / tuning.max_speed).min(1.0);
    let direction_factor = if ship.speed < 0.0 {
        REVERSE_RUDDER_FACTOR
    } else {
        1.0
    };
    ship.rotation = wrap_angle(
        ship.rotation
            + ship.rudder.factor() * tuning.rotation_speed * speed_ratio * direction_factor * dt,
    );

    let heading = Vec2::from_heading(ship.rotation);
    let mut displacement = heading.scale(ship.speed * dt);

    // Lateral drift: slide outward (opposite the turn) during a hard turn.
    if ship.rudder.factor() != 0.0 && ship.speed.abs() > DRIFT_SPEED_THRESHOLD * tuning.max_speed {
        let drift = heading
            .perp()
            .scale(-ship.rudder.factor() * DRIFT_FACTOR * ship.speed * dt);
        displacement = displacement.add(drift);
    }

    ship.pos = ship.pos.add(displacement);
    ship.pos.x = ship.pos.x.clamp(0.0, world_size);
    ship.pos.y = ship.pos.y.clamp(0.0, world_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use crate::net::{ConnId, DeviceId};
    use crate::ship::{Rudder, ShipClass, Throttle};

    const WORLD: f32 = 5000.0;

    fn ship_at(x: f32, y: f32, class: ShipClass) -> Ship {
        Ship::new(
            ConnId(7),
            DeviceId::from("dev-7"),
            "Helm",
            "#ffffff",
            class,
            Vec2::new(x, y),
        )
    }

    #[test]
    fn speed_eases_toward_flank_target() {
        let mut ship = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        ship.throttle = Throttle::Flank;
        let max = ship.tuning().max_speed;

        step_ship(&mut ship, 0.1, WORLD);
        assert!(ship.speed > 0.0 && ship.speed < max);

        for _ in 0..2000 {
            step_ship(&mut ship, 0.1, WORLD);
        }
        assert!((ship.speed - max).abs() < 1e-3);
    }

    #[test]
    fn deceleration_outpaces_acceleration() {
        let mut accel = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        accel.throttle = Throttle::Flank;
        step_ship(&mut accel, 0.1, WORLD);
        let gained = accel.speed;

        let mut decel = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        decel.speed = decel.tuning().max_speed;
        decel.throttle = Throttle::Stop;
        let before = decel.speed;
        step_ship(&mut decel, 0.1, WORLD);
        let shed = before - decel.speed;

        assert!(shed > gained);
    }

    #[test]
    fn rudder_ineffective_when_stationary() {
        let mut ship = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        ship.rudder = Rudder::FullRight;
        step_ship(&mut ship, 1.0, WORLD);
        assert_eq!(ship.rotation, 0.0);
    }

    #[test]
    fn reverse_rudder_authority_is_reduced() {
        let mut fwd = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        fwd.speed = 60.0;
        fwd.throttle = Throttle::Half;
        fwd.rudder = Rudder::FullRight;
        step_ship(&mut fwd, 0.1, WORLD);

        let mut rev = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        rev.speed = -60.0;
        rev.throttle = Throttle::ReverseHalf;
        rev.rudder = Rudder::FullRight;
        step_ship(&mut rev, 0.1, WORLD);

        assert!(rev.rotation.abs() < fwd.rotation.abs());
    }

    #[test]
    fn drift_displaces_laterally_during_hard_turn() {
        let mut turning = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        turning.speed = turning.tuning().max_speed;
        turning.throttle = Throttle::Flank;
        turning.rudder = Rudder::FullRight;
        step_ship(&mut turning, 0.05, WORLD);

        let mut straight = ship_at(1000.0, 1000.0, ShipClass::Frigate);
        straight.speed = straight.tuning().max_speed;
        straight.throttle = Throttle::Flank;
        step_ship(&mut straight, 0.05, WORLD);

        // Same forward progress, different lateral position.
        assert!((turning.pos.y - straight.pos.y).abs() > 1e-3);
    }

    #[test]
    fn destroyed_ship_does_not_move() {
        let mut ship = ship_at(1000.0, 1000.0, ShipClass::Corvette);
        ship.throttle = Throttle::Flank;
        ship.speed = 100.0;
        ship.apply_damage(ship.max_hull);
        step_ship(&mut ship, 1.0, WORLD);
        assert_eq!(ship.pos, Vec2::new(1000.0, 1000.0));
    }

    #[test]
    fn position_clamped_to_world_bounds() {
        let mut ship = ship_at(WORLD - 1.0, 500.0, ShipClass::Corvette);
        ship.speed = ship.tuning().max_speed;
        ship.throttle = Throttle::Flank;
        for _ in 0..100 {
            step_ship(&mut ship, 0.1, WORLD);
        }
        assert!(ship.pos.x <= WORLD && ship.pos.x >= 0.0);
    }

    #[test]
    fn split_step_matches_single_step_within_tolerance() {
        let mut whole = ship_at(2000.0, 2000.0, ShipClass::Frigate);
        whole.speed = whole.tuning().max_speed * 0.6;
        whole.throttle = Throttle::Half;
        whole.rudder = Rudder::HalfRight;

        let mut split = whole.clone();

        step_ship(&mut whole, 0.1, WORLD);
        step_ship(&mut split, 0.05, WORLD);
        step_ship(&mut split, 0.05, WORLD);

        // Integration error between the two schedules is second order in dt.
        assert!(whole.pos.distance(split.pos) < 0.5);
        assert!((whole.rotation - split.rotation).abs() < 1e-2);
        assert!((whole.speed - split.speed).abs() < 1e-3);
    }
}
