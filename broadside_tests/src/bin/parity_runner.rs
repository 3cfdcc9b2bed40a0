//! Prediction-parity runner.
//!
//! Runs deterministic scenarios that step two independent worlds through
//! the shared simulation code and checks they agree, the way a predicting
//! client must agree with the authoritative server. Prints a summary and
//! exits non-zero on any failure, for use in CI.

use std::time::Instant;

use broadside_shared::math::Vec2;
use broadside_shared::movement::step_ship;
use broadside_shared::net::{
    decode_from_bytes, encode_to_bytes, ClientMsg, ConnId, DeviceId, PlayerState, ServerMsg,
};
use broadside_shared::projectile::{Projectile, Weapon};
use broadside_shared::ship::{Rudder, Ship, ShipClass, Throttle};
use broadside_shared::world::{World, WorldEvent};

const WORLD_SIZE: f32 = 5000.0;

struct Outcome {
    name: &'static str,
    category: &'static str,
    error: Option<String>,
}

fn run_test<F>(results: &mut Vec<Outcome>, category: &'static str, name: &'static str, f: F)
where
    F: FnOnce() -> Result<(), String>,
{
    let start = Instant::now();
    let error = f().err();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let mark = if error.is_some() { "FAIL" } else { "  ok" };
    println!("  {mark} {name} ({elapsed_ms:.1}ms)");
    if let Some(err) = &error {
        println!("       {err}");
    }
    results.push(Outcome { name, category, error });
}

fn ship(id: u32, class: ShipClass, x: f32, y: f32) -> Ship {
    Ship::new(
        ConnId(id),
        DeviceId::from(format!("dev-{id}")),
        format!("ship-{id}"),
        "#808080",
        class,
        Vec2::new(x, y),
    )
}

fn approx(a: f32, b: f32, tol: f32, what: &str) -> Result<(), String> {
    if (a - b).abs() <= tol {
        Ok(())
    } else {
        Err(format!("{what}: {a} vs {b} (tol {tol})"))
    }
}

fn movement_scenarios(results: &mut Vec<Outcome>) {
    const CATEGORY: &str = "movement";
    println!("Movement:");

    run_test(results, CATEGORY, "identical inputs give identical paths", || {
        let mut a = ship(1, ShipClass::Frigate, 1000.0, 1000.0);
        let mut b = a.clone();
        a.throttle = Throttle::Flank;
        a.rudder = Rudder::HalfRight;
        b.throttle = Throttle::Flank;
        b.rudder = Rudder::HalfRight;
        for _ in 0..600 {
            step_ship(&mut a, 0.05, WORLD_SIZE);
            step_ship(&mut b, 0.05, WORLD_SIZE);
        }
        if a.pos != b.pos || a.rotation != b.rotation || a.speed != b.speed {
            return Err(format!("states diverged: {:?} vs {:?}", a.pos, b.pos));
        }
        Ok(())
    });

    run_test(results, CATEGORY, "client-rate steps track server-rate steps", || {
        // 60 Hz prediction against a 20 Hz authority over the same second,
        // starting from a settled speed so easing error stays second-order.
        let mut fine = ship(1, ShipClass::Corvette, 2000.0, 2000.0);
        fine.throttle = Throttle::Half;
        fine.speed = fine.tuning().max_speed * Throttle::Half.fraction();
        fine.rudder = Rudder::HalfLeft;
        let mut coarse = fine.clone();
        for _ in 0..60 {
            step_ship(&mut fine, 1.0 / 60.0, WORLD_SIZE);
        }
        for _ in 0..20 {
            step_ship(&mut coarse, 1.0 / 20.0, WORLD_SIZE);
        }
        approx(fine.pos.x, coarse.pos.x, 2.5, "x")?;
        approx(fine.pos.y, coarse.pos.y, 2.5, "y")?;
        approx(fine.rotation, coarse.rotation, 0.02, "rotation")
    });

    run_test(results, CATEGORY, "position stays inside the world", || {
        let mut s = ship(1, ShipClass::Corvette, 10.0, 10.0);
        s.throttle = Throttle::ReverseFull;
        s.rotation = std::f32::consts::FRAC_PI_4;
        for _ in 0..1200 {
            step_ship(&mut s, 0.05, WORLD_SIZE);
            if !(0.0..=WORLD_SIZE).contains(&s.pos.x) || !(0.0..=WORLD_SIZE).contains(&s.pos.y) {
                return Err(format!("escaped at {:?}", s.pos));
            }
        }
        Ok(())
    });

    run_test(results, CATEGORY, "destroyed ships hold still", || {
        let mut s = ship(1, ShipClass::Frigate, 500.0, 500.0);
        s.throttle = Throttle::Flank;
        s.speed = 100.0;
        s.apply_damage(s.max_hull);
        let before = s.pos;
        step_ship(&mut s, 0.5, WORLD_SIZE);
        if s.pos != before {
            return Err(format!("moved from {before:?} to {:?}", s.pos));
        }
        Ok(())
    });
}

fn projectile_scenarios(results: &mut Vec<Outcome>) {
    const CATEGORY: &str = "projectile";
    println!("Projectiles:");

    run_test(results, CATEGORY, "two worlds agree on a projectile hit", || {
        let build = || {
            let mut w = World::new(WORLD_SIZE);
            w.insert_ship(ship(1, ShipClass::Frigate, 1000.0, 1000.0));
            w.insert_ship(ship(2, ShipClass::Dreadnought, 1300.0, 1000.0));
            w.add_projectile(Projectile::new(
                "1-1",
                Weapon::Cannon,
                Vec2::new(1030.0, 1000.0),
                0.0,
                ConnId(1),
                0,
                ShipClass::Frigate.tuning().collision_radius,
            ));
            w
        };
        let step_all = |w: &mut World| -> Vec<WorldEvent> {
            let mut all = Vec::new();
            for i in 0..40i64 {
                all.extend(w.step(0.05, i * 50, Instant::now()));
            }
            all
        };
        let events_a = step_all(&mut build());
        let events_b = step_all(&mut build());
        if events_a != events_b {
            return Err(format!("event streams differ: {events_a:?} vs {events_b:?}"));
        }
        let hit = events_a
            .iter()
            .any(|e| matches!(e, WorldEvent::ProjectileHit { target, .. } if *target == ConnId(2)));
        if !hit {
            return Err("expected a hit on ship 2".to_string());
        }
        Ok(())
    });

    run_test(results, CATEGORY, "arming distance protects the firer only", || {
        let radius = ShipClass::Frigate.tuning().collision_radius;
        let mut w = World::new(WORLD_SIZE);
        w.insert_ship(ship(1, ShipClass::Frigate, 1000.0, 1000.0));
        // Shot spawned at our own bow, still inside our own circle.
        w.add_projectile(Projectile::new(
            "1-1",
            Weapon::Cannon,
            Vec2::new(1000.0 + radius * 0.5, 1000.0),
            0.0,
            ConnId(1),
            0,
            radius,
        ));
        let events = w.step(1e-4, 0, Instant::now());
        let self_hit = events
            .iter()
            .any(|e| matches!(e, WorldEvent::ProjectileHit { target, .. } if *target == ConnId(1)));
        if self_hit {
            return Err("unarmed shot hit its own firer".to_string());
        }
        Ok(())
    });

    run_test(results, CATEGORY, "range expiry is exact", || {
        let mut w = World::new(WORLD_SIZE);
        let mut p = Projectile::new(
            "1-1",
            Weapon::Torpedo,
            Vec2::new(100.0, 100.0),
            0.0,
            ConnId(1),
            0,
            10.0,
        );
        p.distance_traveled = Weapon::Torpedo.max_range() - 1.0;
        w.add_projectile(p);
        let events = w.step(0.05, 100, Instant::now());
        let expired = events
            .iter()
            .any(|e| matches!(e, WorldEvent::ProjectileExpired { id } if id == "1-1"));
        if !expired || w.projectile_count() != 0 {
            return Err("projectile should have expired at max range".to_string());
        }
        Ok(())
    });
}

fn collision_scenarios(results: &mut Vec<Outcome>) {
    const CATEGORY: &str = "collision";
    println!("Collisions:");

    run_test(results, CATEGORY, "insertion order does not change the outcome", || {
        let run = |first_light: bool| -> Result<(f32, f32), String> {
            let mut w = World::new(WORLD_SIZE);
            let mut light = ship(1, ShipClass::Corvette, 1000.0, 1000.0);
            light.speed = 120.0;
            let heavy = ship(2, ShipClass::Dreadnought, 1030.0, 1000.0);
            if first_light {
                w.insert_ship(light);
                w.insert_ship(heavy);
            } else {
                w.insert_ship(heavy);
                w.insert_ship(light);
            }
            let events = w.step(0.01, 10, Instant::now());
            for e in events {
                if let WorldEvent::ShipsCollided { a, damage_a, damage_b, .. } = e {
                    // Normalize so the tuple is (light, heavy) damage.
                    return Ok(if a == ConnId(1) {
                        (damage_a, damage_b)
                    } else {
                        (damage_b, damage_a)
                    });
                }
            }
            Err("no collision".to_string())
        };
        let (la, ha) = run(true)?;
        let (lb, hb) = run(false)?;
        approx(la, lb, 1e-3, "light-ship damage")?;
        approx(ha, hb, 1e-3, "heavy-ship damage")
    });

    run_test(results, CATEGORY, "separation ends the overlap", || {
        let mut w = World::new(WORLD_SIZE);
        w.insert_ship(ship(1, ShipClass::Frigate, 1000.0, 1000.0));
        w.insert_ship(ship(2, ShipClass::Frigate, 1010.0, 1000.0));
        w.step(0.01, 10, Instant::now());
        let a = w.ship(ConnId(1)).ok_or("ship 1 missing")?;
        let b = w.ship(ConnId(2)).ok_or("ship 2 missing")?;
        let gap = a.pos.distance(b.pos);
        let touch = a.tuning().collision_radius + b.tuning().collision_radius;
        if gap + 1e-3 < touch {
            return Err(format!("still overlapping: {gap} < {touch}"));
        }
        Ok(())
    });
}

fn protocol_scenarios(results: &mut Vec<Outcome>) {
    const CATEGORY: &str = "protocol";
    println!("Protocol:");

    run_test(results, CATEGORY, "wire tags are stable", || {
        let msg = ClientMsg::UpdatePosition { x: 1.0, y: 2.0, rotation: 0.25 };
        let bytes = encode_to_bytes(&msg).map_err(|e| e.to_string())?;
        let text = String::from_utf8(bytes).map_err(|e| e.to_string())?;
        if !text.contains(r#""type":"updatePosition""#) {
            return Err(format!("unexpected encoding: {text}"));
        }
        Ok(())
    });

    run_test(results, CATEGORY, "player state survives the wire", || {
        let original = ship(7, ShipClass::Dreadnought, 123.0, 456.0);
        let state = PlayerState::from_ship(&original);
        let msg = ServerMsg::PlayerJoined { player: state.clone() };
        let bytes = encode_to_bytes(&msg).map_err(|e| e.to_string())?;
        let back: ServerMsg = decode_from_bytes(&bytes).map_err(|e| e.to_string())?;
        match back {
            ServerMsg::PlayerJoined { player } if player == state => Ok(()),
            other => Err(format!("mismatch: {other:?}")),
        }
    });
}

fn main() {
    println!("Broadside prediction-parity runner");
    println!("==================================");

    let mut results = Vec::new();
    movement_scenarios(&mut results);
    projectile_scenarios(&mut results);
    collision_scenarios(&mut results);
    protocol_scenarios(&mut results);

    let total = results.len();
    let failed: Vec<&Outcome> = results.iter().filter(|r| r.error.is_some()).collect();
    println!("==================================");
    println!("{} scenarios, {} failed", total, failed.len());
    for outcome in &failed {
        println!("  FAIL [{}] {}", outcome.category, outcome.name);
    }
    if !failed.is_empty() {
        std::process::exit(1);
    }
}
