//! World aggregate.
//!
//! Owns the live entity tables: ships keyed by connection id, projectiles
//! keyed by projectile id, the spatial index, and the square bounds. There
//! is deliberately no ambient global state; the server owns one `World`
//! and passes it into handlers, the client owns another for prediction,
//! and both advance it with the same `step`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::collision::{
    circles_overlap, projectile_hits, resolve_ship_impact, PAIR_COOLDOWN_MS,
};
use crate::math::Vec2;
use crate::movement;
use crate::net::{ConnId, PlayerState, ProjectileState};
use crate::projectile::Projectile;
use crate::ship::Ship;
use crate::spatial::{SpatialGrid, DEFAULT_CELL_SIZE};

/// Largest class collision radius; bounds the pair-query radius.
const MAX_SHIP_RADIUS: f32 = 40.0;
/// Keep spawns off the world edge.
const SPAWN_MARGIN: f32 = 0.05;

/// Something that happened during a world step and needs reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ProjectileExpired {
        id: String,
    },
    ProjectileHit {
        id: String,
        target: ConnId,
        source: ConnId,
        damage: f32,
        new_hull: f32,
        destroyed: bool,
    },
    ShipsCollided {
        a: ConnId,
        b: ConnId,
        damage_a: f32,
        damage_b: f32,
        hull_a: f32,
        hull_b: f32,
        destroyed_a: bool,
        destroyed_b: bool,
    },
}

/// Live entity tables plus the spatial index over ships.
pub struct World {
    world_size: f32,
    ships: HashMap<ConnId, Ship>,
    projectiles: HashMap<String, Projectile>,
    grid: SpatialGrid<ConnId>,
    /// Per unordered ship pair: when they last collided.
    pair_cooldowns: HashMap<(u32, u32), Instant>,
}

impl World {
    pub fn new(world_size: f32) -> Self {
        Self {
            world_size,
            ships: HashMap::new(),
            projectiles: HashMap::new(),
            grid: SpatialGrid::new(DEFAULT_CELL_SIZE),
            pair_cooldowns: HashMap::new(),
        }
    }

    pub fn world_size(&self) -> f32 {
        self.world_size
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    /// Random in-bounds spawn point, margined off the edges.
    pub fn spawn_position<R: rand::Rng>(&self, rng: &mut R) -> Vec2 {
        let margin = self.world_size * SPAWN_MARGIN;
        Vec2::new(
            rng.gen_range(margin..self.world_size - margin),
            rng.gen_range(margin..self.world_size - margin),
        )
    }

    pub fn insert_ship(&mut self, ship: Ship) {
        self.grid.upsert(ship.id, ship.pos);
        self.ships.insert(ship.id, ship);
    }

    pub fn remove_ship(&mut self, id: ConnId) -> Option<Ship> {
        self.grid.remove(id);
        self.ships.remove(&id)
    }

    /// Moves a ship's ownership to a new connection id in place,
    /// preserving hull and position (session supersede).
    pub fn rekey_ship(&mut self, old: ConnId, new: ConnId) -> Option<&Ship> {
        let mut ship = self.remove_ship(old)?;
        ship.id = new;
        self.insert_ship(ship);
        self.ships.get(&new)
    }

    pub fn ship(&self, id: ConnId) -> Option<&Ship> {
        self.ships.get(&id)
    }

    pub fn ship_mut(&mut self, id: ConnId) -> Option<&mut Ship> {
        self.ships.get_mut(&id)
    }

    pub fn ships(&self) -> impl Iterator<Item = &Ship> {
        self.ships.values()
    }

    pub fn ship_ids(&self) -> Vec<ConnId> {
        self.ships.keys().copied().collect()
    }

    /// Applies a validated position/rotation and re-buckets the ship.
    pub fn set_ship_position(&mut self, id: ConnId, pos: Vec2, rotation: f32) -> bool {
        let Some(ship) = self.ships.get_mut(&id) else {
            return false;
        };
        ship.pos = pos;
        ship.rotation = rotation;
        self.grid.upsert(id, pos);
        true
    }

    /// Advances one ship through the shared movement model and keeps the
    /// spatial index in sync.
    pub fn step_ship_movement(&mut self, id: ConnId, dt: f32) {
        let world_size = self.world_size;
        if let Some(ship) = self.ships.get_mut(&id) {
            movement::step_ship(ship, dt, world_size);
            self.grid.upsert(id, ship.pos);
        }
    }

    /// Inserts a projectile unless its id is already known (duplicate
    /// broadcast, or an echo of one we authored).
    pub fn add_projectile(&mut self, projectile: Projectile) -> bool {
        if self.projectiles.contains_key(&projectile.id) {
            return false;
        }
        self.projectiles.insert(projectile.id.clone(), projectile);
        true
    }

    pub fn remove_projectile(&mut self, id: &str) -> Option<Projectile> {
        self.projectiles.remove(id)
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.values()
    }

    /// Wire snapshot of every ship except `exclude`.
    pub fn player_states_except(&self, exclude: ConnId) -> Vec<PlayerState> {
        self.ships
            .values()
            .filter(|s| s.id != exclude)
            .map(PlayerState::from_ship)
            .collect()
    }

    pub fn projectile_states(&self) -> Vec<ProjectileState> {
        self.projectiles
            .values()
            .map(ProjectileState::from_projectile)
            .collect()
    }

    /// One simulation step: advance projectiles, expire them, resolve
    /// projectile hits, then ship-ship contacts. Ship *movement* is not
    /// advanced here; each controller (client for its own ship, server on
    /// receipt of a position update) drives that explicitly.
    pub fn step(&mut self, dt: f32, now_ms: i64, now: Instant) -> Vec<WorldEvent> {
        let mut events = Vec::new();

        // Projectile flight and expiry.
        let mut expired = Vec::new();
        for p in self.projectiles.values_mut() {
            p.advance(dt);
            if p.is_expired(now_ms) {
                expired.push(p.id.clone());
            }
        }
        for id in expired {
            self.projectiles.remove(&id);
            events.push(WorldEvent::ProjectileExpired { id });
        }

        // Projectile-ship hits via the grid neighborhood.
        let mut spent = Vec::new();
        for p in self.projectiles.values() {
            let candidates = self.grid.query_radius(p.pos, MAX_SHIP_RADIUS);
            let hit = candidates.into_iter().find_map(|id| {
                let ship = self.ships.get(&id)?;
                projectile_hits(p, ship).then_some(id)
            });
            if let Some(target) = hit {
                spent.push((p.id.clone(), target, p.source, p.weapon.damage()));
            }
        }
        for (id, target, source, damage) in spent {
            self.projectiles.remove(&id);
            if let Some(ship) = self.ships.get_mut(&target) {
                let change = ship.apply_damage(damage);
                events.push(WorldEvent::ProjectileHit {
                    id,
                    target,
                    source,
                    damage: change.applied,
                    new_hull: change.new_hull,
                    destroyed: change.destroyed,
                });
            }
        }

        // Ship-ship contacts, once per pair per cooldown window.
        for (a, b) in self.grid.neighbor_pairs(MAX_SHIP_RADIUS * 2.0) {
            let (Some(sa), Some(sb)) = (self.ships.get(&a), self.ships.get(&b)) else {
                continue;
            };
            if !sa.is_active() || !sb.is_active() {
                continue;
            }
            if !circles_overlap(
                sa.pos,
                sa.tuning().collision_radius,
                sb.pos,
                sb.tuning().collision_radius,
            ) {
                continue;
            }
            let key = pair_key(a, b);
            if let Some(last) = self.pair_cooldowns.get(&key) {
                if now.duration_since(*last) < Duration::from_millis(PAIR_COOLDOWN_MS) {
                    continue;
                }
            }
            self.pair_cooldowns.insert(key, now);

            let impact = resolve_ship_impact(sa, sb);
            let world_size = self.world_size;

            let mut apply = |ships: &mut HashMap<ConnId, Ship>,
                             id: ConnId,
                             push: Vec2,
                             speed: f32,
                             damage: f32| {
                let ship = ships.get_mut(&id)?;
                ship.pos = ship.pos.add(push);
                ship.pos.x = ship.pos.x.clamp(0.0, world_size);
                ship.pos.y = ship.pos.y.clamp(0.0, world_size);
                ship.speed = speed;
                let change = ship.apply_damage(damage);
                Some((change.new_hull, change.destroyed, ship.pos))
            };
            let Some((hull_a, destroyed_a, pos_a)) = apply(
                &mut self.ships,
                a,
                impact.push_a,
                impact.speed_a,
                impact.damage_to_a,
            ) else {
                continue;
            };
            let Some((hull_b, destroyed_b, pos_b)) = apply(
                &mut self.ships,
                b,
                impact.push_b,
                impact.speed_b,
                impact.damage_to_b,
            ) else {
                continue;
            };
            self.grid.upsert(a, pos_a);
            self.grid.upsert(b, pos_b);

            events.push(WorldEvent::ShipsCollided {
                a,
                b,
                damage_a: impact.damage_to_a,
                damage_b: impact.damage_to_b,
                hull_a,
                hull_b,
                destroyed_a,
                destroyed_b,
            });
        }

        // Old pair entries are useless once well past the window.
        let horizon = Duration::from_millis(PAIR_COOLDOWN_MS * 20);
        self.pair_cooldowns
            .retain(|_, last| now.duration_since(*last) < horizon);

        events
    }
}

fn pair_key(a: ConnId, b: ConnId) -> (u32, u32) {
    if a.0 <= b.0 {
        (a.0, b.0)
    } else {
        (b.0, a.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::DeviceId;
    use crate::projectile::Weapon;
    use crate::ship::ShipClass;

    fn world() -> World {
        World::new(5000.0)
    }

    fn ship(id: u32, class: ShipClass, x: f32, y: f32) -> Ship {
        Ship::new(
            ConnId(id),
            DeviceId::from(format!("dev-{id}")),
            format!("ship-{id}"),
            "#404040",
            class,
            Vec2::new(x, y),
        )
    }

    #[test]
    fn projectile_removed_within_one_step_of_range() {
        let mut w = world();
        let mut p = Projectile::new(
            "1-1",
            Weapon::Cannon,
            Vec2::new(100.0, 100.0),
            0.0,
            ConnId(1),
            0,
            26.0,
        );
        p.distance_traveled = Weapon::Cannon.max_range() - 0.1;
        w.add_projectile(p);

        let events = w.step(0.05, 10, Instant::now());
        assert!(events
            .iter()
            .any(|e| matches!(e, WorldEvent::ProjectileExpired { id } if id == "1-1")));
        assert_eq!(w.projectile_count(), 0);
    }

    #[test]
    fn duplicate_projectile_ids_are_skipped() {
        let mut w = world();
        let p = Projectile::new("1-1", Weapon::Cannon, Vec2::ZERO, 0.0, ConnId(1), 0, 26.0);
        assert!(w.add_projectile(p.clone()));
        assert!(!w.add_projectile(p));
        assert_eq!(w.projectile_count(), 1);
    }

    #[test]
    fn projectile_hit_damages_target_and_is_consumed() {
        let mut w = world();
        w.insert_ship(ship(2, ShipClass::Frigate, 210.0, 200.0));
        let p = Projectile::new(
            "1-1",
            Weapon::Torpedo,
            Vec2::new(200.0, 200.0),
            0.0,
            ConnId(1),
            0,
            18.0,
        );
        w.add_projectile(p);

        let events = w.step(0.01, 10, Instant::now());
        let hit = events.iter().find_map(|e| match e {
            WorldEvent::ProjectileHit {
                target, new_hull, ..
            } => Some((*target, *new_hull)),
            _ => None,
        });
        let (target, new_hull) = hit.expect("expected a hit event");
        assert_eq!(target, ConnId(2));
        assert_eq!(new_hull, 100.0 - Weapon::Torpedo.damage());
        assert_eq!(w.projectile_count(), 0);
    }

    #[test]
    fn collision_fires_once_then_respects_cooldown() {
        let mut w = world();
        w.insert_ship(ship(1, ShipClass::Corvette, 200.0, 200.0));
        w.insert_ship(ship(2, ShipClass::Dreadnought, 210.0, 200.0));

        let t0 = Instant::now();
        let first = w.step(0.01, 10, t0);
        assert!(first
            .iter()
            .any(|e| matches!(e, WorldEvent::ShipsCollided { .. })));

        // Push them back together; within the window nothing new fires.
        w.set_ship_position(ConnId(1), Vec2::new(200.0, 200.0), 0.0);
        w.set_ship_position(ConnId(2), Vec2::new(210.0, 200.0), 0.0);
        let again = w.step(0.01, 20, t0 + Duration::from_millis(100));
        assert!(!again
            .iter()
            .any(|e| matches!(e, WorldEvent::ShipsCollided { .. })));

        // Past the window the pair may collide again.
        let later = w.step(0.01, 600, t0 + Duration::from_millis(PAIR_COOLDOWN_MS + 50));
        assert!(later
            .iter()
            .any(|e| matches!(e, WorldEvent::ShipsCollided { .. })));
    }

    #[test]
    fn heavier_pair_deals_at_least_light_pair_damage() {
        // Corvette vs dreadnought: multiplier is the dreadnought's.
        let mut heavy_world = world();
        let mut fast = ship(1, ShipClass::Corvette, 200.0, 200.0);
        fast.speed = 150.0;
        heavy_world.insert_ship(fast.clone());
        heavy_world.insert_ship(ship(2, ShipClass::Dreadnought, 214.0, 200.0));
        let heavy_events = heavy_world.step(0.001, 10, Instant::now());

        let mut light_world = world();
        light_world.insert_ship(fast);
        light_world.insert_ship(ship(2, ShipClass::Corvette, 214.0, 200.0));
        let light_events = light_world.step(0.001, 10, Instant::now());

        let damage = |events: &[WorldEvent]| {
            events
                .iter()
                .find_map(|e| match e {
                    WorldEvent::ShipsCollided { damage_a, .. } => Some(*damage_a),
                    _ => None,
                })
                .expect("collision expected")
        };
        assert!(damage(&heavy_events) >= damage(&light_events));
    }

    #[test]
    fn destroyed_ships_do_not_collide() {
        let mut w = world();
        let mut dead = ship(1, ShipClass::Frigate, 200.0, 200.0);
        dead.apply_damage(dead.max_hull);
        w.insert_ship(dead);
        w.insert_ship(ship(2, ShipClass::Frigate, 205.0, 200.0));

        let events = w.step(0.01, 10, Instant::now());
        assert!(!events
            .iter()
            .any(|e| matches!(e, WorldEvent::ShipsCollided { .. })));
    }

    #[test]
    fn rekey_preserves_hull_and_position() {
        let mut w = world();
        let mut s = ship(1, ShipClass::Frigate, 300.0, 400.0);
        s.apply_damage(25.0);
        w.insert_ship(s);

        let moved = w.rekey_ship(ConnId(1), ConnId(9)).expect("rekeyed");
        assert_eq!(moved.hull, 75.0);
        assert_eq!(moved.pos, Vec2::new(300.0, 400.0));
        assert!(w.ship(ConnId(1)).is_none());
    }

    #[test]
    fn spawn_position_is_in_bounds() {
        let w = world();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let pos = w.spawn_position(&mut rng);
            assert!(pos.x > 0.0 && pos.x < w.world_size());
            assert!(pos.y > 0.0 && pos.y < w.world_size());
        }
    }
}
