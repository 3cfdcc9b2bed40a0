//! Authoritative game server.
//!
//! A single task owns all mutable state: the [`World`], the session table,
//! and the device bindings. Connection tasks (see [`crate::net`]) feed it
//! [`SessionEvent`]s through one channel, and a fixed-rate interval drives
//! the simulation tick, so no handler ever races another.
//!
//! # Session model
//! Every connection must identify with a device id before it may mutate
//! state. A device binds to at most one live connection; identifying from
//! a second connection supersedes the first, which is told to disconnect
//! and has its ship handed over intact. A clean disconnect parks the ship
//! so the same device can reclaim hull and position on reconnect, until
//! the liveness sweep ages the parked entry out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use broadside_shared::config::SimConfig;
use broadside_shared::math::Vec2;
use broadside_shared::net::{
    valid_position, ClientMsg, ConnId, DeviceId, FramedListener, PlayerState, ProjectileState,
    ServerMsg,
};
use broadside_shared::ship::{Ship, ShipClass};
use broadside_shared::world::{World, WorldEvent};

use crate::net::{accept_loop, SessionEvent};

/// Grace before a superseded connection's socket is forcibly closed.
const SUPERSEDE_GRACE: Duration = Duration::from_millis(500);

/// Default hull colors handed out when identification omits one.
const DEFAULT_COLORS: [&str; 6] = [
    "#b5423a", "#2c6e91", "#c9a227", "#3a7d44", "#6f4e7c", "#7d7461",
];

struct Session {
    peer: SocketAddr,
    outbox: mpsc::Sender<ServerMsg>,
    /// Signals the reader task to stop; consumed on forced disconnect.
    kill: Option<oneshot::Sender<()>>,
    device: Option<DeviceId>,
    name: String,
    last_activity: Instant,
    /// When the last position update landed, for speed estimation.
    last_position_at: Option<Instant>,
}

impl Session {
    fn identified(&self) -> bool {
        self.device.is_some()
    }
}

/// The authoritative server. Construct with [`GameServer::bind`], then
/// drive with [`GameServer::run`].
pub struct GameServer {
    cfg: SimConfig,
    local_addr: SocketAddr,
    world: World,
    sessions: HashMap<ConnId, Session>,
    devices: HashMap<DeviceId, ConnId>,
    /// Ships of cleanly-disconnected devices, kept for reclaim.
    parked: HashMap<DeviceId, (Ship, Instant)>,
    events_rx: mpsc::Receiver<SessionEvent>,
    last_sweep: Instant,
}

impl GameServer {
    /// Binds the listener and spawns the accept loop. The returned server
    /// must be `run` to process anything.
    pub async fn bind(cfg: SimConfig) -> Result<Self> {
        let addr: SocketAddr = cfg
            .server_addr
            .parse()
            .with_context(|| format!("bad server_addr {:?}", cfg.server_addr))?;
        let listener = FramedListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (events_tx, events_rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            if let Err(err) = accept_loop(listener, events_tx).await {
                warn!(%err, "accept loop exited");
            }
        });

        info!(%local_addr, tick_hz = cfg.tick_hz, world_size = cfg.world_size, "server listening");
        Ok(Self {
            world: World::new(cfg.world_size),
            cfg,
            local_addr,
            sessions: HashMap::new(),
            devices: HashMap::new(),
            parked: HashMap::new(),
            events_rx,
            last_sweep: Instant::now(),
        })
    }

    /// Binds on an OS-assigned port. Returns the server plus a config whose
    /// `server_addr` points at it, for wiring up clients in tests.
    pub async fn bind_ephemeral(tick_hz: u32) -> Result<(Self, SimConfig)> {
        let cfg = SimConfig {
            server_addr: "127.0.0.1:0".to_string(),
            tick_hz,
            ..SimConfig::default()
        };
        let server = Self::bind(cfg).await?;
        let mut client_cfg = server.cfg.clone();
        client_cfg.server_addr = server.local_addr.to_string();
        Ok((server, client_cfg))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs the event/tick loop until the accept loop dies and every
    /// connection has drained.
    pub async fn run(mut self) -> Result<()> {
        let dt = 1.0 / self.cfg.tick_hz as f32;
        let mut ticker = tokio::time::interval(Duration::from_secs_f32(dt));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                ev = self.events_rx.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => {
                        info!("event channel closed, shutting down");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => self.step(dt),
            }
        }
    }

    fn handle_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::Connected { conn, peer, outbox, kill } => {
                self.sessions.insert(
                    conn,
                    Session {
                        peer,
                        outbox,
                        kill: Some(kill),
                        device: None,
                        name: String::new(),
                        last_activity: Instant::now(),
                        last_position_at: None,
                    },
                );
                debug!(conn = %conn, %peer, "session opened");
            }
            SessionEvent::Inbound { conn, msg } => self.handle_msg(conn, msg),
            SessionEvent::Closed { conn } => {
                // Superseded connections are already gone from the table.
                if self.sessions.contains_key(&conn) {
                    self.cleanup_session(conn, "connection closed");
                }
            }
        }
    }

    fn handle_msg(&mut self, conn: ConnId, msg: ClientMsg) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        session.last_activity = Instant::now();

        if msg.requires_identity() && !session.identified() {
            debug!(conn = %conn, ?msg, "rejected pre-identification message");
            self.send_to(
                conn,
                ServerMsg::IdentificationRequired {
                    message: "identify before sending game messages".to_string(),
                },
            );
            return;
        }

        match msg {
            ClientMsg::IdentifyDevice { device_id, player_name, color, ship_type } => {
                self.handle_identify(conn, device_id, player_name, color, ship_type);
            }
            ClientMsg::RequestGameState => self.send_snapshot(conn),
            ClientMsg::UpdatePosition { x, y, rotation } => {
                self.handle_update_position(conn, x, y, rotation);
            }
            ClientMsg::ProjectileFired(state) => self.handle_projectile_fired(conn, state),
            ClientMsg::DamageShip { target_id, amount, source_id } => {
                self.handle_damage_ship(conn, target_id, amount, source_id);
            }
            ClientMsg::Heartbeat => {}
            ClientMsg::RequestRespawn => self.handle_request_respawn(conn),
        }
    }

    fn handle_identify(
        &mut self,
        conn: ConnId,
        device_id: Option<DeviceId>,
        player_name: String,
        color: Option<String>,
        ship_type: Option<ShipClass>,
    ) {
        let mut rng = rand::thread_rng();
        let device = match device_id {
            Some(d) => d,
            None => {
                let minted = DeviceId::mint(&mut rng);
                debug!(conn = %conn, device = %minted, "minted device id");
                self.send_to(conn, ServerMsg::DeviceIdAssigned { device_id: minted.clone() });
                minted
            }
        };

        // A live session re-identifying under a different device releases
        // its old binding; otherwise the stale entry would keep mapping a
        // dead device to this connection.
        if let Some(old_device) = self.sessions.get(&conn).and_then(|s| s.device.clone()) {
            if old_device != device && self.devices.get(&old_device) == Some(&conn) {
                debug!(conn = %conn, from = %old_device, to = %device, "device rebound");
                self.devices.remove(&old_device);
            }
        }

        // Same device on another live connection: the newer one wins.
        if let Some(&old) = self.devices.get(&device) {
            if old != conn && self.sessions.contains_key(&old) {
                self.supersede(old, conn, &device);
            }
        }

        let color = color.unwrap_or_else(|| {
            use rand::Rng;
            DEFAULT_COLORS[rng.gen_range(0..DEFAULT_COLORS.len())].to_string()
        });

        let ship = if let Some(existing) = self.world.ship(conn) {
            // Handed over by supersede, or a repeat identify on a live
            // session; the ship follows the new identity.
            let id = existing.id;
            if let Some(s) = self.world.ship_mut(id) {
                s.device = device.clone();
                s.name = player_name.clone();
                s.color = color;
            }
            self.world.ship(id).cloned()
        } else if let Some((mut parked, _)) = self.parked.remove(&device) {
            debug!(conn = %conn, device = %device, hull = parked.hull, "reclaimed parked ship");
            parked.id = conn;
            parked.name = player_name.clone();
            parked.color = color;
            self.world.insert_ship(parked);
            self.world.ship(conn).cloned()
        } else {
            let class = ship_type.unwrap_or_else(|| ShipClass::random(&mut rng));
            let pos = self.world.spawn_position(&mut rng);
            let ship = Ship::new(conn, device.clone(), player_name.clone(), color, class, pos);
            self.world.insert_ship(ship);
            self.world.ship(conn).cloned()
        };

        self.devices.insert(device.clone(), conn);
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.device = Some(device.clone());
            session.name = player_name.clone();
        }

        if let Some(ship) = ship {
            info!(conn = %conn, device = %device, name = %player_name, class = ?ship.class, "player identified");
            self.broadcast_except(conn, ServerMsg::PlayerJoined {
                player: PlayerState::from_ship(&ship),
            });
        }
        self.send_snapshot(conn);
    }

    /// Kicks `old` in favor of `new`, handing the ship over with hull and
    /// position intact. The old socket gets a short grace to flush the
    /// notice before its reader is killed.
    fn supersede(&mut self, old: ConnId, new: ConnId, device: &DeviceId) {
        info!(old = %old, new = %new, device = %device, "superseding session");
        self.send_to(old, ServerMsg::ForceDisconnect {
            reason: "device connected from a newer session".to_string(),
        });
        if let Some(mut session) = self.sessions.remove(&old) {
            if let Some(kill) = session.kill.take() {
                tokio::spawn(async move {
                    tokio::time::sleep(SUPERSEDE_GRACE).await;
                    let _ = kill.send(());
                });
            }
        }
        if self.world.rekey_ship(old, new).is_some() {
            self.broadcast_except(new, ServerMsg::PlayerLeft { id: old });
        }
    }

    fn handle_update_position(&mut self, conn: ConnId, x: f32, y: f32, rotation: f32) {
        if !valid_position(x, y, rotation, self.world.world_size()) {
            warn!(conn = %conn, x, y, rotation, "invalid position rejected, resyncing");
            self.send_snapshot(conn);
            return;
        }
        let now = Instant::now();
        let elapsed = self
            .sessions
            .get_mut(&conn)
            .and_then(|s| s.last_position_at.replace(now))
            .map(|prev| now.duration_since(prev).as_secs_f32());

        let Some(ship) = self.world.ship(conn) else {
            self.send_snapshot(conn);
            return;
        };
        if ship.destroyed {
            return;
        }

        // The wire carries pose only; estimate signed speed from the
        // displacement so server-side collisions see realistic energy.
        let new_pos = Vec2::new(x, y);
        if let Some(elapsed) = elapsed.filter(|e| *e > 1e-3) {
            let disp = new_pos.sub(ship.pos);
            let heading = Vec2::from_heading(rotation);
            let max = ship.tuning().max_speed;
            let magnitude = (disp.len() / elapsed).min(max);
            let speed = if disp.dot(heading) >= 0.0 { magnitude } else { -magnitude };
            if let Some(ship) = self.world.ship_mut(conn) {
                ship.speed = speed;
            }
        }
        self.world.set_ship_position(conn, new_pos, rotation);
        self.broadcast_except(conn, ServerMsg::PlayerMoved { id: conn, x, y, rotation });
    }

    fn handle_projectile_fired(&mut self, conn: ConnId, mut state: ProjectileState) {
        if !state.x.is_finite() || !state.y.is_finite() || !state.rotation.is_finite() {
            warn!(conn = %conn, id = %state.id, "non-finite projectile rejected");
            return;
        }
        // Clients only fire for themselves.
        state.source_id = conn;
        state.spawn_timestamp = Utc::now().timestamp_millis();
        state.distance_traveled = 0.0;

        let Some(ship) = self.world.ship(conn) else {
            return;
        };
        if ship.destroyed {
            debug!(conn = %conn, "fire from destroyed ship ignored");
            return;
        }
        if !ship.weapon_ready(state.weapon) {
            debug!(conn = %conn, weapon = ?state.weapon, "fire inside cooldown ignored");
            return;
        }
        let arming = ship.tuning().collision_radius;
        let projectile = state.to_projectile(arming);
        if !self.world.add_projectile(projectile) {
            debug!(conn = %conn, id = %state.id, "duplicate projectile id ignored");
            return;
        }
        if let Some(ship) = self.world.ship_mut(conn) {
            ship.start_cooldown(state.weapon);
        }
        self.broadcast_except(conn, ServerMsg::ProjectileFired(state));
    }

    fn handle_damage_ship(&mut self, conn: ConnId, target_id: ConnId, amount: f32, source_id: ConnId) {
        if !amount.is_finite() || amount <= 0.0 {
            warn!(conn = %conn, amount, "bad damage amount ignored");
            return;
        }
        // The reporting connection is the source no matter what it claims.
        if source_id != conn {
            debug!(conn = %conn, claimed = %source_id, "spoofed damage source overridden");
        }
        let source = conn;
        let Some(target) = self.world.ship_mut(target_id) else {
            debug!(conn = %conn, target = %target_id, "damage for unknown ship ignored");
            return;
        };
        if target.destroyed {
            return;
        }
        let change = target.apply_damage(amount);
        let timestamp = Utc::now().timestamp_millis();
        self.broadcast(ServerMsg::DamageConfirmed {
            target_id,
            new_hull: change.new_hull,
            damage: change.applied,
            timestamp,
        });
        if change.destroyed {
            self.announce_destroyed(target_id, source);
        }
    }

    fn handle_request_respawn(&mut self, conn: ConnId) {
        let destroyed = self.world.ship(conn).map(|s| s.destroyed);
        match destroyed {
            Some(true) => {
                let pos = {
                    let mut rng = rand::thread_rng();
                    self.world.spawn_position(&mut rng)
                };
                let player = self.world.ship_mut(conn).map(|ship| {
                    ship.respawn_at(pos);
                    PlayerState::from_ship(ship)
                });
                if let Some(player) = player {
                    info!(conn = %conn, x = pos.x, y = pos.y, "respawn granted");
                    self.send_to(conn, ServerMsg::RespawnAccepted { player: player.clone() });
                    self.broadcast_except(conn, ServerMsg::ShipRespawned { player });
                }
            }
            Some(false) => debug!(conn = %conn, "respawn for live ship ignored"),
            None => self.send_snapshot(conn),
        }
    }

    /// One simulation tick: cooldowns, projectile flight, collisions, and
    /// the resulting broadcasts. Also runs the liveness sweep when due.
    pub fn step(&mut self, dt: f32) {
        for id in self.world.ship_ids() {
            if let Some(ship) = self.world.ship_mut(id) {
                ship.tick_cooldowns();
            }
        }

        let now = Instant::now();
        let now_ms = Utc::now().timestamp_millis();
        for event in self.world.step(dt, now_ms, now) {
            match event {
                WorldEvent::ProjectileExpired { .. } => {
                    // Peers expire by the same range/timeout rules.
                }
                WorldEvent::ProjectileHit { target, source, damage, new_hull, destroyed, .. } => {
                    self.broadcast(ServerMsg::ShipDamaged {
                        id: target,
                        hull: new_hull,
                        source_id: source,
                        damage,
                        timestamp: now_ms,
                    });
                    if destroyed {
                        self.announce_destroyed(target, source);
                    }
                }
                WorldEvent::ShipsCollided {
                    a, b, damage_a, damage_b, hull_a, hull_b, destroyed_a, destroyed_b,
                } => {
                    self.broadcast(ServerMsg::ShipDamaged {
                        id: a,
                        hull: hull_a,
                        source_id: b,
                        damage: damage_a,
                        timestamp: now_ms,
                    });
                    self.broadcast(ServerMsg::ShipDamaged {
                        id: b,
                        hull: hull_b,
                        source_id: a,
                        damage: damage_b,
                        timestamp: now_ms,
                    });
                    // The separation moved both ships server-side; push the
                    // corrected poses so peers converge without waiting for
                    // the owners' next position reports.
                    self.broadcast_correction(a);
                    self.broadcast_correction(b);
                    if destroyed_a {
                        self.announce_destroyed(a, b);
                    }
                    if destroyed_b {
                        self.announce_destroyed(b, a);
                    }
                }
            }
        }

        if now.duration_since(self.last_sweep) >= Duration::from_secs(self.cfg.sweep_secs) {
            self.last_sweep = now;
            self.sweep(now);
        }
    }

    /// Reaps sessions silent past the timeout and ages out parked ships.
    fn sweep(&mut self, now: Instant) {
        let timeout = Duration::from_secs(self.cfg.session_timeout_secs);
        let stale: Vec<ConnId> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_activity) >= timeout)
            .map(|(&c, _)| c)
            .collect();
        for conn in stale {
            info!(conn = %conn, "sweeping inactive session");
            self.send_to(conn, ServerMsg::ForceDisconnect {
                reason: "session timed out".to_string(),
            });
            if let Some(session) = self.sessions.get_mut(&conn) {
                if let Some(kill) = session.kill.take() {
                    let _ = kill.send(());
                }
            }
            self.cleanup_session(conn, "inactivity timeout");
        }
        self.parked
            .retain(|_, (_, parked_at)| now.duration_since(*parked_at) < timeout);
    }

    /// Removes every trace of a connection: session, device binding, and
    /// the ship, which is parked for reclaim if the session had identified.
    fn cleanup_session(&mut self, conn: ConnId, reason: &str) {
        let Some(session) = self.sessions.remove(&conn) else {
            return;
        };
        debug!(conn = %conn, peer = %session.peer, name = %session.name, reason, "session cleaned up");
        if let Some(device) = session.device {
            if self.devices.get(&device) == Some(&conn) {
                self.devices.remove(&device);
            }
            if let Some(ship) = self.world.remove_ship(conn) {
                self.parked.insert(device, (ship, Instant::now()));
            }
            self.broadcast(ServerMsg::PlayerLeft { id: conn });
        }
    }

    /// Partial-state push with the authoritative pose and hull of a ship
    /// the server just moved.
    fn broadcast_correction(&self, id: ConnId) {
        let Some(ship) = self.world.ship(id) else {
            return;
        };
        self.broadcast(ServerMsg::PlayerUpdate {
            id,
            x: ship.pos.x,
            y: ship.pos.y,
            rotation: ship.rotation,
            ship_type: None,
            hull: Some(ship.hull),
            color: None,
        });
    }

    fn announce_destroyed(&mut self, id: ConnId, destroyed_by: ConnId) {
        let destroyer_name = self
            .world
            .ship(destroyed_by)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        info!(ship = %id, by = %destroyed_by, "ship destroyed");
        self.broadcast(ServerMsg::ShipDestroyed { id, destroyed_by, destroyer_name });
    }

    /// Full snapshot for one connection; requires its ship to exist.
    fn send_snapshot(&mut self, conn: ConnId) {
        let Some(ship) = self.world.ship(conn) else {
            self.send_to(
                conn,
                ServerMsg::IdentificationRequired {
                    message: "no ship for this session".to_string(),
                },
            );
            return;
        };
        let msg = ServerMsg::GameState {
            players: self.world.player_states_except(conn),
            self_player: PlayerState::from_ship(ship),
            projectiles: self.world.projectile_states(),
        };
        self.send_to(conn, msg);
    }

    /// Queues a message for one connection. Dropping on a full outbox is
    /// deliberate; the client can always resync from a snapshot.
    fn send_to(&self, conn: ConnId, msg: ServerMsg) {
        let Some(session) = self.sessions.get(&conn) else {
            return;
        };
        if let Err(err) = session.outbox.try_send(msg) {
            warn!(conn = %conn, %err, "outbox send failed");
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        for (&conn, session) in &self.sessions {
            if session.identified() {
                if let Err(err) = session.outbox.try_send(msg.clone()) {
                    warn!(conn = %conn, %err, "broadcast send failed");
                }
            }
        }
    }

    fn broadcast_except(&self, skip: ConnId, msg: ServerMsg) {
        for (&conn, session) in &self.sessions {
            if conn != skip && session.identified() {
                if let Err(err) = session.outbox.try_send(msg.clone()) {
                    warn!(conn = %conn, %err, "broadcast send failed");
                }
            }
        }
    }
}
