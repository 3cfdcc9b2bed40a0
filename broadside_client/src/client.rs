//! Client implementation.
//!
//! The client maintains:
//! - One persistent framed connection to the server
//! - A predicted local [`World`] advanced by the shared movement model
//! - A durable device id persisted to disk across runs
//! - A queue of visual events for a frontend to drain
//!
//! Prediction is last-write-wins: the client moves its own ship locally
//! and reports poses upstream, while authoritative hull values and full
//! snapshots from the server overwrite whatever was predicted.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use broadside_shared::config::SimConfig;
use broadside_shared::events::{EventQueue, VisualEvent};
use broadside_shared::math::Vec2;
use broadside_shared::net::{
    valid_position, ClientMsg, ConnId, DeviceId, FramedConn, FramedReader, FramedWriter,
    PlayerState, ProjectileState, ServerMsg,
};
use broadside_shared::projectile::{Projectile, Weapon};
use broadside_shared::world::{World, WorldEvent};

/// How often the predicted pose is reported upstream.
const POSITION_SEND_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on decoded-but-unpolled server messages.
const INBOX_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Identification sent, waiting for the first snapshot.
    Identifying,
    /// Snapshot received; predicting and playing.
    Ready,
    /// Server told us to go away or the socket died.
    Disconnected,
}

/// On-disk shape of the persisted device identity.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceFile {
    device_id: DeviceId,
}

/// High-level game client.
pub struct GameClient {
    cfg: SimConfig,
    writer: FramedWriter,
    /// Decoded messages from the reader task. Frames are only ever read
    /// whole there, so an impatient [`poll`](Self::poll) deadline can
    /// never tear the length-prefixed stream.
    inbox: mpsc::Receiver<ServerMsg>,
    pub state: ClientState,

    /// Our connection id, learned from the first snapshot.
    pub conn_id: Option<ConnId>,
    device_id: Option<DeviceId>,
    device_path: PathBuf,

    /// Predicted world, advanced by the same code the server runs.
    pub world: World,
    /// Visual happenings for a frontend to drain each frame.
    pub events: EventQueue,

    next_projectile_seq: u64,
    last_position_sent: Instant,
    last_heartbeat: Instant,
}

impl GameClient {
    /// Connects, loads (or requests) a device identity, and identifies.
    pub async fn connect(cfg: SimConfig) -> anyhow::Result<Self> {
        let addr = cfg
            .server_addr
            .parse()
            .with_context(|| format!("parse server_addr {:?}", cfg.server_addr))?;
        info!(server = %addr, "Connecting to server");
        let conn = FramedConn::connect(addr).await?;
        let (reader, writer) = conn.into_split();
        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(read_task(reader, inbox_tx));

        let device_path = PathBuf::from(&cfg.device_file);
        let device_id = load_device_id(&device_path);

        let world = World::new(cfg.world_size);
        let mut client = Self {
            writer,
            inbox,
            state: ClientState::Identifying,
            conn_id: None,
            device_id,
            device_path,
            world,
            events: EventQueue::default(),
            next_projectile_seq: 0,
            last_position_sent: Instant::now(),
            last_heartbeat: Instant::now(),
            cfg,
        };
        client.identify().await?;
        Ok(client)
    }

    /// Sends the identification message. Also used to recover after an
    /// `identificationRequired` notice.
    pub async fn identify(&mut self) -> anyhow::Result<()> {
        self.writer
            .send(&ClientMsg::IdentifyDevice {
                device_id: self.device_id.clone(),
                player_name: self.cfg.player_name.clone(),
                color: None,
                ship_type: None,
            })
            .await?;
        self.state = ClientState::Identifying;
        Ok(())
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    fn own_id(&self) -> Option<ConnId> {
        self.conn_id
    }

    /// Polls for at most one decoded message, with a short timeout so
    /// callers can interleave polling with frame work. The timeout races
    /// a channel receive, which is safe to abandon mid-wait.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<()> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(msg)) => self.handle_server_msg(msg).await?,
            Ok(None) => {
                warn!("connection closed");
                self.state = ClientState::Disconnected;
            }
            Err(_) => {}
        }
        Ok(())
    }

    async fn handle_server_msg(&mut self, msg: ServerMsg) -> anyhow::Result<()> {
        match msg {
            ServerMsg::DeviceIdAssigned { device_id } => {
                info!(device = %device_id, "device id assigned");
                if let Err(err) = store_device_id(&self.device_path, &device_id) {
                    warn!(%err, path = %self.device_path.display(), "could not persist device id");
                }
                self.device_id = Some(device_id);
            }
            ServerMsg::IdentificationRequired { message } => {
                debug!(%message, "re-identifying");
                self.identify().await?;
            }
            ServerMsg::GameState { players, self_player, projectiles } => {
                self.apply_snapshot(players, self_player, projectiles);
            }
            ServerMsg::PlayerJoined { player } => {
                let id = player.id;
                let name = player.name.clone();
                self.world.insert_ship(player.to_ship());
                self.events.push(VisualEvent::PlayerJoined { id, name });
            }
            ServerMsg::PlayerMoved { id, x, y, rotation } => {
                if !valid_position(x, y, rotation, self.world.world_size()) {
                    warn!(%id, x, y, "invalid remote position, resyncing");
                    self.request_game_state().await?;
                } else if !self.world.set_ship_position(id, Vec2::new(x, y), rotation) {
                    debug!(%id, "move for unknown ship, resyncing");
                    self.request_game_state().await?;
                }
            }
            ServerMsg::PlayerUpdate { id, x, y, rotation, ship_type, hull, color } => {
                let Some(ship) = self.world.ship_mut(id) else {
                    self.request_game_state().await?;
                    return Ok(());
                };
                if let Some(class) = ship_type {
                    ship.class = class;
                    ship.max_hull = class.tuning().max_hull;
                }
                if let Some(hull) = hull {
                    ship.set_hull(hull);
                }
                if let Some(color) = color {
                    ship.color = color;
                }
                self.world.set_ship_position(id, Vec2::new(x, y), rotation);
            }
            ServerMsg::ProjectileFired(state) => {
                let arming = self.arming_distance_for(state.source_id);
                let now_ms = Utc::now().timestamp_millis();
                self.world
                    .add_projectile(materialize_projectile(&state, arming, now_ms));
            }
            ServerMsg::ShipDamaged { id, hull, .. } => {
                // The wire does not say whether this was a shell or a ram,
                // so the event stays cause-neutral.
                let at = self.world.ship(id).map(|s| s.pos);
                if let Some(ship) = self.world.ship_mut(id) {
                    ship.set_hull(hull);
                }
                if let Some(at) = at {
                    self.events.push(VisualEvent::HullDamaged { id, at });
                }
            }
            ServerMsg::DamageConfirmed { target_id, new_hull, .. } => {
                // The authoritative echo wins over our prediction.
                if let Some(ship) = self.world.ship_mut(target_id) {
                    ship.set_hull(new_hull);
                }
            }
            ServerMsg::ShipDestroyed { id, destroyer_name, .. } => {
                if let Some(ship) = self.world.ship_mut(id) {
                    ship.set_hull(0.0);
                }
                self.events.push(VisualEvent::ShipDestroyed { id, destroyer_name });
            }
            ServerMsg::ShipRespawned { player } | ServerMsg::RespawnAccepted { player } => {
                let id = player.id;
                self.world.remove_ship(id);
                self.world.insert_ship(player.to_ship());
                self.events.push(VisualEvent::ShipRespawned { id });
            }
            ServerMsg::PlayerLeft { id } => {
                self.world.remove_ship(id);
                self.events.push(VisualEvent::PlayerLeft { id });
            }
            ServerMsg::ForceDisconnect { reason } => {
                info!(%reason, "server closed the session");
                self.state = ClientState::Disconnected;
            }
        }
        Ok(())
    }

    /// Replaces the predicted world with an authoritative snapshot,
    /// keeping only the local control levers on our own ship.
    fn apply_snapshot(
        &mut self,
        players: Vec<PlayerState>,
        self_player: PlayerState,
        projectiles: Vec<ProjectileState>,
    ) {
        let prior = self
            .own_id()
            .and_then(|id| self.world.ship(id))
            .map(|s| (s.throttle, s.rudder, s.speed));

        self.conn_id = Some(self_player.id);
        self.world = World::new(self.cfg.world_size);

        let mut own = self_player.to_ship();
        if let Some((throttle, rudder, speed)) = prior {
            own.throttle = throttle;
            own.rudder = rudder;
            own.speed = speed;
        }
        self.world.insert_ship(own);
        for player in players {
            self.world.insert_ship(player.to_ship());
        }
        let now_ms = Utc::now().timestamp_millis();
        for state in projectiles {
            let arming = self.arming_distance_for(state.source_id);
            self.world
                .add_projectile(materialize_projectile(&state, arming, now_ms));
        }
        self.state = ClientState::Ready;
        info!(ships = self.world.ship_count(), projectiles = self.world.projectile_count(), "snapshot applied");
    }

    /// Full-snapshot pull for desync recovery.
    pub async fn request_game_state(&mut self) -> anyhow::Result<()> {
        self.writer.send(&ClientMsg::RequestGameState).await
    }

    /// Advances one predicted frame: own-ship movement, projectile flight
    /// and local hit detection, plus the periodic upstream reports.
    pub async fn step(&mut self, dt: f32) -> anyhow::Result<()> {
        if self.state != ClientState::Ready {
            return Ok(());
        }
        let Some(own) = self.own_id() else {
            return Ok(());
        };

        if let Some(ship) = self.world.ship_mut(own) {
            ship.tick_cooldowns();
        }
        self.world.step_ship_movement(own, dt);

        let now_ms = Utc::now().timestamp_millis();
        let events = self.world.step(dt, now_ms, Instant::now());
        for event in events {
            match event {
                // Prediction only: the server runs the same hit detection
                // on its own tick and the `shipDamaged` it broadcasts is
                // the one that counts. Reporting the hit upstream as well
                // would land the damage twice.
                WorldEvent::ProjectileHit { target, .. } => {
                    if let Some(at) = self.world.ship(target).map(|s| s.pos) {
                        self.events.push(VisualEvent::ProjectileHit { target, at });
                    }
                }
                WorldEvent::ShipsCollided { a, b, .. } => {
                    let midpoint = match (self.world.ship(a), self.world.ship(b)) {
                        (Some(sa), Some(sb)) => sa.pos.add(sb.pos).scale(0.5),
                        _ => continue,
                    };
                    self.events.push(VisualEvent::ShipsCollided { a, b, at: midpoint });
                }
                WorldEvent::ProjectileExpired { .. } => {}
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_position_sent) >= POSITION_SEND_INTERVAL {
            self.last_position_sent = now;
            if let Some(ship) = self.world.ship(own).filter(|s| s.is_active()) {
                self.writer
                    .send(&ClientMsg::UpdatePosition {
                        x: ship.pos.x,
                        y: ship.pos.y,
                        rotation: ship.rotation,
                    })
                    .await?;
            }
        }
        if now.duration_since(self.last_heartbeat) >= Duration::from_secs(self.cfg.heartbeat_secs) {
            self.last_heartbeat = now;
            self.writer.send(&ClientMsg::Heartbeat).await?;
        }
        Ok(())
    }

    /// Fires a weapon if alive and off cooldown. The projectile enters the
    /// local world immediately and is announced upstream.
    pub async fn fire(&mut self, weapon: Weapon) -> anyhow::Result<bool> {
        let Some(own) = self.own_id() else {
            return Ok(false);
        };
        let Some(ship) = self.world.ship(own) else {
            return Ok(false);
        };
        if !ship.is_active() || !ship.weapon_ready(weapon) {
            return Ok(false);
        }

        self.next_projectile_seq += 1;
        let id = format!("{}-{}", own, self.next_projectile_seq);
        let radius = ship.tuning().collision_radius;
        let muzzle = ship.pos.add(Vec2::from_heading(ship.rotation).scale(radius));
        let projectile = Projectile::new(
            id,
            weapon,
            muzzle,
            ship.rotation,
            own,
            Utc::now().timestamp_millis(),
            radius,
        );
        let state = ProjectileState::from_projectile(&projectile);
        self.world.add_projectile(projectile);
        if let Some(ship) = self.world.ship_mut(own) {
            ship.start_cooldown(weapon);
        }
        self.writer.send(&ClientMsg::ProjectileFired(state)).await?;
        Ok(true)
    }

    /// Asks the server to respawn our destroyed ship.
    pub async fn request_respawn(&mut self) -> anyhow::Result<()> {
        self.writer.send(&ClientMsg::RequestRespawn).await
    }

    /// Read-only view of our own predicted ship.
    pub fn own_ship(&self) -> Option<&broadside_shared::ship::Ship> {
        self.own_id().and_then(|id| self.world.ship(id))
    }

    pub fn own_ship_mut(&mut self) -> Option<&mut broadside_shared::ship::Ship> {
        self.own_id().and_then(|id| self.world.ship_mut(id))
    }

    fn arming_distance_for(&self, source: ConnId) -> f32 {
        self.world
            .ship(source)
            .map(|s| s.tuning().collision_radius)
            .unwrap_or(0.0)
    }
}

/// Owns the read half: decodes whole frames and forwards them. Exits when
/// the socket or the client goes away.
async fn read_task(mut reader: FramedReader, inbox: mpsc::Sender<ServerMsg>) {
    loop {
        match reader.recv::<ServerMsg>().await {
            Ok(msg) => {
                if inbox.send(msg).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%err, "reader closing");
                return;
            }
        }
    }
}

/// Builds the local copy of a peer's projectile. Range bookkeeping comes
/// off the wire, but the lifetime timeout restarts on the local clock:
/// the spawn stamp was minted by another machine and clock skew must not
/// expire a live shot.
fn materialize_projectile(state: &ProjectileState, arming: f32, now_ms: i64) -> Projectile {
    let mut p = state.to_projectile(arming);
    p.spawn_ms = now_ms;
    p
}

fn load_device_id(path: &PathBuf) -> Option<DeviceId> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<DeviceFile>(&text) {
        Ok(file) => Some(file.device_id),
        Err(err) => {
            warn!(%err, path = %path.display(), "unreadable device file, re-minting");
            None
        }
    }
}

fn store_device_id(path: &PathBuf, device_id: &DeviceId) -> anyhow::Result<()> {
    let file = DeviceFile { device_id: device_id.clone() };
    let text = serde_json::to_string_pretty(&file).context("serialize device file")?;
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_projectiles_time_out_on_the_local_clock() {
        let state = ProjectileState {
            id: "9-1".to_string(),
            weapon: Weapon::Cannon,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            source_id: ConnId(9),
            // Stamped by a peer whose clock is far in our past.
            spawn_timestamp: 1_000,
            distance_traveled: 0.0,
        };
        let now_ms = 10_000_000;
        let p = materialize_projectile(&state, 20.0, now_ms);
        assert!(!p.is_expired(now_ms));
        assert!(p.is_expired(now_ms + Weapon::Cannon.timeout_ms()));
    }
}
