//! Networking primitives.
//!
//! Goals:
//! - One persistent bidirectional channel per client: length-prefixed JSON
//!   frames over TCP.
//! - Tagged message enums validated at the boundary; no untyped payloads.
//! - Keep serialization explicit and versionable.
//!
//! Wire shape: every message is a JSON object with a camelCase `type` tag
//! and flat camelCase fields, e.g.
//! `{"type":"updatePosition","x":10.0,"y":20.0,"rotation":0.5}`.

use anyhow::Context;
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::math::Vec2;
use crate::projectile::{Projectile, Weapon};
use crate::ship::{Rudder, Ship, ShipClass, Throttle};

/// Upper bound on a single frame; anything larger is a protocol error.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

static NEXT_CONN_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one live connection. Ships are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u32);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable client identity, independent of any single connection.
///
/// Minted by the server on first identification and persisted client-side;
/// at most one live connection may be bound to a device at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Mints a fresh random device id.
    pub fn mint<R: rand::Rng>(rng: &mut R) -> Self {
        let mut s = String::with_capacity(16);
        for _ in 0..16 {
            let n: u8 = rng.gen_range(0..16);
            s.push(char::from_digit(n as u32, 16).unwrap_or('0'));
        }
        DeviceId(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lenient float decoding: JSON has no NaN/Infinity, so a peer that
/// serialized a non-finite value sends `null`. Decode that back to NaN so
/// the frame survives and [`valid_position`] rejects the value instead of
/// the whole connection.
fn nullable_f32<'de, D>(de: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(de)?.unwrap_or(f32::NAN))
}

/// Rejects NaN/infinite and out-of-bounds coordinates before they are
/// trusted, on both sides of the wire.
pub fn valid_position(x: f32, y: f32, rotation: f32, world_size: f32) -> bool {
    x.is_finite()
        && y.is_finite()
        && rotation.is_finite()
        && (0.0..=world_size).contains(&x)
        && (0.0..=world_size).contains(&y)
}

/// Replicated ship state as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: ConnId,
    pub name: String,
    pub color: String,
    #[serde(rename = "type")]
    pub class: ShipClass,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub speed: f32,
    pub throttle: Throttle,
    pub rudder: Rudder,
    pub hull: f32,
    pub max_hull: f32,
    pub destroyed: bool,
}

impl PlayerState {
    pub fn from_ship(ship: &Ship) -> Self {
        Self {
            id: ship.id,
            name: ship.name.clone(),
            color: ship.color.clone(),
            class: ship.class,
            x: ship.pos.x,
            y: ship.pos.y,
            rotation: ship.rotation,
            speed: ship.speed,
            throttle: ship.throttle,
            rudder: ship.rudder,
            hull: ship.hull,
            max_hull: ship.max_hull,
            destroyed: ship.destroyed,
        }
    }

    /// Materializes a remote copy. Device binding is a server-side concern
    /// and never crosses the wire, so the copy carries an empty one.
    pub fn to_ship(&self) -> Ship {
        let mut ship = Ship::new(
            self.id,
            DeviceId::from(""),
            self.name.clone(),
            self.color.clone(),
            self.class,
            Vec2::new(self.x, self.y),
        );
        ship.rotation = self.rotation;
        ship.speed = self.speed;
        ship.throttle = self.throttle;
        ship.rudder = self.rudder;
        ship.set_hull(self.hull);
        ship.destroyed = self.destroyed;
        ship
    }
}

/// Replicated projectile state as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileState {
    pub id: String,
    // Not `type`: projectile payloads ride inline in tagged envelopes,
    // where that key already carries the message tag.
    #[serde(rename = "weaponType")]
    pub weapon: Weapon,
    #[serde(deserialize_with = "nullable_f32")]
    pub x: f32,
    #[serde(deserialize_with = "nullable_f32")]
    pub y: f32,
    #[serde(deserialize_with = "nullable_f32")]
    pub rotation: f32,
    pub source_id: ConnId,
    pub spawn_timestamp: i64,
    #[serde(default)]
    pub distance_traveled: f32,
}

impl ProjectileState {
    pub fn from_projectile(p: &Projectile) -> Self {
        Self {
            id: p.id.clone(),
            weapon: p.weapon,
            x: p.pos.x,
            y: p.pos.y,
            rotation: p.rotation,
            source_id: p.source,
            spawn_timestamp: p.spawn_ms,
            distance_traveled: p.distance_traveled,
        }
    }

    pub fn to_projectile(&self, arming_distance: f32) -> Projectile {
        let mut p = Projectile::new(
            self.id.clone(),
            self.weapon,
            Vec2::new(self.x, self.y),
            self.rotation,
            self.source_id,
            self.spawn_timestamp,
            arming_distance,
        );
        p.distance_traveled = self.distance_traveled;
        p
    }
}

/// Client → server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// First message on every connection. Absent `deviceId` asks the
    /// server to mint one.
    #[serde(rename_all = "camelCase")]
    IdentifyDevice {
        device_id: Option<DeviceId>,
        player_name: String,
        color: Option<String>,
        ship_type: Option<ShipClass>,
    },
    /// Full-snapshot pull for desync recovery.
    RequestGameState,
    #[serde(rename_all = "camelCase")]
    UpdatePosition {
        #[serde(deserialize_with = "nullable_f32")]
        x: f32,
        #[serde(deserialize_with = "nullable_f32")]
        y: f32,
        #[serde(deserialize_with = "nullable_f32")]
        rotation: f32,
    },
    ProjectileFired(ProjectileState),
    #[serde(rename_all = "camelCase")]
    DamageShip {
        target_id: ConnId,
        #[serde(deserialize_with = "nullable_f32")]
        amount: f32,
        source_id: ConnId,
    },
    Heartbeat,
    RequestRespawn,
}

impl ClientMsg {
    /// Messages that mutate game state require a completed identification.
    pub fn requires_identity(&self) -> bool {
        !matches!(self, ClientMsg::IdentifyDevice { .. } | ClientMsg::Heartbeat)
    }
}

/// Server → client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    #[serde(rename_all = "camelCase")]
    DeviceIdAssigned { device_id: DeviceId },
    /// Protocol-sequence notice: a state-mutating message arrived before
    /// identification. Recoverable; the client should identify and retry.
    IdentificationRequired { message: String },
    #[serde(rename_all = "camelCase")]
    GameState {
        players: Vec<PlayerState>,
        #[serde(rename = "self")]
        self_player: PlayerState,
        projectiles: Vec<ProjectileState>,
    },
    PlayerJoined { player: PlayerState },
    #[serde(rename_all = "camelCase")]
    PlayerMoved {
        id: ConnId,
        x: f32,
        y: f32,
        rotation: f32,
    },
    /// Partial correction; `None` fields are unchanged.
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        id: ConnId,
        x: f32,
        y: f32,
        rotation: f32,
        ship_type: Option<ShipClass>,
        hull: Option<f32>,
        color: Option<String>,
    },
    ProjectileFired(ProjectileState),
    /// Server-detected damage (tick collisions, projectile hits).
    #[serde(rename_all = "camelCase")]
    ShipDamaged {
        id: ConnId,
        hull: f32,
        source_id: ConnId,
        damage: f32,
        timestamp: i64,
    },
    /// Echo of an applied `damageShip`; the hull value is authoritative.
    #[serde(rename_all = "camelCase")]
    DamageConfirmed {
        target_id: ConnId,
        new_hull: f32,
        damage: f32,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    ShipDestroyed {
        id: ConnId,
        destroyed_by: ConnId,
        destroyer_name: String,
    },
    ShipRespawned { player: PlayerState },
    RespawnAccepted { player: PlayerState },
    PlayerLeft { id: ConnId },
    ForceDisconnect { reason: String },
}

async fn write_frame<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    anyhow::ensure!(payload.len() <= MAX_FRAME_BYTES, "frame too large");
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_BYTES, "frame too large: {len} bytes");
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// The persistent channel: length-prefixed JSON frames over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently-owned read and write halves so a
    /// connection can be serviced by separate reader/writer tasks.
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        let (read, write) = self.stream.into_split();
        (FramedReader { half: read }, FramedWriter { half: write })
    }
}

/// Read half of a split [`FramedConn`].
#[derive(Debug)]
pub struct FramedReader {
    half: OwnedReadHalf,
}

impl FramedReader {
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a split [`FramedConn`].
#[derive(Debug)]
pub struct FramedWriter {
    half: OwnedWriteHalf,
}

impl FramedWriter {
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    /// Flushes and closes the write direction, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.half.shutdown().await.context("tcp shutdown")?;
        Ok(())
    }
}

/// TCP server listener.
pub struct FramedListener {
    listener: TcpListener,
}

impl FramedListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes<T: Serialize>(msg: &T) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(msg).context("serialize")
}

pub fn decode_from_bytes<T: DeserializeOwned>(b: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_roundtrip_bytes() {
        let msg = ClientMsg::IdentifyDevice {
            device_id: Some(DeviceId::from("abcd1234")),
            player_name: "Nelson".to_string(),
            color: Some("#aa3311".to_string()),
            ship_type: Some(ShipClass::Dreadnought),
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back: ClientMsg = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn wire_format_is_tagged_camel_case() {
        let msg = ClientMsg::UpdatePosition {
            x: 1.0,
            y: 2.0,
            rotation: 0.5,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "updatePosition");
        assert_eq!(json["x"], 1.0);

        let msg = ServerMsg::DamageConfirmed {
            target_id: ConnId(3),
            new_hull: 55.0,
            damage: 10.0,
            timestamp: 1234,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "damageConfirmed");
        assert_eq!(json["targetId"], 3);
        assert_eq!(json["newHull"], 55.0);
    }

    #[test]
    fn payload_kind_fields_stay_clear_of_the_message_tag() {
        let msg = ClientMsg::IdentifyDevice {
            device_id: None,
            player_name: "Drake".to_string(),
            color: None,
            ship_type: Some(ShipClass::Frigate),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "identifyDevice");
        assert_eq!(json["shipType"], "frigate");

        let state = ProjectileState {
            id: "4-1".to_string(),
            weapon: Weapon::Cannon,
            x: 10.0,
            y: 20.0,
            rotation: 0.0,
            source_id: ConnId(4),
            spawn_timestamp: 1000,
            distance_traveled: 0.0,
        };
        let json = serde_json::to_value(ClientMsg::ProjectileFired(state.clone())).unwrap();
        assert_eq!(json["type"], "projectileFired");
        assert_eq!(json["weaponType"], "cannon");
        let back: ClientMsg = serde_json::from_value(json).unwrap();
        assert_eq!(back, ClientMsg::ProjectileFired(state.clone()));

        let json = serde_json::to_value(ServerMsg::ProjectileFired(state.clone())).unwrap();
        assert_eq!(json["type"], "projectileFired");
        let back: ServerMsg = serde_json::from_value(json).unwrap();
        assert_eq!(back, ServerMsg::ProjectileFired(state));
    }

    #[test]
    fn non_finite_floats_arrive_as_nan_not_as_errors() {
        // serde_json writes non-finite floats as null; the decode side
        // must hand them to the validators instead of failing the frame.
        let json = r#"{"type":"updatePosition","x":null,"y":10.0,"rotation":0.0}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        match msg {
            ClientMsg::UpdatePosition { x, y, rotation } => {
                assert!(x.is_nan());
                assert!(!valid_position(x, y, rotation, 100.0));
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let sent = ClientMsg::UpdatePosition {
            x: f32::NAN,
            y: 10.0,
            rotation: 0.0,
        };
        let bytes = encode_to_bytes(&sent).unwrap();
        let back: ClientMsg = decode_from_bytes(&bytes).unwrap();
        match back {
            ClientMsg::UpdatePosition { x, .. } => assert!(x.is_nan()),
            other => panic!("wrong variant: {other:?}"),
        }

        let json = r#"{"type":"damageShip","targetId":2,"amount":null,"sourceId":1}"#;
        match serde_json::from_str::<ClientMsg>(json).unwrap() {
            ClientMsg::DamageShip { amount, .. } => assert!(amount.is_nan()),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn identify_without_device_id_parses() {
        let json = r#"{"type":"identifyDevice","playerName":"Drake"}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        match msg {
            ClientMsg::IdentifyDevice {
                device_id,
                player_name,
                color,
                ship_type,
            } => {
                assert!(device_id.is_none());
                assert_eq!(player_name, "Drake");
                assert!(color.is_none());
                assert!(ship_type.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let json = r#"{"type":"formatHardDrive"}"#;
        assert!(serde_json::from_str::<ClientMsg>(json).is_err());
    }

    #[test]
    fn mutating_messages_require_identity() {
        assert!(ClientMsg::UpdatePosition {
            x: 0.0,
            y: 0.0,
            rotation: 0.0
        }
        .requires_identity());
        assert!(ClientMsg::RequestRespawn.requires_identity());
        assert!(!ClientMsg::Heartbeat.requires_identity());
        assert!(!ClientMsg::IdentifyDevice {
            device_id: None,
            player_name: String::new(),
            color: None,
            ship_type: None,
        }
        .requires_identity());
    }

    #[test]
    fn valid_position_rejects_nan_and_out_of_bounds() {
        assert!(valid_position(10.0, 10.0, 0.0, 100.0));
        assert!(!valid_position(f32::NAN, 10.0, 0.0, 100.0));
        assert!(!valid_position(10.0, f32::INFINITY, 0.0, 100.0));
        assert!(!valid_position(10.0, 10.0, f32::NAN, 100.0));
        assert!(!valid_position(-1.0, 10.0, 0.0, 100.0));
        assert!(!valid_position(10.0, 101.0, 0.0, 100.0));
    }

    #[test]
    fn player_state_ship_roundtrip() {
        let ship = Ship::new(
            ConnId(9),
            DeviceId::from("dev-9"),
            "Surprise",
            "#123456",
            ShipClass::Corvette,
            Vec2::new(30.0, 40.0),
        );
        let state = PlayerState::from_ship(&ship);
        let back = state.to_ship();
        assert_eq!(back.id, ship.id);
        assert_eq!(back.pos, ship.pos);
        assert_eq!(back.hull, ship.hull);
        assert_eq!(back.class, ship.class);
    }
}
