//! Session lifecycle tests: device binding, supersede, reclaim, sweep.

use std::time::Duration;

use broadside_server::GameServer;
use broadside_shared::config::SimConfig;
use broadside_shared::net::{
    ClientMsg, DeviceId, FramedConn, PlayerState, ServerMsg,
};
use broadside_shared::ship::ShipClass;

async fn recv_matching<F, T>(conn: &mut FramedConn, mut pred: F) -> anyhow::Result<T>
where
    F: FnMut(ServerMsg) -> Option<T>,
{
    for _ in 0..50 {
        let msg: ServerMsg = tokio::time::timeout(Duration::from_secs(2), conn.recv()).await??;
        if let Some(out) = pred(msg) {
            return Ok(out);
        }
    }
    anyhow::bail!("expected message never arrived")
}

async fn identify(conn: &mut FramedConn, device: &str, name: &str) -> anyhow::Result<PlayerState> {
    conn.send(&ClientMsg::IdentifyDevice {
        device_id: Some(DeviceId::from(device)),
        player_name: name.to_string(),
        color: None,
        ship_type: Some(ShipClass::Corvette),
    })
    .await?;
    recv_matching(conn, |msg| match msg {
        ServerMsg::GameState { self_player, .. } => Some(self_player),
        _ => None,
    })
    .await
}

/// Two live connections, one device: the newer session takes the ship
/// over intact and the older one is told to disconnect.
#[tokio::test]
async fn second_connection_supersedes_first() -> anyhow::Result<()> {
    let (server, _cfg) = GameServer::bind_ephemeral(50).await?;
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut first = FramedConn::connect(addr).await?;
    let original = identify(&mut first, "shared-dev", "First").await?;

    let mut second = FramedConn::connect(addr).await?;
    let taken_over = identify(&mut second, "shared-dev", "Second").await?;

    // Same vessel, new owner: position survives, the id is the new
    // connection's, and exactly one session holds the device.
    assert_eq!(taken_over.x, original.x);
    assert_eq!(taken_over.y, original.y);
    assert_ne!(taken_over.id, original.id);
    assert_eq!(taken_over.name, "Second");

    let notice = recv_matching(&mut first, |msg| match msg {
        ServerMsg::ForceDisconnect { reason } => Some(reason),
        _ => None,
    })
    .await?;
    assert!(!notice.is_empty());
    Ok(())
}

/// A clean disconnect parks the ship; reconnecting with the same device
/// reclaims hull and position instead of spawning fresh.
#[tokio::test]
async fn reconnect_reclaims_parked_ship() -> anyhow::Result<()> {
    let (server, _cfg) = GameServer::bind_ephemeral(50).await?;
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut first = FramedConn::connect(addr).await?;
    let me = identify(&mut first, "reclaim-dev", "Keel").await?;

    // Scuff the hull so the reclaim is observable.
    first
        .send(&ClientMsg::DamageShip {
            target_id: me.id,
            amount: 25.0,
            source_id: me.id,
        })
        .await?;
    recv_matching(&mut first, |msg| match msg {
        ServerMsg::DamageConfirmed { .. } => Some(()),
        _ => None,
    })
    .await?;

    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = FramedConn::connect(addr).await?;
    let back = identify(&mut second, "reclaim-dev", "Keel").await?;
    assert_eq!(back.hull, me.max_hull - 25.0);
    assert_eq!(back.x, me.x);
    assert_eq!(back.y, me.y);
    Ok(())
}

/// A different device gets a fresh ship, not someone's parked one.
#[tokio::test]
async fn other_device_does_not_reclaim() -> anyhow::Result<()> {
    let (server, _cfg) = GameServer::bind_ephemeral(50).await?;
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut first = FramedConn::connect(addr).await?;
    let me = identify(&mut first, "park-dev", "Parker").await?;
    first
        .send(&ClientMsg::DamageShip {
            target_id: me.id,
            amount: 30.0,
            source_id: me.id,
        })
        .await?;
    recv_matching(&mut first, |msg| match msg {
        ServerMsg::DamageConfirmed { .. } => Some(()),
        _ => None,
    })
    .await?;
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut other = FramedConn::connect(addr).await?;
    let fresh = identify(&mut other, "other-dev", "Other").await?;
    assert_eq!(fresh.hull, fresh.max_hull);
    Ok(())
}

/// A live session re-identifying under a new device keeps its ship and
/// releases the old device, which is then free for someone else.
#[tokio::test]
async fn reidentifying_with_new_device_releases_old_binding() -> anyhow::Result<()> {
    let (server, _cfg) = GameServer::bind_ephemeral(50).await?;
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut conn = FramedConn::connect(addr).await?;
    let me = identify(&mut conn, "swap-dev-a", "Swapper").await?;

    // Scuff the hull so the two ships are distinguishable.
    conn.send(&ClientMsg::DamageShip {
        target_id: me.id,
        amount: 20.0,
        source_id: me.id,
    })
    .await?;
    recv_matching(&mut conn, |msg| match msg {
        ServerMsg::DamageConfirmed { .. } => Some(()),
        _ => None,
    })
    .await?;

    // Same connection, different device: the ship follows the identity.
    let again = identify(&mut conn, "swap-dev-b", "Swapper").await?;
    assert_eq!(again.id, me.id);
    assert_eq!(again.hull, me.max_hull - 20.0);

    // The old device no longer points at this session: a newcomer using
    // it spawns fresh instead of superseding anyone.
    let mut other = FramedConn::connect(addr).await?;
    let fresh = identify(&mut other, "swap-dev-a", "Newcomer").await?;
    assert_ne!(fresh.id, me.id);
    assert_eq!(fresh.hull, fresh.max_hull);

    // And the first session is still live, still holding its ship.
    conn.send(&ClientMsg::RequestGameState).await?;
    let mine = recv_matching(&mut conn, |msg| match msg {
        ServerMsg::GameState { self_player, .. } => Some(self_player),
        _ => None,
    })
    .await?;
    assert_eq!(mine.id, me.id);
    assert_eq!(mine.hull, me.max_hull - 20.0);
    Ok(())
}

/// With a zero inactivity budget the sweep reaps the session on the next
/// tick and says why.
#[tokio::test]
async fn inactive_session_is_swept() -> anyhow::Result<()> {
    let cfg = SimConfig {
        server_addr: "127.0.0.1:0".to_string(),
        tick_hz: 50,
        sweep_secs: 0,
        session_timeout_secs: 0,
        ..SimConfig::default()
    };
    let server = GameServer::bind(cfg).await?;
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut conn = FramedConn::connect(addr).await?;
    conn.send(&ClientMsg::IdentifyDevice {
        device_id: Some(DeviceId::from("sleepy-dev")),
        player_name: "Sleepy".to_string(),
        color: None,
        ship_type: Some(ShipClass::Corvette),
    })
    .await?;

    // The session may be reaped before or after the snapshot goes out;
    // either way the disconnect notice arrives.
    let reason = recv_matching(&mut conn, |msg| match msg {
        ServerMsg::ForceDisconnect { reason } => Some(reason),
        _ => None,
    })
    .await?;
    assert!(reason.contains("timed out"), "reason was {reason:?}");
    Ok(())
}
