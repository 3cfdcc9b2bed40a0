//! Input handling.
//!
//! In a real client this would integrate with windowing and key bindings.
//! This layer maps sampled inputs to discrete helm intents and applies
//! them to the predicted ship; movement itself happens in the shared step.

use anyhow::Result;

use broadside_shared::projectile::Weapon;

use crate::client::GameClient;

/// A discrete helm or combat order for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ThrottleUp,
    ThrottleDown,
    RudderPort,
    RudderStarboard,
    RudderAmidships,
    FireCannon,
    FireTorpedo,
    Respawn,
}

/// Default keyboard binding.
pub fn intent_for_key(key: char) -> Option<Intent> {
    match key {
        'w' => Some(Intent::ThrottleUp),
        's' => Some(Intent::ThrottleDown),
        'a' => Some(Intent::RudderPort),
        'd' => Some(Intent::RudderStarboard),
        'x' => Some(Intent::RudderAmidships),
        ' ' => Some(Intent::FireCannon),
        't' => Some(Intent::FireTorpedo),
        'r' => Some(Intent::Respawn),
        _ => None,
    }
}

/// Applies one intent to the client. Helm orders mutate the predicted
/// ship immediately; combat orders go through the client's send paths.
pub async fn apply_intent(client: &mut GameClient, intent: Intent) -> Result<()> {
    match intent {
        Intent::ThrottleUp => {
            if let Some(ship) = client.own_ship_mut().filter(|s| s.is_active()) {
                ship.throttle = ship.throttle.increased();
            }
        }
        Intent::ThrottleDown => {
            if let Some(ship) = client.own_ship_mut().filter(|s| s.is_active()) {
                ship.throttle = ship.throttle.decreased();
            }
        }
        Intent::RudderPort => {
            if let Some(ship) = client.own_ship_mut().filter(|s| s.is_active()) {
                ship.rudder = ship.rudder.to_port();
            }
        }
        Intent::RudderStarboard => {
            if let Some(ship) = client.own_ship_mut().filter(|s| s.is_active()) {
                ship.rudder = ship.rudder.to_starboard();
            }
        }
        Intent::RudderAmidships => {
            if let Some(ship) = client.own_ship_mut().filter(|s| s.is_active()) {
                ship.rudder = broadside_shared::ship::Rudder::Midships;
            }
        }
        Intent::FireCannon => {
            client.fire(Weapon::Cannon).await?;
        }
        Intent::FireTorpedo => {
            client.fire(Weapon::Torpedo).await?;
        }
        Intent::Respawn => {
            client.request_respawn().await?;
        }
    }
    Ok(())
}
