//! Configuration system.
//!
//! Loads simulation configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Authoritative simulation tick rate.
    pub tick_hz: u32,
    /// Edge length of the square world, in world units.
    #[serde(default = "default_world_size")]
    pub world_size: f32,
    /// Client heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Server liveness sweep interval in seconds.
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    /// Seconds of inactivity before a session is reaped.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Path where the client persists its device id.
    #[serde(default = "default_device_file")]
    pub device_file: String,
}

fn default_world_size() -> f32 {
    5000.0
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_sweep_secs() -> u64 {
    60
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_player_name() -> String {
    "Captain".to_string()
}

fn default_device_file() -> String {
    "device_id.json".to_string()
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 20,
            world_size: default_world_size(),
            heartbeat_secs: default_heartbeat_secs(),
            sweep_secs: default_sweep_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            player_name: default_player_name(),
            device_file: default_device_file(),
        }
    }
}

impl SimConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
