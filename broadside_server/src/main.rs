//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p broadside_server -- [--addr 127.0.0.1:40000] [--tick-hz 20]
//!       [--world-size 5000] [--config path.json]
//!
//! The server accepts client connections, runs the fixed-timestep
//! simulation, and broadcasts state changes to connected clients.

use std::env;

use anyhow::Context;
use broadside_server::GameServer;
use broadside_shared::config::SimConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<SimConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = SimConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                let text = std::fs::read_to_string(&args[i + 1])
                    .with_context(|| format!("read config {}", args[i + 1]))?;
                cfg = SimConfig::from_json_str(&text)
                    .with_context(|| format!("parse config {}", args[i + 1]))?;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(20);
                i += 2;
            }
            "--world-size" if i + 1 < args.len() => {
                cfg.world_size = args[i + 1].parse().unwrap_or(5000.0);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let server = GameServer::bind(cfg).await.context("bind server")?;
    server.run().await
}
