//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p broadside_client -- [--addr 127.0.0.1:40000] [--name Ahab]
//!
//! Connects, identifies, takes the helm from stdin (one key per line), and
//! prints visual events as they happen. Intended for manual protocol
//! testing against a running server; a graphical frontend would drain the
//! same event queue instead of printing.
//!
//! Keys:
//!   w/s - throttle up / down      a/d - rudder port / starboard
//!   x   - rudder amidships        space - fire cannon
//!   t   - fire torpedo            r - request respawn
//!   q   - quit

use std::env;
use std::time::Duration;

use anyhow::Context;
use broadside_client::client::{ClientState, GameClient};
use broadside_client::input::{apply_intent, intent_for_key};
use broadside_shared::config::SimConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> SimConfig {
    let mut cfg = SimConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--device-file" if i + 1 < args.len() => {
                cfg.device_file = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    let mut client = GameClient::connect(cfg).await.context("connect")?;

    // Stdin reader thread feeding key lines into the async loop.
    let (key_tx, mut key_rx) = mpsc::channel::<char>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            use std::io::BufRead;
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            for c in line.trim_end_matches('\n').chars() {
                if key_tx.blocking_send(c).is_err() {
                    return;
                }
            }
        }
    });

    println!("Helm ready: w/s throttle, a/d rudder, x amidships, space cannon, t torpedo, r respawn, q quit");

    let frame = Duration::from_millis(50);
    let mut ticker = tokio::time::interval(frame);
    loop {
        tokio::select! {
            key = key_rx.recv() => match key {
                Some('q') | None => break,
                Some(key) => {
                    if let Some(intent) = intent_for_key(key) {
                        apply_intent(&mut client, intent).await?;
                    }
                }
            },
            _ = ticker.tick() => {
                client.poll(Duration::from_millis(1)).await?;
                client.step(frame.as_secs_f32()).await?;
                for event in client.events.drain() {
                    println!("{event:?}");
                }
                if client.state == ClientState::Disconnected {
                    info!("disconnected");
                    break;
                }
            }
        }
    }

    if let Some(ship) = client.own_ship() {
        println!(
            "Final state: pos=({:.0},{:.0}) hull={:.0}/{:.0}",
            ship.pos.x, ship.pos.y, ship.hull, ship.max_hull
        );
    }
    Ok(())
}
