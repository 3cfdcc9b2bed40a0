//! Socket plumbing between client connections and the game loop.
//!
//! Each accepted connection gets a reader task and a writer task. The
//! reader decodes frames and forwards them into the single game task as
//! [`SessionEvent`]s; the writer drains a per-connection outbox. The game
//! task never touches a socket directly, so a slow or dead peer can never
//! stall the tick loop.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use broadside_shared::net::{ClientMsg, ConnId, FramedListener, FramedReader, FramedWriter, ServerMsg};

/// Outbox depth per connection before sends start getting dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// What a connection task reports into the game loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A new connection was accepted and its tasks are running.
    Connected {
        conn: ConnId,
        peer: SocketAddr,
        outbox: mpsc::Sender<ServerMsg>,
        kill: oneshot::Sender<()>,
    },
    /// A decoded message arrived from the peer.
    Inbound { conn: ConnId, msg: ClientMsg },
    /// The connection's reader has exited (EOF, error, or kill).
    Closed { conn: ConnId },
}

/// Accepts connections forever, spawning reader/writer tasks per socket.
///
/// Returns only when the listener itself fails or the game task has gone
/// away (the events channel is closed).
pub async fn accept_loop(listener: FramedListener, events: mpsc::Sender<SessionEvent>) -> Result<()> {
    loop {
        let (conn, peer) = listener.accept().await?;
        let id = ConnId::new_unique();
        debug!(conn = %id, %peer, "connection accepted");

        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (reader, writer) = conn.into_split();

        if events
            .send(SessionEvent::Connected { conn: id, peer, outbox: outbox_tx, kill: kill_tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        tokio::spawn(read_task(id, reader, events.clone(), kill_rx));
        tokio::spawn(write_task(id, writer, outbox_rx));
    }
}

/// Pumps decoded frames into the game loop until EOF, a decode error, or
/// the kill signal. Always reports `Closed` on the way out.
async fn read_task(
    conn: ConnId,
    mut reader: FramedReader,
    events: mpsc::Sender<SessionEvent>,
    mut kill: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            res = reader.recv::<ClientMsg>() => match res {
                Ok(msg) => {
                    trace!(conn = %conn, ?msg, "inbound");
                    if events.send(SessionEvent::Inbound { conn, msg }).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(conn = %conn, %err, "reader closing");
                    break;
                }
            },
            _ = &mut kill => {
                debug!(conn = %conn, "reader killed");
                break;
            }
        }
    }
    let _ = events.send(SessionEvent::Closed { conn }).await;
}

/// Drains the outbox onto the socket. Exits when every outbox sender is
/// dropped (session removed) or the peer stops accepting writes.
async fn write_task(conn: ConnId, mut writer: FramedWriter, mut outbox: mpsc::Receiver<ServerMsg>) {
    while let Some(msg) = outbox.recv().await {
        if let Err(err) = writer.send(&msg).await {
            debug!(conn = %conn, %err, "writer closing");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
